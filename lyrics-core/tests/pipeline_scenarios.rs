use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::MockServer;
use lyrics_core::bearer::BearerTokenManager;
use lyrics_core::breaker::CircuitBreaker;
use lyrics_core::error::CoreError;
use lyrics_core::events::EventBus;
use lyrics_core::pipeline::RequestPipeline;
use lyrics_core::pool::{Account, AccountPool};
use lyrics_core::scoring::Query;
use lyrics_core::stats::{NoopStats, Stats};

fn account(name: &str) -> Account {
    Account {
        name: name.to_string(),
        user_token: "token".to_string(),
        storefront_code: "us".to_string(),
    }
}

/// Records every account name passed to `record_account_usage`, so
/// tests can assert usage was attributed to exactly the right account.
#[derive(Default)]
struct RecordingStats {
    used: Mutex<Vec<String>>,
}

#[async_trait]
impl Stats for RecordingStats {
    async fn record_account_usage(&self, account_name: &str) {
        self.used.lock().unwrap().push(account_name.to_string());
    }

    async fn record_bearer_refresh_failure(&self, _stage: &str) {}
}

fn pipeline_for(
    server: &MockServer,
    accounts: Vec<Account>,
    bearer: Arc<BearerTokenManager>,
) -> (Arc<RequestPipeline>, Arc<AccountPool>, Arc<CircuitBreaker>) {
    pipeline_with_stats(server, accounts, bearer, Arc::new(NoopStats))
}

fn pipeline_with_stats(
    server: &MockServer,
    accounts: Vec<Account>,
    bearer: Arc<BearerTokenManager>,
    stats: Arc<dyn Stats>,
) -> (Arc<RequestPipeline>, Arc<AccountPool>, Arc<CircuitBreaker>) {
    let events = EventBus::new();
    let breaker = Arc::new(CircuitBreaker::new(
        "test",
        5,
        Duration::from_millis(200),
        Duration::from_millis(100),
        events.clone(),
    ));
    let pool = Arc::new(AccountPool::new(accounts, events.clone(), breaker.clone()));
    let pipeline = Arc::new(RequestPipeline::new(
        reqwest::Client::new(),
        pool.clone(),
        breaker.clone(),
        bearer,
        events,
        stats,
        server.base_url(),
        2000,
        0.5,
    ));
    (pipeline, pool, breaker)
}

fn bundle_mocks(server: &MockServer, storefront: &str) {
    let browse_html = r#"<script src="/assets/index-abc123.js"></script>"#;
    let jwt_payload = {
        use base64::Engine;
        let exp = (chrono::Utc::now() + chrono::Duration::hours(2)).timestamp();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
    };
    let token = format!("eyJhbGciOiJFUzI1NiIsInR5cCI6IkpXVCIsImtpZCI6{jwt_payload}.sig");
    let bundle_js = format!("var t = \"{token}\";");
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path(format!("/{storefront}/browse"));
        then.status(200).body(browse_html);
    });
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/assets/index-abc123.js");
        then.status(200).body(bundle_js.clone());
    });
}

#[tokio::test]
async fn successful_search_and_fetch_round_trip() {
    let server = MockServer::start();

    // The bearer manager has no public "set" API by design — only the
    // scrape path populates it — so this test points it at a mock server
    // that serves a trivial browse page + bundle containing a JWT.
    let browse_html = r#"<script src="/assets/index-abc123.js"></script>"#;
    let jwt_payload = {
        use base64::Engine;
        let exp = (chrono::Utc::now() + chrono::Duration::hours(2)).timestamp();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
    };
    let token = format!("eyJhbGciOiJFUzI1NiIsInR5cCI6IkpXVCIsImtpZCI6{jwt_payload}.sig");
    let bundle_js = format!("var t = \"{token}\";");

    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/us/browse");
        then.status(200).body(browse_html);
    });
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/assets/index-abc123.js");
        then.status(200).body(bundle_js);
    });

    let bearer = Arc::new(BearerTokenManager::new(
        reqwest::Client::new(),
        server.base_url(),
        "us".to_string(),
    ));

    server.mock(|when, then| {
        when.method(httpmock::Method::GET)
            .path("/v1/catalog/us/search")
            .query_param_exists("term");
        then.status(200).json_body(serde_json::json!({
            "results": { "songs": { "data": [{
                "id": "42",
                "attributes": {
                    "name": "Yesterday",
                    "artistName": "The Beatles",
                    "albumName": "Help!",
                    "durationInMillis": 125000
                }
            }]}}
        }));
    });
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/v1/catalog/us/songs/42/lyrics");
        then.status(200).json_body(serde_json::json!({
            "data": [{ "attributes": { "ttml": "<tt>lyrics</tt>" } }]
        }));
    });

    let (pipeline, _pool, _breaker) = pipeline_for(&server, vec![account("a")], bearer);

    let query = Query {
        song: "Yesterday".into(),
        artist: "The Beatles".into(),
        album: "Help!".into(),
        target_duration_millis: 125000,
    };
    let candidate = pipeline.search_songs("us", &query).await.unwrap();
    assert_eq!(candidate.song_id, "42");

    let ttml = pipeline.fetch_lyrics("us", &candidate.song_id).await.unwrap();
    assert_eq!(ttml, "<tt>lyrics</tt>");
}

#[tokio::test]
async fn rate_limited_account_rotates_to_next() {
    let server = MockServer::start();

    let browse_html = r#"<script src="/assets/index-abc123.js"></script>"#;
    let jwt_payload = {
        use base64::Engine;
        let exp = (chrono::Utc::now() + chrono::Duration::hours(2)).timestamp();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
    };
    let token = format!("eyJhbGciOiJFUzI1NiIsInR5cCI6IkpXVCIsImtpZCI6{jwt_payload}.sig");
    let bundle_js = format!("var t = \"{token}\";");
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/us/browse");
        then.status(200).body(browse_html);
    });
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/assets/index-abc123.js");
        then.status(200).body(bundle_js);
    });
    let bearer = Arc::new(BearerTokenManager::new(
        reqwest::Client::new(),
        server.base_url(),
        "us".to_string(),
    ));

    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/v1/catalog/us/songs/1/lyrics");
        then.status(429);
    });

    let (pipeline, pool, _breaker) =
        pipeline_for(&server, vec![account("a"), account("b")], bearer);

    let result = pipeline.fetch_lyrics("us", "1").await;
    assert!(matches!(result, Err(CoreError::Exhausted { .. })));
    // Both accounts should have ended up quarantined by the retry loop.
    assert_eq!(pool.available_count().await, 0);
}

#[tokio::test]
async fn one_429_rotates_to_a_second_account_that_succeeds() {
    let server = MockServer::start();
    bundle_mocks(&server, "us");
    let bearer = Arc::new(BearerTokenManager::new(
        reqwest::Client::new(),
        server.base_url(),
        "us".to_string(),
    ));

    let limited = Account {
        name: "limited".to_string(),
        user_token: "tok-limited".to_string(),
        storefront_code: "us".to_string(),
    };
    let healthy = Account {
        name: "healthy".to_string(),
        user_token: "tok-healthy".to_string(),
        storefront_code: "us".to_string(),
    };

    server.mock(|when, then| {
        when.method(httpmock::Method::GET)
            .path("/v1/catalog/us/songs/7/lyrics")
            .header("media-user-token", "tok-limited");
        then.status(429);
    });
    server.mock(|when, then| {
        when.method(httpmock::Method::GET)
            .path("/v1/catalog/us/songs/7/lyrics")
            .header("media-user-token", "tok-healthy");
        then.status(200).json_body(serde_json::json!({
            "data": [{ "attributes": { "ttml": "<tt>winner</tt>" } }]
        }));
    });

    let stats = Arc::new(RecordingStats::default());
    let (pipeline, _pool, breaker) = pipeline_with_stats(
        &server,
        vec![limited.clone(), healthy.clone()],
        bearer,
        stats.clone(),
    );

    let ttml = pipeline.fetch_lyrics("us", "7").await.unwrap();
    assert_eq!(ttml, "<tt>winner</tt>");

    // The breaker never sees a failure worth poisoning it over: 429s
    // quarantine the account but don't trip the breaker while another
    // account remains available.
    assert!(matches!(breaker.allow().await, lyrics_core::breaker::Admission::Admitted));

    let used = stats.used.lock().unwrap().clone();
    assert_eq!(used, vec!["healthy".to_string()]);
}

#[tokio::test]
async fn concurrent_bearer_token_requests_scrape_exactly_once() {
    let server = MockServer::start();

    let browse_mock = server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/us/browse");
        then.status(200)
            .body(r#"<script src="/assets/index-abc123.js"></script>"#);
    });
    let jwt_payload = {
        use base64::Engine;
        let exp = (chrono::Utc::now() + chrono::Duration::hours(2)).timestamp();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
    };
    let token = format!("eyJhbGciOiJFUzI1NiIsInR5cCI6IkpXVCIsImtpZCI6{jwt_payload}.sig");
    let bundle_mock = server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/assets/index-abc123.js");
        then.status(200).body(format!("var t = \"{token}\";"));
    });

    let bearer = Arc::new(BearerTokenManager::new(
        reqwest::Client::new(),
        server.base_url(),
        "us".to_string(),
    ));

    // N concurrent callers race against a cold cache; the double-checked
    // lock in `refresh()` must ensure only the first caller actually
    // scrapes, the rest just wait for the write lock and read its result.
    let mut handles = Vec::new();
    for _ in 0..16 {
        let bearer = bearer.clone();
        handles.push(tokio::spawn(
            async move { bearer.get_bearer_token().await },
        ));
    }
    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap());
    }

    assert!(tokens.iter().all(|t| t == &tokens[0]));
    browse_mock.assert_hits(1);
    bundle_mock.assert_hits(1);
}
