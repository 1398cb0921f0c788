//! Breaker-gated, account-rotating request pipeline: the single call
//! path everything else in the core funnels through. Retry-loop shape
//! is adapted from `other_examples`' `resilient_client.rs`
//! `execute_with_retry`, but the classification table (429 quarantines
//! without poisoning the breaker, 401 rotates without poisoning the
//! breaker, everything else poisons it) is specific to this domain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::bearer::BearerTokenManager;
use crate::breaker::{Admission, CircuitBreaker};
use crate::error::CoreError;
use crate::events::{Event, EventBus, EventKind};
use crate::health::CanaryFetcher;
use crate::pool::{Account, AccountPool};
use crate::scoring::{self, Candidate, Query};
use crate::stats::Stats;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const CANARY_SONG_ID: &str = "1450695739";
const UPSTREAM_ORIGIN: &str = "https://music.apple.com";

pub struct RequestPipeline {
    client: reqwest::Client,
    pool: Arc<AccountPool>,
    breaker: Arc<CircuitBreaker>,
    bearer: Arc<BearerTokenManager>,
    events: EventBus,
    stats: Arc<dyn Stats>,
    upstream_base_url: String,
    duration_delta_ms: i64,
    min_similarity_score: f64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: SearchResults,
}

#[derive(Debug, Deserialize, Default)]
struct SearchResults {
    songs: Option<SongsData>,
}

#[derive(Debug, Deserialize)]
struct SongsData {
    data: Vec<SongResource>,
}

#[derive(Debug, Deserialize)]
struct SongResource {
    id: String,
    attributes: SongAttributes,
}

#[derive(Debug, Deserialize)]
struct SongAttributes {
    name: String,
    #[serde(rename = "artistName")]
    artist_name: String,
    #[serde(rename = "albumName", default)]
    album_name: String,
    #[serde(rename = "durationInMillis", default)]
    duration_in_millis: i64,
}

#[derive(Debug, Deserialize)]
struct LyricsResponse {
    data: Vec<LyricsResource>,
}

#[derive(Debug, Deserialize)]
struct LyricsResource {
    attributes: LyricsAttributes,
}

#[derive(Debug, Deserialize)]
struct LyricsAttributes {
    ttml: String,
}

impl RequestPipeline {
    pub fn new(
        client: reqwest::Client,
        pool: Arc<AccountPool>,
        breaker: Arc<CircuitBreaker>,
        bearer: Arc<BearerTokenManager>,
        events: EventBus,
        stats: Arc<dyn Stats>,
        upstream_base_url: String,
        duration_delta_ms: i64,
        min_similarity_score: f64,
    ) -> Self {
        RequestPipeline {
            client,
            pool,
            breaker,
            bearer,
            events,
            stats,
            upstream_base_url,
            duration_delta_ms,
            min_similarity_score,
        }
    }

    fn max_retries(&self) -> usize {
        self.pool.len().min(3)
    }

    async fn call(&self, path: &str, account: &Account) -> Result<reqwest::Response, CoreError> {
        let token = self.bearer.get_bearer_token().await?;
        let url = format!("{}{}", self.upstream_base_url, path);
        let mut request = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .header("Origin", UPSTREAM_ORIGIN)
            .header("Referer", format!("{UPSTREAM_ORIGIN}/"))
            .header("User-Agent", "Mozilla/5.0");
        if !account.user_token.is_empty() {
            request = request.header("media-user-token", account.user_token.clone());
        }
        request.send().await.map_err(|e| CoreError::upstream(&e))
    }

    /// Runs the full admit -> select -> dispatch -> classify -> retry
    /// loop for a single upstream GET. The admit gate is re-checked on
    /// every attempt, not just the first: a mid-call pool trip (e.g. all
    /// accounts quarantined, forcing the breaker open) must stop further
    /// attempts instead of burning the rest of the retry budget.
    async fn execute(&self, path: &str) -> Result<reqwest::Response, CoreError> {
        let max_retries = self.max_retries();
        let mut last_status: Option<u16> = None;

        for retries in 0..=max_retries {
            match self.breaker.allow().await {
                Admission::Refused { retry_after } => {
                    return Err(CoreError::NotAdmitted { retry_after });
                }
                Admission::Admitted => {}
            }

            let account = self
                .pool
                .next_account()
                .await
                .ok_or(CoreError::NoCredentials)?;

            let response = match self.call(path, &account).await {
                Ok(r) => r,
                Err(err) => {
                    self.breaker.record_failure().await;
                    return Err(err);
                }
            };

            let status = response.status();
            match status {
                StatusCode::OK => {
                    self.breaker.record_success().await;
                    self.pool.clear_quarantine(&account).await;
                    self.stats.record_account_usage(&account.name).await;
                    return Ok(response);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    debug!(account = %account.name, "rate limited, quarantining");
                    self.pool.quarantine(&account).await;
                    if self.pool.available_count().await == 0 {
                        self.breaker.record_failure().await;
                    }
                    last_status = Some(status.as_u16());
                    if retries < max_retries {
                        tokio::time::sleep(Duration::from_secs((retries + 1) as u64)).await;
                        continue;
                    }
                }
                StatusCode::UNAUTHORIZED => {
                    if retries == 0 {
                        let events = self.events.clone();
                        let name = account.name.clone();
                        tokio::spawn(async move {
                            events
                                .publish(
                                    Event::new(
                                        EventKind::AccountAuthFailure,
                                        format!("account {name} returned 401"),
                                    )
                                    .with("account", name.clone()),
                                )
                                .await;
                        });
                    }
                    last_status = Some(status.as_u16());
                    if retries < max_retries {
                        tokio::time::sleep(Duration::from_secs((retries + 1) as u64)).await;
                        continue;
                    }
                }
                other => {
                    self.breaker.record_failure().await;
                    warn!(account = %account.name, status = %other, "non-retriable upstream status");
                    return Err(CoreError::Exhausted {
                        last_status: Some(other.as_u16()),
                        message: format!("upstream returned {other}"),
                    });
                }
            }
        }

        Err(CoreError::Exhausted {
            last_status,
            message: "exhausted all retries".to_string(),
        })
    }

    pub async fn search_songs(&self, storefront: &str, query: &Query) -> Result<Candidate, CoreError> {
        let term = format!("{} {}", query.song, query.artist);
        let encoded_term = urlencoding_light(&term);
        let path = format!(
            "/v1/catalog/{storefront}/search?types=songs&term={encoded_term}"
        );
        let response = self.execute(&path).await?;
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CoreError::upstream(&e))?;

        let candidates: Vec<Candidate> = body
            .results
            .songs
            .map(|s| s.data)
            .unwrap_or_default()
            .into_iter()
            .map(|song| Candidate {
                song_id: song.id,
                song_name: song.attributes.name,
                artist_name: song.attributes.artist_name,
                album_name: song.attributes.album_name,
                duration_millis: song.attributes.duration_in_millis,
            })
            .collect();

        scoring::best_match(query, &candidates, self.duration_delta_ms, self.min_similarity_score)
            .cloned()
            .ok_or(CoreError::NoMatch)
    }

    pub async fn fetch_lyrics(&self, storefront: &str, song_id: &str) -> Result<String, CoreError> {
        let path = format!("/v1/catalog/{storefront}/songs/{song_id}/lyrics");
        let response = self.execute(&path).await?;
        let body: LyricsResponse = response
            .json()
            .await
            .map_err(|e| CoreError::upstream(&e))?;
        body.data
            .into_iter()
            .next()
            .map(|r| r.attributes.ttml)
            .ok_or(CoreError::NoMatch)
    }
}

#[async_trait]
impl CanaryFetcher for RequestPipeline {
    async fn fetch_canary(&self, account: &Account) -> Result<(), String> {
        let path = format!("/v1/catalog/{}/songs/{}/lyrics", account.storefront_code, CANARY_SONG_ID);
        let response = self
            .call(&path, account)
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("canary check returned {}", response.status()))
        }
    }
}

/// Minimal query-string escaping for the search term; avoids pulling in
/// a dedicated URL-encoding crate for one call site.
fn urlencoding_light(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
