use std::sync::Arc;

use lyrics_core::alerts::AlertHandler;
use lyrics_core::bearer::BearerTokenManager;
use lyrics_core::breaker::CircuitBreaker;
use lyrics_core::events::EventBus;
use lyrics_core::health::HealthChecker;
use lyrics_core::notifier::{LogNotifier, Notifier, WebhookNotifier};
use lyrics_core::pipeline::RequestPipeline;
use lyrics_core::pool::{Account, AccountPool};
use lyrics_core::stats::Stats;
use lyrics_core::storefront::StorefrontCache;
use lyrics_core::token_monitor::TokenExpiryMonitor;

use crate::config::GatewayConfig;
use crate::metrics::{GatewayMetrics, PrometheusStats};

/// How often the background task below re-derives pool/breaker gauges.
const METRICS_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

/// Shared, `Arc`-wrapped wiring handed to every axum handler. Shape
/// follows the teacher's `AppState` (a `Clone` struct of cheaply
/// shareable handles).
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AccountPool>,
    pub breaker: Arc<CircuitBreaker>,
    pub bearer: Arc<BearerTokenManager>,
    pub events: EventBus,
    pub storefront_cache: Arc<StorefrontCache>,
    pub pipeline: Arc<RequestPipeline>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics: Arc<GatewayMetrics>,
    pub default_storefront: String,
}

impl AppState {
    pub async fn build(config: &GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::new();
        let events = EventBus::new();

        let accounts: Vec<Account> = config.core.accounts.iter().map(Account::from).collect();

        let breaker = Arc::new(CircuitBreaker::new(
            "lyrics-upstream",
            config.core.breaker_threshold,
            config.core.breaker_cooldown,
            config.core.breaker_half_open_timeout,
            events.clone(),
        ));
        let pool = Arc::new(AccountPool::new(accounts.clone(), events.clone(), breaker.clone()));
        breaker.scale_threshold(pool.len()).await;

        let metrics = Arc::new(GatewayMetrics::new()?);
        let stats: Arc<dyn Stats> = Arc::new(PrometheusStats::new(metrics.clone()));

        let bearer = Arc::new(
            BearerTokenManager::new(
                client.clone(),
                config.core.token_source_base_url.clone(),
                config.core.default_storefront.clone(),
            )
            .with_stats(stats.clone()),
        );
        bearer.clone().start_background_monitor();

        let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
        if let Some(url) = &config.security_alert_webhook_url {
            notifiers.push(Arc::new(WebhookNotifier::new(
                client.clone(),
                url.clone(),
                config.security_alert_webhook_bearer.clone(),
            )));
        }
        let alert_handler = AlertHandler::new(config.core.alert_cooldown, notifiers);
        alert_handler.attach(&events).await;

        let storefront_cache = Arc::new(StorefrontCache::load(config.storefront_cache_path.clone().into()).await);

        let pipeline = Arc::new(RequestPipeline::new(
            client,
            pool.clone(),
            breaker.clone(),
            bearer.clone(),
            events.clone(),
            stats.clone(),
            config.core.upstream_base_url.clone(),
            config.core.duration_delta_ms,
            config.core.min_similarity_score,
        ));

        let health_checker = HealthChecker::new(
            pool.clone(),
            pipeline.clone(),
            events.clone(),
            config.core.health_check_interval,
        );
        health_checker.clone().start(accounts.clone());

        let token_monitor = Arc::new(TokenExpiryMonitor::new(
            config.core.accounts.clone(),
            config.token_monitor_state_path.clone().into(),
            config.core.token_monitor_warning_days,
            config.core.token_monitor_reminder_interval,
            events.clone(),
        ));
        token_monitor.start(config.core.token_monitor_interval);

        spawn_metrics_refresh(pool.clone(), breaker.clone(), metrics.clone());

        Ok(AppState {
            pool,
            breaker,
            bearer,
            events,
            storefront_cache,
            pipeline,
            health_checker,
            metrics,
            default_storefront: config.core.default_storefront.clone(),
        })
    }
}

/// Periodically re-derives the pool/breaker gauges from live state.
/// These three numbers aren't pushed at every quarantine/disable call
/// site because a snapshot every tick is simpler than threading a
/// metrics handle through `AccountPool` and `CircuitBreaker`, and the
/// gauges only need to be roughly current, not event-accurate.
fn spawn_metrics_refresh(pool: Arc<AccountPool>, breaker: Arc<CircuitBreaker>, metrics: Arc<GatewayMetrics>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            metrics.set_accounts_quarantined(pool.quarantined_count().await as i64);
            metrics.set_accounts_disabled(pool.disabled_count().await as i64);
            metrics.set_accounts_available(pool.available_count().await as i64);
            metrics.set_breaker_open(breaker.is_open().await);
        }
    });
}
