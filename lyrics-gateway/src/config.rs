use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use lyrics_core::config::{AccountEntry, CoreConfig};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub storefront_cache_path: String,
    pub token_monitor_state_path: String,
    pub security_alert_webhook_url: Option<String>,
    pub security_alert_webhook_bearer: Option<String>,
    pub core: CoreConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);

        let upstream_base_url = env::var("LYRICS_UPSTREAM_BASE_URL")
            .context("LYRICS_UPSTREAM_BASE_URL must be set")?;
        let token_source_base_url = env::var("LYRICS_TOKEN_SOURCE_BASE_URL")
            .context("LYRICS_TOKEN_SOURCE_BASE_URL must be set")?;
        let default_storefront =
            env::var("LYRICS_DEFAULT_STOREFRONT").unwrap_or_else(|_| "us".to_string());

        let accounts = load_accounts().context("failed to load account credentials")?;

        let breaker_threshold = env::var("LYRICS_BREAKER_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);
        let breaker_cooldown_secs = env::var("LYRICS_BREAKER_COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);
        let breaker_half_open_timeout_secs = env::var("LYRICS_BREAKER_HALF_OPEN_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let duration_delta_ms = env::var("LYRICS_DURATION_DELTA_MS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(2000);
        let min_similarity_score = env::var("LYRICS_MIN_SIMILARITY_SCORE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.5);
        let health_check_interval_secs = env::var("LYRICS_HEALTH_CHECK_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(24 * 60 * 60);
        let token_monitor_interval_secs = env::var("LYRICS_TOKEN_MONITOR_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(6 * 60 * 60);
        let token_monitor_warning_days = env::var("LYRICS_TOKEN_MONITOR_WARNING_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(7);
        let token_monitor_reminder_hours = env::var("LYRICS_TOKEN_MONITOR_REMINDER_HOURS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(24);
        let alert_cooldown_secs = env::var("LYRICS_ALERT_COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(15 * 60);

        let storefront_cache_path = env::var("LYRICS_STOREFRONT_CACHE_PATH")
            .unwrap_or_else(|_| "./data/storefront-cache.json".to_string());
        let token_monitor_state_path = env::var("LYRICS_TOKEN_MONITOR_STATE_PATH")
            .unwrap_or_else(|_| "./data/token-monitor-state.json".to_string());
        let security_alert_webhook_url = env::var("SECURITY_ALERT_WEBHOOK_URL").ok();
        let security_alert_webhook_bearer = env::var("SECURITY_ALERT_WEBHOOK_BEARER").ok();

        Ok(Self {
            host,
            port,
            storefront_cache_path,
            token_monitor_state_path,
            security_alert_webhook_url,
            security_alert_webhook_bearer,
            core: CoreConfig {
                accounts,
                default_storefront,
                upstream_base_url,
                token_source_base_url,
                breaker_threshold,
                breaker_cooldown: Duration::from_secs(breaker_cooldown_secs),
                breaker_half_open_timeout: Duration::from_secs(breaker_half_open_timeout_secs),
                duration_delta_ms,
                min_similarity_score,
                health_check_interval: Duration::from_secs(health_check_interval_secs),
                token_monitor_interval: Duration::from_secs(token_monitor_interval_secs),
                token_monitor_warning_days,
                token_monitor_reminder_interval: Duration::from_secs(token_monitor_reminder_hours * 3600),
                alert_cooldown: Duration::from_secs(alert_cooldown_secs),
            },
        })
    }
}

/// Accounts are provided as `LYRICS_ACCOUNTS_JSON`, a JSON array of
/// `{name, user_token, storefront_code}` objects. Missing or malformed
/// input yields an empty pool (treated as a `ConfigMissing` failure by
/// the core on first use) rather than panicking at startup.
fn load_accounts() -> Result<Vec<AccountEntry>> {
    let raw = env::var("LYRICS_ACCOUNTS_JSON").context("LYRICS_ACCOUNTS_JSON must be set")?;

    #[derive(serde::Deserialize)]
    struct RawAccount {
        name: String,
        #[serde(default)]
        user_token: String,
        #[serde(default)]
        storefront_code: String,
    }

    let raw_accounts: Vec<RawAccount> =
        serde_json::from_str(&raw).context("LYRICS_ACCOUNTS_JSON must be a JSON array")?;

    Ok(raw_accounts
        .into_iter()
        .map(|a| AccountEntry {
            name: a.name,
            user_token: a.user_token,
            storefront_code: a.storefront_code,
        })
        .collect())
}
