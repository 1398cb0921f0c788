//! Core-facing configuration shapes. The gateway binary loads these from
//! the environment (see `lyrics_gateway::config::GatewayConfig`) and
//! passes them in, so the core crate itself never touches `std::env`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AccountEntry {
    pub name: String,
    pub user_token: String,
    pub storefront_code: String,
}

impl AccountEntry {
    pub fn out_of_service(&self) -> bool {
        self.user_token.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub accounts: Vec<AccountEntry>,
    pub default_storefront: String,
    pub upstream_base_url: String,
    pub token_source_base_url: String,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub breaker_half_open_timeout: Duration,
    pub duration_delta_ms: i64,
    pub min_similarity_score: f64,
    pub health_check_interval: Duration,
    pub token_monitor_interval: Duration,
    pub token_monitor_warning_days: i64,
    pub token_monitor_reminder_interval: Duration,
    pub alert_cooldown: Duration,
}
