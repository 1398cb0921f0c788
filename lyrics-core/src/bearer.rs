//! Shared bearer token manager: scrapes a JWT out of a storefront's web
//! bundle, caches it, and refreshes it under a double-checked lock.
//! Directly grounded on `other_examples`' `credential_cache.rs`
//! (`get_valid_credentials` / `refresh_credentials` double-check
//! pattern).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::jwt::decode_expiry;
use crate::stats::{NoopStats, Stats};

const REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);
const BUNDLE_PATH_PATTERN: &str = r#"/assets/index[~-][A-Za-z0-9]+\.js"#;
const JWT_PATTERN: &str = r#"eyJhbGciOiJFUzI1NiIsInR5cCI6IkpXVCIsImtpZCI6[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+"#;
const FALLBACK_JWT_PATTERN: &str = r#"[A-Za-z0-9_\-]{20,}\.[A-Za-z0-9_\-]{20,}\.[A-Za-z0-9_\-]{20,}"#;

static BUNDLE_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(BUNDLE_PATH_PATTERN).unwrap());
static JWT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(JWT_PATTERN).unwrap());
static FALLBACK_JWT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(FALLBACK_JWT_PATTERN).unwrap());

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expiry: DateTime<Utc>,
}

pub struct TokenStatus {
    pub expiry: DateTime<Utc>,
    pub remaining: Duration,
    pub needs_refresh: bool,
}

pub struct BearerTokenManager {
    inner: RwLock<Option<CachedToken>>,
    client: reqwest::Client,
    source_base_url: String,
    default_storefront: String,
    stats: Arc<dyn Stats>,
}

impl BearerTokenManager {
    pub fn new(client: reqwest::Client, source_base_url: String, default_storefront: String) -> Self {
        BearerTokenManager {
            inner: RwLock::new(None),
            client,
            source_base_url,
            default_storefront,
            stats: Arc::new(NoopStats),
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn Stats>) -> Self {
        self.stats = stats;
        self
    }

    /// Returns the cached token if it has more than `REFRESH_THRESHOLD`
    /// left on its expiry, otherwise refreshes synchronously.
    pub async fn get_bearer_token(&self) -> Result<String, CoreError> {
        if let Some(token) = self.fresh_cached().await {
            return Ok(token);
        }
        self.refresh().await
    }

    async fn fresh_cached(&self) -> Option<String> {
        let guard = self.inner.read().await;
        guard.as_ref().and_then(|cached| {
            if is_fresh(cached.expiry) {
                Some(cached.token.clone())
            } else {
                None
            }
        })
    }

    pub async fn get_token_status(&self) -> Option<TokenStatus> {
        let guard = self.inner.read().await;
        guard.as_ref().map(|cached| {
            let remaining = (cached.expiry - Utc::now()).to_std().unwrap_or_default();
            TokenStatus {
                expiry: cached.expiry,
                remaining,
                needs_refresh: !is_fresh(cached.expiry),
            }
        })
    }

    async fn refresh(&self) -> Result<String, CoreError> {
        let mut guard = self.inner.write().await;
        // Double-check: another task may have refreshed while we waited
        // for the write lock.
        if let Some(cached) = guard.as_ref() {
            if is_fresh(cached.expiry) {
                return Ok(cached.token.clone());
            }
        }

        let (token, expiry) = match self.scrape().await {
            Ok(pair) => pair,
            Err(err) => {
                self.stats.record_bearer_refresh_failure("scrape").await;
                return Err(err);
            }
        };
        info!(expiry = %expiry, "bearer token refreshed");
        guard.replace(CachedToken { token: token.clone(), expiry });
        Ok(token)
    }

    async fn scrape(&self) -> Result<(String, DateTime<Utc>), CoreError> {
        let browse_url = format!("{}/{}/browse", self.source_base_url, self.default_storefront);
        let browse_body = self
            .client
            .get(&browse_url)
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await
            .map_err(|e| CoreError::upstream(&e))?
            .error_for_status()
            .map_err(|e| CoreError::upstream(&e))?
            .text()
            .await
            .map_err(|e| CoreError::upstream(&e))?;

        let bundle_path = BUNDLE_PATH_RE
            .find(&browse_body)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| CoreError::ConfigMissing("could not locate bundle path in browse page".into()))?;

        let bundle_url = format!("{}{}", self.source_base_url, bundle_path);
        let bundle_body = self
            .client
            .get(&bundle_url)
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await
            .map_err(|e| CoreError::upstream(&e))?
            .error_for_status()
            .map_err(|e| CoreError::upstream(&e))?
            .text()
            .await
            .map_err(|e| CoreError::upstream(&e))?;

        let token = JWT_RE
            .find(&bundle_body)
            .or_else(|| FALLBACK_JWT_RE.find(&bundle_body))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| CoreError::ConfigMissing("could not locate bearer token in bundle".into()))?;

        let expiry = decode_expiry(&token).unwrap_or_else(|| {
            warn!("bearer token had no exp claim, defaulting expiry to +1h");
            Utc::now() + chrono::Duration::hours(1)
        });

        Ok((token, expiry))
    }

    /// Spawns a cooperative background task that checks for staleness
    /// once a minute and refreshes proactively, so request-path callers
    /// rarely pay the scrape latency.
    pub fn start_background_monitor(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let needs_refresh = self
                    .get_token_status()
                    .await
                    .map(|s| s.needs_refresh)
                    .unwrap_or(true);
                if needs_refresh {
                    if let Err(err) = self.refresh().await {
                        warn!(error = %err, "background bearer refresh failed");
                    }
                }
            }
        });
    }
}

fn is_fresh(expiry: DateTime<Utc>) -> bool {
    expiry - Utc::now() > chrono::Duration::from_std(REFRESH_THRESHOLD).unwrap()
}
