//! Periodic canary health check per account. Runs at startup and every
//! 24 hours thereafter; a canary 404 is interpreted as a stale
//! credential and disables the account permanently, any other error is
//! treated as transient.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::events::{Event, EventBus, EventKind};
use crate::pool::{Account, AccountPool};

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_checked: DateTime<Utc>,
    pub last_error: String,
}

/// Abstraction over "fetch the canary resource for this account",
/// implemented by the gateway's request pipeline so this module has no
/// direct HTTP dependency of its own.
#[async_trait]
pub trait CanaryFetcher: Send + Sync {
    async fn fetch_canary(&self, account: &Account) -> Result<(), String>;
}

pub struct HealthChecker {
    pool: Arc<AccountPool>,
    fetcher: Arc<dyn CanaryFetcher>,
    events: EventBus,
    interval: Duration,
    statuses: RwLock<HashMap<String, HealthStatus>>,
}

impl HealthChecker {
    pub fn new(
        pool: Arc<AccountPool>,
        fetcher: Arc<dyn CanaryFetcher>,
        events: EventBus,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(HealthChecker {
            pool,
            fetcher,
            events,
            interval,
            statuses: RwLock::new(HashMap::new()),
        })
    }

    pub async fn get_health_statuses(&self) -> HashMap<String, HealthStatus> {
        self.statuses.read().await.clone()
    }

    pub async fn run_sweep(&self, accounts: &[Account]) {
        let mut unhealthy = Vec::new();
        for account in accounts {
            if account.out_of_service() || self.pool.is_disabled(&account.name).await {
                continue;
            }
            let result = self.fetcher.fetch_canary(account).await;
            let status = match result {
                Ok(()) => HealthStatus {
                    healthy: true,
                    last_checked: Utc::now(),
                    last_error: String::new(),
                },
                Err(message) => {
                    if message.contains("404") {
                        self.pool.disable(account).await;
                    }
                    unhealthy.push(account.name.clone());
                    HealthStatus {
                        healthy: false,
                        last_checked: Utc::now(),
                        last_error: message,
                    }
                }
            };
            self.statuses.write().await.insert(account.name.clone(), status);
        }

        if !unhealthy.is_empty() {
            let events = self.events.clone();
            tokio::spawn(async move {
                events
                    .publish(
                        Event::new(EventKind::MUTHealthCheckFailed, "health sweep found unhealthy accounts")
                            .with("accounts", serde_json::to_value(unhealthy).unwrap_or_default()),
                    )
                    .await;
            });
        }
    }

    pub fn start(self: Arc<Self>, accounts: Vec<Account>) {
        tokio::spawn(async move {
            self.run_sweep(&accounts).await;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                self.run_sweep(&accounts).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedFetcher {
        calls: AtomicUsize,
        fail_with_404: bool,
    }

    #[async_trait]
    impl CanaryFetcher for ScriptedFetcher {
        async fn fetch_canary(&self, _account: &Account) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_404 {
                Err("upstream returned 404".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn account(name: &str) -> Account {
        Account {
            name: name.to_string(),
            user_token: "tok".to_string(),
            storefront_code: "us".to_string(),
        }
    }

    #[tokio::test]
    async fn success_marks_healthy() {
        let events = EventBus::new();
        let breaker = Arc::new(CircuitBreaker::new(
            "t",
            5,
            Duration::from_secs(1),
            Duration::from_secs(1),
            events.clone(),
        ));
        let pool = Arc::new(AccountPool::new(vec![account("a")], events.clone(), breaker));
        let fetcher = Arc::new(ScriptedFetcher { calls: AtomicUsize::new(0), fail_with_404: false });
        let checker = HealthChecker::new(pool, fetcher, events, Duration::from_secs(3600));

        checker.run_sweep(&[account("a")]).await;
        let statuses = checker.get_health_statuses().await;
        assert!(statuses.get("a").unwrap().healthy);
    }

    #[tokio::test]
    async fn already_disabled_account_is_not_reprobed() {
        let events = EventBus::new();
        let breaker = Arc::new(CircuitBreaker::new(
            "t",
            5,
            Duration::from_secs(1),
            Duration::from_secs(1),
            events.clone(),
        ));
        let pool = Arc::new(AccountPool::new(vec![account("a")], events.clone(), breaker));
        pool.disable(&account("a")).await;
        let fetcher = Arc::new(ScriptedFetcher { calls: AtomicUsize::new(0), fail_with_404: true });
        let checker = HealthChecker::new(pool, fetcher.clone(), events, Duration::from_secs(3600));

        checker.run_sweep(&[account("a")]).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(checker.get_health_statuses().await.is_empty());
    }

    #[tokio::test]
    async fn canary_404_disables_account() {
        let events = EventBus::new();
        let breaker = Arc::new(CircuitBreaker::new(
            "t",
            5,
            Duration::from_secs(1),
            Duration::from_secs(1),
            events.clone(),
        ));
        let pool = Arc::new(AccountPool::new(vec![account("a"), account("b")], events.clone(), breaker));
        let fetcher = Arc::new(ScriptedFetcher { calls: AtomicUsize::new(0), fail_with_404: true });
        let checker = HealthChecker::new(pool.clone(), fetcher, events, Duration::from_secs(3600));

        checker.run_sweep(&[account("a")]).await;
        assert_eq!(pool.next_account().await.unwrap().name, "b");
    }
}
