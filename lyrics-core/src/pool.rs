//! Round-robin account pool with temporary quarantine and permanent
//! disable, grounded on `other_examples`' `anthropic-pool`'s `Pool`
//! (`AccountStatus`, atomic cursor, write-locked status transitions),
//! generalized to the exact selection/fallback/threshold algorithm in
//! the design doc.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::AccountEntry;
use crate::events::{Event, EventBus, EventKind};

const QUARANTINE_DURATION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct Account {
    pub name: String,
    pub user_token: String,
    pub storefront_code: String,
}

impl Account {
    pub fn out_of_service(&self) -> bool {
        self.user_token.is_empty()
    }
}

impl From<&AccountEntry> for Account {
    fn from(entry: &AccountEntry) -> Self {
        Account {
            name: entry.name.clone(),
            user_token: entry.user_token.clone(),
            storefront_code: entry.storefront_code.clone(),
        }
    }
}

pub struct AccountPool {
    accounts: Vec<Account>,
    cursor: AtomicU64,
    /// account index -> quarantine expiry, epoch seconds
    quarantine: RwLock<HashMap<usize, u64>>,
    disabled: Mutex<HashSet<String>>,
    events: EventBus,
    breaker: Arc<CircuitBreaker>,
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl AccountPool {
    pub fn new(accounts: Vec<Account>, events: EventBus, breaker: Arc<CircuitBreaker>) -> Self {
        AccountPool {
            accounts,
            cursor: AtomicU64::new(0),
            quarantine: RwLock::new(HashMap::new()),
            disabled: Mutex::new(HashSet::new()),
            events,
            breaker,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub async fn is_disabled(&self, name: &str) -> bool {
        self.disabled.lock().await.contains(name)
    }

    async fn is_quarantined(&self, index: usize, now: u64) -> bool {
        self.quarantine
            .read()
            .await
            .get(&index)
            .map(|expiry| *expiry > now)
            .unwrap_or(false)
    }

    /// Round-robin selection with quarantine/disable skip and a
    /// least-bad fallback when no account is immediately available.
    pub async fn next_account(&self) -> Option<Account> {
        if self.accounts.is_empty() {
            return None;
        }
        let now = now_epoch();
        let len = self.accounts.len() as u64;

        for _ in 0..len {
            let idx = (self.cursor.fetch_add(1, Ordering::Relaxed) % len) as usize;
            let account = &self.accounts[idx];
            if self.is_disabled(&account.name).await {
                continue;
            }
            if self.is_quarantined(idx, now).await {
                continue;
            }
            return Some(account.clone());
        }

        // Fallback: account with the earliest quarantine recovery among
        // non-disabled accounts.
        let quarantine = self.quarantine.read().await;
        let disabled = self.disabled.lock().await;
        let mut best: Option<(usize, u64)> = None;
        for (idx, account) in self.accounts.iter().enumerate() {
            if disabled.contains(&account.name) {
                continue;
            }
            let remaining = quarantine.get(&idx).map(|e| e.saturating_sub(now)).unwrap_or(0);
            match best {
                Some((_, best_remaining)) if best_remaining <= remaining => {}
                _ => best = Some((idx, remaining)),
            }
        }
        best.map(|(idx, _)| self.accounts[idx].clone())
    }

    pub async fn quarantine(&self, account: &Account) {
        if let Some(idx) = self.accounts.iter().position(|a| a.name == account.name) {
            let expiry = now_epoch() + QUARANTINE_DURATION.as_secs();
            self.quarantine.write().await.insert(idx, expiry);
            warn!(account = %account.name, "account quarantined");
            self.check_thresholds().await;
        }
    }

    pub async fn clear_quarantine(&self, account: &Account) {
        if let Some(idx) = self.accounts.iter().position(|a| a.name == account.name) {
            self.quarantine.write().await.remove(&idx);
        }
    }

    pub async fn disable(&self, account: &Account) {
        self.disabled.lock().await.insert(account.name.clone());
        if let Some(idx) = self.accounts.iter().position(|a| a.name == account.name) {
            // disable dominates: a disabled account must never linger in
            // the quarantine map under its index.
            self.quarantine.write().await.remove(&idx);
        }
        warn!(account = %account.name, "account disabled");
        self.check_thresholds().await;
    }

    pub async fn available_count(&self) -> usize {
        let now = now_epoch();
        let disabled = self.disabled.lock().await;
        let quarantine = self.quarantine.read().await;
        self.accounts
            .iter()
            .enumerate()
            .filter(|(idx, account)| {
                !disabled.contains(&account.name)
                    && !quarantine.get(idx).map(|e| *e > now).unwrap_or(false)
            })
            .count()
    }

    pub async fn disabled_count(&self) -> usize {
        self.disabled.lock().await.len()
    }

    pub async fn quarantined_count(&self) -> usize {
        let now = now_epoch();
        self.quarantine
            .read()
            .await
            .values()
            .filter(|expiry| **expiry > now)
            .count()
    }

    pub async fn out_of_service_names(&self) -> Vec<String> {
        self.accounts
            .iter()
            .filter(|a| a.out_of_service())
            .map(|a| a.name.clone())
            .collect()
    }

    async fn check_thresholds(&self) {
        let total = self.accounts.len();
        if total == 0 {
            return;
        }
        let available = self.available_count().await;
        let quarantined = total - available;

        if quarantined == total {
            info!("all accounts quarantined or disabled, forcing breaker open");
            let events = self.events.clone();
            let snapshot = self.quarantine_snapshot().await;
            let out_of_service = self.out_of_service_names().await;
            tokio::spawn(async move {
                events
                    .publish(
                        Event::new(EventKind::AllAccountsQuarantined, "all accounts quarantined")
                            .with("remaining", serde_json::to_value(snapshot).unwrap_or_default())
                            .with("out_of_service", serde_json::to_value(out_of_service).unwrap_or_default()),
                    )
                    .await;
            });
            self.breaker.force_open_by_external_signal().await;
        } else if quarantined == total - 1 {
            if let Some(name) = self.sole_available_name().await {
                let events = self.events.clone();
                tokio::spawn(async move {
                    events
                        .publish(
                            Event::new(
                                EventKind::OneAwayFromQuarantine,
                                format!("only {name} remains available"),
                            )
                            .with("account", name),
                        )
                        .await;
                });
            }
        } else if quarantined > 0 && quarantined >= total / 2 {
            let events = self.events.clone();
            tokio::spawn(async move {
                events
                    .publish(Event::new(
                        EventKind::HalfAccountsQuarantined,
                        "half or more of the pool is quarantined",
                    ))
                    .await;
            });
        }
    }

    async fn sole_available_name(&self) -> Option<String> {
        let now = now_epoch();
        let disabled = self.disabled.lock().await;
        let quarantine = self.quarantine.read().await;
        self.accounts
            .iter()
            .enumerate()
            .find(|(idx, account)| {
                !disabled.contains(&account.name)
                    && !quarantine.get(idx).map(|e| *e > now).unwrap_or(false)
            })
            .map(|(_, account)| account.name.clone())
    }

    async fn quarantine_snapshot(&self) -> HashMap<String, u64> {
        let now = now_epoch();
        let quarantine = self.quarantine.read().await;
        quarantine
            .iter()
            .filter_map(|(idx, expiry)| {
                self.accounts
                    .get(*idx)
                    .map(|a| (a.name.clone(), expiry.saturating_sub(now)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn account(name: &str) -> Account {
        Account {
            name: name.to_string(),
            user_token: "tok".to_string(),
            storefront_code: "us".to_string(),
        }
    }

    async fn pool(names: &[&str]) -> AccountPool {
        let events = EventBus::new();
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            5,
            StdDuration::from_secs(1),
            StdDuration::from_secs(1),
            events.clone(),
        ));
        AccountPool::new(names.iter().map(|n| account(n)).collect(), events, breaker)
    }

    #[tokio::test]
    async fn round_robin_cycles_through_all_accounts() {
        let p = pool(&["a", "b", "c"]).await;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(p.next_account().await.unwrap().name);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn quarantined_account_is_skipped() {
        let p = pool(&["a", "b"]).await;
        let a = account("a");
        p.quarantine(&a).await;
        for _ in 0..4 {
            assert_eq!(p.next_account().await.unwrap().name, "b");
        }
    }

    #[tokio::test]
    async fn disabled_account_never_returned() {
        let p = pool(&["a", "b"]).await;
        p.disable(&account("a")).await;
        for _ in 0..4 {
            assert_eq!(p.next_account().await.unwrap().name, "b");
        }
    }

    #[tokio::test]
    async fn disable_clears_any_existing_quarantine_entry() {
        let p = pool(&["a", "b"]).await;
        p.quarantine(&account("a")).await;
        assert_eq!(p.quarantined_count().await, 1);
        p.disable(&account("a")).await;
        // disable dominates: the quarantine map must not still carry an
        // entry for the now-disabled account's index.
        assert_eq!(p.quarantined_count().await, 0);
        assert_eq!(p.disabled_count().await, 1);
    }

    #[tokio::test]
    async fn all_quarantined_trips_breaker() {
        let p = pool(&["a"]).await;
        p.quarantine(&account("a")).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(p.breaker.is_open().await);
    }
}
