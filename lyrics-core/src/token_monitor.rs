//! Periodic scan of per-account JWT expiry, with a small on-disk state
//! file to deduplicate alerts across process restarts.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AccountEntry;
use crate::events::{Event, EventBus, EventKind};
use crate::jwt::decode_expiry;

#[derive(Debug, Serialize, Deserialize, Default)]
struct MonitorState {
    last_notification_sent: Option<DateTime<Utc>>,
    last_days_remaining: Option<i64>,
}

pub struct TokenExpiryMonitor {
    accounts: Vec<AccountEntry>,
    state_path: PathBuf,
    warning_days: i64,
    reminder_interval: Duration,
    events: EventBus,
}

impl TokenExpiryMonitor {
    pub fn new(
        accounts: Vec<AccountEntry>,
        state_path: PathBuf,
        warning_days: i64,
        reminder_interval: Duration,
        events: EventBus,
    ) -> Self {
        TokenExpiryMonitor {
            accounts,
            state_path,
            warning_days,
            reminder_interval,
            events,
        }
    }

    async fn load_state(&self) -> MonitorState {
        match tokio::fs::read(&self.state_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => MonitorState::default(),
        }
    }

    async fn save_state(&self, state: &MonitorState) {
        if let Ok(bytes) = serde_json::to_vec_pretty(state) {
            if let Err(err) = tokio::fs::write(&self.state_path, bytes).await {
                warn!(error = %err, "failed to persist token monitor state");
            }
        }
    }

    pub async fn run_check(&self) {
        let now = Utc::now();
        let mut min_days: Option<i64> = None;
        for account in &self.accounts {
            if account.user_token.is_empty() {
                continue;
            }
            if let Some(expiry) = decode_expiry(&account.user_token) {
                let days = (expiry - now).num_days();
                min_days = Some(min_days.map_or(days, |m: i64| m.min(days)));
            }
        }

        let Some(days_remaining) = min_days else { return };
        if days_remaining > self.warning_days {
            return;
        }

        let mut state = self.load_state().await;
        let changed = state.last_days_remaining != Some(days_remaining);
        let due = state
            .last_notification_sent
            .map(|last| now - last >= chrono::Duration::from_std(self.reminder_interval).unwrap())
            .unwrap_or(true);

        if changed || due {
            let events = self.events.clone();
            tokio::spawn(async move {
                events
                    .publish(
                        Event::new(
                            EventKind::HighFailureRate,
                            format!("account credential(s) expiring in {days_remaining} day(s)"),
                        )
                        .with("days_remaining", days_remaining),
                    )
                    .await;
            });
            state.last_notification_sent = Some(now);
            state.last_days_remaining = Some(days_remaining);
            self.save_state(&state).await;
        }
    }

    pub fn start(self: std::sync::Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            self.run_check().await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_check().await;
            }
        });
    }
}
