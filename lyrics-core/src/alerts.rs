//! Cooldown-gated alert dispatch. Subscribes to every event on the bus
//! and fans formatted notifications out to each configured [`Notifier`]
//! sink. Grounded on the teacher's `AppState::maybe_alert_rate_limit`
//! (`Arc<Mutex<HashMap<_, Instant>>>` cooldown map).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use crate::events::{Event, EventBus, EventKind};
use crate::notifier::Notifier;

pub struct AlertHandler {
    cooldown: Duration,
    last_alert: Mutex<HashMap<EventKind, Instant>>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl AlertHandler {
    pub fn new(cooldown: Duration, notifiers: Vec<Arc<dyn Notifier>>) -> Arc<Self> {
        Arc::new(AlertHandler {
            cooldown,
            last_alert: Mutex::new(HashMap::new()),
            notifiers,
        })
    }

    /// Registers this handler as a wildcard subscriber on the bus.
    pub async fn attach(self: &Arc<Self>, bus: &EventBus) {
        let handler = self.clone();
        bus.subscribe_all(Arc::new(move |event: Event| {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler.handle(event).await;
            });
        }))
        .await;
    }

    async fn should_fire(&self, kind: EventKind) -> bool {
        let mut last_alert = self.last_alert.lock().await;
        let now = Instant::now();
        let fire = match last_alert.get(&kind) {
            Some(last) => now.duration_since(*last) >= self.cooldown,
            None => true,
        };
        if fire {
            last_alert.insert(kind, now);
        }
        fire
    }

    async fn handle(&self, event: Event) {
        if !self.should_fire(event.kind).await {
            return;
        }
        let subject = format!("{} {:?}", event.severity.glyph(), event.kind);
        let body = format_body(&event);
        for notifier in &self.notifiers {
            if let Err(err) = notifier.send(&subject, &body).await {
                warn!(error = %err, "notifier sink failed");
            }
        }
    }
}

fn format_body(event: &Event) -> String {
    let mut body = format!("{}\ntime: {}", event.message, event.timestamp.to_rfc3339());
    for (key, value) in &event.payload {
        body.push_str(&format!("\n{key}: {value}"));
    }
    body
}
