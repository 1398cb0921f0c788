//! In-process typed event bus. Threshold crossings in the breaker and
//! pool publish here; the alert handler (see [`crate::alerts`]) is the
//! primary subscriber, but anything can subscribe.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CircuitBreakerOpen,
    AllAccountsQuarantined,
    AccountAuthFailure,
    ServerStartupFailed,
    MUTHealthCheckFailed,
    HighFailureRate,
    HalfAccountsQuarantined,
    OneAwayFromQuarantine,
    CacheBackupFailed,
    CircuitBreakerRecovered,
    ServerStarted,
    CacheCleared,
}

impl EventKind {
    pub fn severity(self) -> Severity {
        use EventKind::*;
        match self {
            CircuitBreakerOpen | AllAccountsQuarantined | AccountAuthFailure
            | ServerStartupFailed | MUTHealthCheckFailed => Severity::Critical,
            HighFailureRate | HalfAccountsQuarantined | OneAwayFromQuarantine
            | CacheBackupFailed => Severity::Warning,
            CircuitBreakerRecovered | ServerStarted | CacheCleared => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn glyph(self) -> &'static str {
        match self {
            Severity::Critical => "\u{1f6a8}",
            Severity::Warning => "\u{26a0}\u{fe0f}",
            Severity::Info => "\u{2139}\u{fe0f}",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub payload: HashMap<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Event {
            kind,
            severity: kind.severity(),
            message: message.into(),
            timestamp: Utc::now(),
            payload: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

pub type Handler = Arc<dyn Fn(Event) + Send + Sync>;

/// Publishes events to subscribers concurrently: every handler invocation
/// runs in its own task so a slow subscriber never blocks the publisher
/// or other subscribers.
#[derive(Default, Clone)]
pub struct EventBus {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    by_kind: HashMap<EventKind, Vec<Handler>>,
    all: Vec<Handler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, kind: EventKind, handler: Handler) {
        let mut inner = self.inner.write().await;
        inner.by_kind.entry(kind).or_default().push(handler);
    }

    pub async fn subscribe_all(&self, handler: Handler) {
        let mut inner = self.inner.write().await;
        inner.all.push(handler);
    }

    pub async fn publish(&self, event: Event) {
        let inner = self.inner.read().await;
        let mut handlers: Vec<Handler> = inner
            .by_kind
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();
        handlers.extend(inner.all.iter().cloned());
        drop(inner);

        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                handler(event);
            });
        }
    }
}
