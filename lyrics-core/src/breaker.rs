//! Three-state circuit breaker. State transitions follow the table in
//! the design doc; the tri-state is modeled as a tagged enum carrying
//! its own timestamps rather than an enum plus parallel `Option<Instant>`
//! fields, per the pattern in `other_examples`' `resilient_client.rs`.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::events::{Event, EventBus, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { last_failure: Instant },
    HalfOpen { started: Instant },
}

struct Inner {
    state: CircuitState,
    failures: u32,
    threshold: u32,
}

pub struct CircuitBreaker {
    name: String,
    cooldown: Duration,
    half_open_timeout: Duration,
    inner: Mutex<Inner>,
    events: EventBus,
}

pub enum Admission {
    Admitted,
    Refused { retry_after: Duration },
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration, half_open_timeout: Duration, events: EventBus) -> Self {
        CircuitBreaker {
            name: name.into(),
            cooldown,
            half_open_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                threshold: threshold.max(1),
            }),
            events,
        }
    }

    /// Pool-size-aware sensitivity: `threshold = max(5, pool_size * 2)`.
    pub async fn scale_threshold(&self, pool_size: usize) {
        let mut inner = self.inner.lock().await;
        inner.threshold = (pool_size as u32 * 2).max(5);
    }

    pub async fn allow(&self) -> Admission {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::HalfOpen { started } => {
                if started.elapsed() >= self.half_open_timeout {
                    inner.state = CircuitState::Open { last_failure: Instant::now() };
                    Admission::Refused { retry_after: self.cooldown }
                } else {
                    Admission::Refused { retry_after: Duration::from_secs(0) }
                }
            }
            CircuitState::Open { last_failure } => {
                let elapsed = last_failure.elapsed();
                if elapsed >= self.cooldown {
                    inner.state = CircuitState::HalfOpen { started: Instant::now() };
                    Admission::Admitted
                } else {
                    Admission::Refused { retry_after: self.cooldown - elapsed }
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen { .. } => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                info!(breaker = %self.name, "circuit breaker recovered");
                let events = self.events.clone();
                let name = self.name.clone();
                tokio::spawn(async move {
                    events
                        .publish(Event::new(
                            EventKind::CircuitBreakerRecovered,
                            format!("breaker {name} recovered"),
                        ))
                        .await;
                });
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                let near_threshold = ((3 * inner.threshold) as f64 / 5.0).ceil().max(2.0) as u32;
                if inner.failures >= inner.threshold {
                    inner.state = CircuitState::Open { last_failure: Instant::now() };
                    warn!(breaker = %self.name, failures = inner.failures, "circuit breaker opened");
                    self.publish_open();
                } else if inner.failures == near_threshold {
                    self.publish_high_failure_rate(inner.failures, inner.threshold);
                }
            }
            CircuitState::HalfOpen { .. } => {
                inner.state = CircuitState::Open { last_failure: Instant::now() };
                warn!(breaker = %self.name, "half-open probe failed, reopening");
                self.publish_open();
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Used by the account pool to force the breaker open when every
    /// account has been quarantined: records failures until the
    /// threshold is crossed, so the normal transition logic applies.
    pub async fn force_open_by_external_signal(&self) {
        loop {
            let should_continue = {
                let inner = self.inner.lock().await;
                !matches!(inner.state, CircuitState::Open { .. })
            };
            if !should_continue {
                break;
            }
            self.record_failure().await;
        }
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.failures = 0;
    }

    pub async fn time_until_retry(&self) -> Duration {
        let inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Open { last_failure } => {
                self.cooldown.saturating_sub(last_failure.elapsed())
            }
            CircuitState::HalfOpen { started } => {
                self.half_open_timeout.saturating_sub(started.elapsed())
            }
            CircuitState::Closed => Duration::from_secs(0),
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(self.inner.lock().await.state, CircuitState::Open { .. })
    }

    fn publish_open(&self) {
        let events = self.events.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            events
                .publish(Event::new(
                    EventKind::CircuitBreakerOpen,
                    format!("breaker {name} opened"),
                ))
                .await;
        });
    }

    fn publish_high_failure_rate(&self, failures: u32, threshold: u32) {
        let events = self.events.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            events
                .publish(
                    Event::new(
                        EventKind::HighFailureRate,
                        format!("breaker {name} approaching threshold ({failures}/{threshold})"),
                    )
                    .with("failures", failures)
                    .with("threshold", threshold),
                )
                .await;
        });
    }
}
