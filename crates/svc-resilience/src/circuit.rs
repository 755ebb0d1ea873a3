//! Three-state circuit breaker, per logical client instance (spec.md
//! §4.1, §5). `allow`/`record_success`/`record_failure` are safe under
//! parallel callers; the lock is never held across an outbound call or
//! while notifying observers (spec.md §5 locking discipline).

use crate::config::CircuitBreakerConfig;
use svc_core::{CoreEvent, EventListener, EventListeners, ErrorKind, ServiceError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Emitted whenever the breaker moves between states.
#[derive(Debug, Clone)]
pub struct CircuitStateChanged {
    pub from: CircuitState,
    pub to: CircuitState,
    pub name: String,
    ts: Instant,
}

impl CoreEvent for CircuitStateChanged {
    fn event_type(&self) -> &'static str {
        "circuit_state_changed"
    }
    fn timestamp(&self) -> Instant {
        self.ts
    }
    fn source(&self) -> &str {
        &self.name
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    last_error: Option<String>,
}

/// Monotonic counters read without locking (spec.md §4.1 concurrency).
#[derive(Default)]
pub struct Metrics {
    pub total: AtomicU64,
    pub success: AtomicU64,
    pub failure: AtomicU64,
    pub retried: AtomicU64,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    pub metrics: Metrics,
    listeners: EventListeners<CircuitStateChanged>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                last_error: None,
            }),
            metrics: Metrics::default(),
            listeners: EventListeners::new(),
        }
    }

    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: EventListener<CircuitStateChanged> + 'static,
    {
        self.listeners.add(listener);
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Returns `Ok(())` if a call may proceed, or `CircuitOpen` if it must
    /// fail immediately. A stale `Open` circuit transitions to `HalfOpen`
    /// here, admitting exactly this one probe.
    pub fn allow(&self) -> Result<(), ServiceError> {
        self.metrics.total.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Closed => None,
                CircuitState::HalfOpen => None,
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::ZERO);
                    if elapsed >= self.config.open_timeout {
                        let from = inner.state;
                        inner.state = CircuitState::HalfOpen;
                        inner.success_count = 0;
                        Some((from, CircuitState::HalfOpen))
                    } else {
                        None
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }

        let still_open = matches!(self.state(), CircuitState::Open);
        if still_open {
            let retry_after = {
                let inner = self.inner.lock().unwrap();
                inner
                    .opened_at
                    .map(|t| self.config.open_timeout.saturating_sub(t.elapsed()))
            };
            return Err(ServiceError::CircuitOpen { retry_after });
        }
        Ok(())
    }

    pub fn record_success(&self) {
        self.metrics.success.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        let from = inner.state;
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.success_count = 0;
                        inner.opened_at = None;
                        Some((from, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        self.metrics.failure.fetch_add(1, Ordering::Relaxed);
        let error = error.into();

        let transition = {
            let mut inner = self.inner.lock().unwrap();
            inner.last_error = Some(error.clone());
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        let from = inner.state;
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        Some((from, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    let from = inner.state;
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.success_count = 0;
                    Some((from, CircuitState::Open))
                }
                CircuitState::Open => None,
            }
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    pub fn record_retry(&self) {
        self.metrics.retried.fetch_add(1, Ordering::Relaxed);
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        #[cfg(feature = "metrics")]
        metrics::gauge!("svc_resilience_circuit_state", "name" => self.name.clone()).set(match to {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        });
        tracing::info!(breaker = %self.name, from = from.as_str(), to = to.as_str(), "circuit breaker state change");
        if !self.listeners.is_empty() {
            self.listeners.emit(&CircuitStateChanged {
                from,
                to,
                name: self.name.clone(),
                ts: Instant::now(),
            });
        }
    }
}

/// A failure classified from a non-CircuitOpen [`ServiceError`]'s kind.
pub fn is_failure(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Transient)
}
