//! Circuit breaker for external service calls.
//!
//! Gates calls to each external service and short-circuits when the service
//! is visibly unhealthy. Closed passes calls through and counts consecutive
//! failures; open fails fast; half-open admits a single probe.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Public view of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Error returned by a guarded call.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker is open; the service was not called.
    #[error("Service {service} is unavailable (circuit open)")]
    Open { service: String },

    /// The underlying call failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before a probe is allowed
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum InnerState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Per-service failure-tracking gate.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    state: RwLock<InnerState>,
    last_failure: RwLock<Option<DateTime<Utc>>>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            state: RwLock::new(InnerState::Closed {
                consecutive_failures: 0,
            }),
            last_failure: RwLock::new(None),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Check whether a call may proceed, transitioning open -> half_open
    /// once the cooldown has elapsed. In half-open only one probe passes.
    fn allow(&self) -> bool {
        let mut state = self.state.write().unwrap();
        match *state {
            InnerState::Closed { .. } => true,
            InnerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.cooldown {
                    info!(service = %self.service, "Circuit half-open, allowing probe");
                    *state = InnerState::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            InnerState::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    false
                } else {
                    *state = InnerState::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                }
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            InnerState::HalfOpen { .. } => {
                info!(service = %self.service, "Probe succeeded, circuit closed");
                *state = InnerState::Closed {
                    consecutive_failures: 0,
                };
            }
            InnerState::Closed { .. } => {
                *state = InnerState::Closed {
                    consecutive_failures: 0,
                };
            }
            InnerState::Open { .. } => {}
        }
    }

    fn on_failure(&self) {
        *self.last_failure.write().unwrap() = Some(Utc::now());

        let mut state = self.state.write().unwrap();
        match *state {
            InnerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        failures,
                        "Failure threshold reached, circuit open"
                    );
                    *state = InnerState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    *state = InnerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            InnerState::HalfOpen { .. } => {
                warn!(service = %self.service, "Probe failed, circuit re-opened");
                *state = InnerState::Open {
                    opened_at: Instant::now(),
                };
            }
            InnerState::Open { .. } => {}
        }
    }

    /// Run `op` under the breaker.
    ///
    /// Timeouts must surface as errors from `op` so they count as failures.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(CircuitError::Open {
                service: self.service.clone(),
            });
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Current state for health reporting. May observe one stale transition.
    pub fn state(&self) -> CircuitState {
        match *self.state.read().unwrap() {
            InnerState::Closed { .. } => CircuitState::Closed,
            InnerState::Open { opened_at } => {
                // Report half-open once the cooldown has passed, even if no
                // probe has arrived yet.
                if opened_at.elapsed() >= self.config.cooldown {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            InnerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        *self.last_failure.read().unwrap()
    }
}
