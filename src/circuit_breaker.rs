//! Per-service circuit breaker.
//!
//! Each service name gets its own lazily created state record in a sharded
//! concurrent map, so a failing provider never affects the others.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    config::CircuitBreakerConfig,
    errors::{ConfigError, ResilienceError},
};

const EVENT_CAPACITY: usize = 256;

/// Circuit breaker state machine.
///
/// Transitions between states based on consecutive outcomes:
/// - `Closed` -> `Open`: failure count reaches `failure_threshold`
/// - `Open` -> `HalfOpen`: first call after `reset_timeout` since the last failure
/// - `HalfOpen` -> `Closed`: `success_threshold` consecutive successes
/// - `HalfOpen` -> `Open`: any failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation, requests are allowed through.
    Closed,
    /// Failures exceeded threshold, requests are blocked.
    Open,
    /// Recovery mode, a limited number of trial requests are allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Notification published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitEvent {
    StateChanged {
        service: String,
        from: CircuitState,
        to: CircuitState,
    },
}

/// Read-only copy of one service's circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure: Option<Instant>,
}

/// Aggregate view across all tracked services.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircuitMetrics {
    pub services: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug)]
struct ServiceCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    /// Bumped on every transition; outcomes from an older generation are dropped.
    generation: u64,
    half_open_in_flight: u32,
}

impl ServiceCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            generation: 0,
            half_open_in_flight: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) -> (CircuitState, CircuitState) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
        if to == CircuitState::Closed {
            self.consecutive_failures = 0;
        }
        (from, to)
    }

    fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            last_failure: self.last_failure,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Admission {
    generation: u64,
    trial: bool,
}

enum Outcome {
    Success,
    Failure,
    Neutral,
}

/// Releases a half-open trial slot if the guarded call is dropped before it settles.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    service: &'a str,
    admission: Admission,
    settled: bool,
}

impl AdmissionGuard<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.service, self.admission, outcome);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker
                .record(self.service, self.admission, Outcome::Neutral);
        }
    }
}

/// Per-service fault isolation.
///
/// Calls for a service pass through while its circuit is closed, are rejected
/// with [`ResilienceError::CircuitOpen`] without running while it is open, and are
/// admitted as limited trials once `reset_timeout` has elapsed since the last
/// failure.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    services: DashMap<String, ServiceCircuit>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    events: broadcast::Sender<CircuitEvent>,
}

impl CircuitBreaker {
    /// # Errors
    /// Returns [`ConfigError`] if any threshold or timeout is zero.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            services: DashMap::new(),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            events,
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    /// Runs `f` under the circuit for `service`.
    ///
    /// Errors returned by `f` are counted and handed back unchanged.
    ///
    /// # Errors
    /// [`ResilienceError::CircuitOpen`] if the circuit rejects the call, in which
    /// case `f` is never invoked; otherwise whatever `f` returns.
    pub async fn execute<T, F, Fut>(&self, service: &str, f: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let admission = self.admit(service)?;
        let guard = AdmissionGuard {
            breaker: self,
            service,
            admission,
            settled: false,
        };

        let result = f().await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if e.is_service_failure() => Outcome::Failure,
            Err(_) => Outcome::Neutral,
        };
        guard.settle(outcome);
        result
    }

    /// Current state of `service`, `Closed` if it has never been called.
    pub fn state(&self, service: &str) -> CircuitState {
        self.services
            .get(service)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    /// Whether a call for `service` made now would be rejected without a trial.
    pub fn is_rejecting(&self, service: &str) -> bool {
        let now = Instant::now();
        self.services.get(service).is_some_and(|circuit| {
            circuit.state == CircuitState::Open
                && circuit.last_failure.is_some_and(|at| {
                    now.saturating_duration_since(at) < self.config.reset_timeout
                })
        })
    }

    pub fn service_state(&self, service: &str) -> Option<ServiceSnapshot> {
        self.services.get(service).map(|c| c.snapshot())
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let mut metrics = CircuitMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            ..CircuitMetrics::default()
        };

        for circuit in self.services.iter() {
            metrics.services += 1;
            match circuit.state {
                CircuitState::Closed => metrics.closed += 1,
                CircuitState::Open => metrics.open += 1,
                CircuitState::HalfOpen => metrics.half_open += 1,
            }
        }
        metrics
    }

    /// Forces `service` back to a fresh closed circuit.
    pub fn reset_service(&self, service: &str) {
        let change = self.services.get_mut(service).and_then(|mut circuit| {
            let from = circuit.state;
            circuit.transition(CircuitState::Closed);
            circuit.last_failure = None;
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        });

        if let Some((from, to)) = change {
            self.publish(service, from, to);
        }
    }

    fn admit(&self, service: &str) -> Result<Admission, ResilienceError> {
        let now = Instant::now();
        let mut change = None;

        let admitted = self.with_circuit(service, |circuit| match circuit.state {
            CircuitState::Closed => Ok(Admission {
                generation: circuit.generation,
                trial: false,
            }),
            CircuitState::Open => {
                let since_failure = circuit
                    .last_failure
                    .map_or(self.config.reset_timeout, |at| now.saturating_duration_since(at));
                if since_failure < self.config.reset_timeout {
                    return Err(self.config.reset_timeout - since_failure);
                }
                change = Some(circuit.transition(CircuitState::HalfOpen));
                circuit.half_open_in_flight = 1;
                Ok(Admission {
                    generation: circuit.generation,
                    trial: true,
                })
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_in_flight >= self.config.half_open_max_calls {
                    return Err(Duration::ZERO);
                }
                circuit.half_open_in_flight += 1;
                Ok(Admission {
                    generation: circuit.generation,
                    trial: true,
                })
            }
        });

        if let Some((from, to)) = change {
            self.publish(service, from, to);
        }

        admitted.map_err(|retry_after| {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(service, ?retry_after, "circuit breaker rejected call");
            ResilienceError::CircuitOpen {
                service: service.to_string(),
                retry_after,
            }
        })
    }

    fn record(&self, service: &str, admission: Admission, outcome: Outcome) {
        let now = Instant::now();
        let change = self.services.get_mut(service).and_then(|mut circuit| {
            if circuit.generation != admission.generation {
                return None;
            }
            match outcome {
                Outcome::Success => self.successes.fetch_add(1, Ordering::Relaxed),
                Outcome::Failure => self.failures.fetch_add(1, Ordering::Relaxed),
                Outcome::Neutral => 0,
            };
            if admission.trial {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
            }

            match (circuit.state, outcome) {
                (_, Outcome::Neutral) | (CircuitState::Open, _) => None,
                (CircuitState::Closed, Outcome::Success) => {
                    circuit.consecutive_failures = 0;
                    None
                }
                (CircuitState::Closed, Outcome::Failure) => {
                    let stale = circuit.last_failure.is_some_and(|at| {
                        now.saturating_duration_since(at) > self.config.monitoring_period
                    });
                    if stale {
                        circuit.consecutive_failures = 0;
                    }
                    circuit.consecutive_failures += 1;
                    circuit.last_failure = Some(now);

                    (circuit.consecutive_failures >= self.config.failure_threshold)
                        .then(|| circuit.transition(CircuitState::Open))
                }
                (CircuitState::HalfOpen, Outcome::Success) => {
                    circuit.consecutive_successes += 1;
                    (circuit.consecutive_successes >= self.config.success_threshold)
                        .then(|| circuit.transition(CircuitState::Closed))
                }
                (CircuitState::HalfOpen, Outcome::Failure) => {
                    circuit.last_failure = Some(now);
                    Some(circuit.transition(CircuitState::Open))
                }
            }
        });

        if let Some((from, to)) = change {
            self.publish(service, from, to);
        }
    }

    fn with_circuit<R>(&self, service: &str, f: impl FnOnce(&mut ServiceCircuit) -> R) -> R {
        if let Some(mut circuit) = self.services.get_mut(service) {
            return f(&mut circuit);
        }
        let mut circuit = self
            .services
            .entry(service.to_string())
            .or_insert_with(ServiceCircuit::new);
        f(&mut circuit)
    }

    fn publish(&self, service: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(
                service,
                %from,
                threshold = self.config.failure_threshold,
                "circuit breaker opened"
            ),
            CircuitState::HalfOpen => {
                warn!(service, "circuit breaker transitioning to half-open state")
            }
            CircuitState::Closed => info!(service, %from, "circuit breaker closed"),
        }

        let _ = self.events.send(CircuitEvent::StateChanged {
            service: service.to_string(),
            from,
            to,
        });
    }
}
