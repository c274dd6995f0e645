use std::{sync::Arc, time::Duration};

use crate::hedging::Attempt;

/// Errors raised while validating component configuration.
///
/// Returned synchronously from every component constructor. Configuration is
/// never silently repaired, except by the environment loaders in [`crate::env`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric or duration field was zero.
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    /// A field was out of range or inconsistent with another field.
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while a request travels through the resilience layer.
///
/// Cloneable so one failure can be handed to every coalesced cache waiter and
/// every member of a failed batch.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ResilienceError {
    /// The circuit for this service is open; the wrapped call was not made.
    #[error("circuit open for {service}, retry after {retry_after:?}")]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    /// The token bucket had no permit for this request.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The executor or fetcher failed.
    #[error("upstream call {method} failed: {error:#}")]
    Upstream {
        method: String,
        error: Arc<anyhow::Error>,
    },

    /// Every hedged attempt failed.
    ///
    /// Contains each attempt and its error, in launch order.
    #[error("all attempts failed: {0:?}")]
    AllFailed(Vec<(Attempt, ResilienceError)>),

    /// The request did not settle within the configured time limit.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The call was cancelled through its cancellation token.
    #[error("call cancelled")]
    Cancelled,

    /// A batch executor returned a result array of the wrong length.
    #[error("batch executor for {method} returned {actual} results for {expected} requests")]
    BatchSizeMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    /// The component was shut down before the request could complete.
    #[error("component shut down")]
    Shutdown,

    /// No RPC providers were configured.
    #[error("no providers configured")]
    NoProviders,
}

impl ResilienceError {
    /// Wraps any error raised by an upstream call.
    pub fn upstream(method: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            method: method.into(),
            error: Arc::new(error.into()),
        }
    }

    /// Whether this error should count against the health of a service.
    ///
    /// Rejections produced by the resilience layer itself and cooperative
    /// cancellation say nothing about the remote side.
    pub fn is_service_failure(&self) -> bool {
        match self {
            Self::Upstream { .. }
            | Self::AllFailed(_)
            | Self::Timeout(_)
            | Self::BatchSizeMismatch { .. } => true,
            Self::CircuitOpen { .. }
            | Self::RateLimited
            | Self::Cancelled
            | Self::Shutdown
            | Self::NoProviders => false,
        }
    }

    /// Returns `true` for the circuit-open rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
