//! Environment configuration utilities: rate limits and RPC provider URLs.
//!
//! Unlike the component constructors, these loaders never fail on bad input.
//! A missing, unparsable or out-of-range variable falls back to its default and
//! logs a warning.

use std::{collections::HashMap, env, time::Duration};

use tracing::warn;

use crate::{
    config::{ProviderConfig, ProviderId, TokenBucketConfig, MAX_BUCKET_DURATION},
    errors::ResilienceError,
};

pub const RATE_LIMIT_VAR: &str = "RPC_RATE_LIMIT";
pub const RATE_WINDOW_VAR: &str = "RPC_RATE_WINDOW_MS";
pub const RATE_REFILL_VAR: &str = "RPC_RATE_REFILL_MS";
pub const BURST_CAPACITY_VAR: &str = "RPC_BURST_CAPACITY";
pub const BURST_DURATION_VAR: &str = "RPC_BURST_DURATION_MS";

/// Provider variables in priority order; the first one found is the primary.
pub const PROVIDER_VARS: &[(&str, &str)] = &[
    ("HELIUS_RPC_URL", "helius"),
    ("TRITON_RPC_URL", "triton"),
    ("QUICKNODE_RPC_URL", "quicknode"),
];

fn positive(vars: &HashMap<String, String>, key: &str, default: u64) -> u64 {
    let Some(raw) = vars.get(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => value,
        _ => {
            warn!(key, value = raw.as_str(), default, "invalid value, using default");
            default
        }
    }
}

fn positive_u32(vars: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    let value = positive(vars, key, u64::from(default));
    u32::try_from(value).unwrap_or_else(|_| {
        warn!(key, value, default, "value out of range, using default");
        default
    })
}

fn duration_ms(vars: &HashMap<String, String>, key: &str, default: Duration) -> Duration {
    let millis = positive(vars, key, default.as_millis() as u64);
    let value = Duration::from_millis(millis);
    if value > MAX_BUCKET_DURATION {
        warn!(key, millis, ?default, "duration out of range, using default");
        return default;
    }
    value
}

impl TokenBucketConfig {
    /// Reads the bucket configuration from the process environment.
    ///
    /// See [`TokenBucketConfig::from_env_map`].
    pub fn from_env() -> Self {
        Self::from_env_map(&env::vars().collect())
    }

    /// Builds a valid configuration from key/value pairs.
    ///
    /// | key | default |
    /// |---|---|
    /// | `RPC_RATE_LIMIT` | 100 |
    /// | `RPC_RATE_WINDOW_MS` | 1000 |
    /// | `RPC_RATE_REFILL_MS` | 100, capped at the window |
    /// | `RPC_BURST_CAPACITY` | the rate limit (burst disabled) |
    /// | `RPC_BURST_DURATION_MS` | 5000 |
    ///
    /// Durations above one day fall back to their defaults.
    pub fn from_env_map(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let rate_limit = positive_u32(vars, RATE_LIMIT_VAR, defaults.rate_limit);
        let window = duration_ms(vars, RATE_WINDOW_VAR, defaults.window);

        let mut rate_window = duration_ms(vars, RATE_REFILL_VAR, defaults.rate_window);
        if rate_window > window {
            warn!(
                key = RATE_REFILL_VAR,
                ?rate_window,
                ?window,
                "refill interval exceeds window, using the window"
            );
            rate_window = window;
        }

        let mut burst_capacity = positive_u32(vars, BURST_CAPACITY_VAR, rate_limit);
        if burst_capacity < rate_limit {
            warn!(
                key = BURST_CAPACITY_VAR,
                burst_capacity, rate_limit, "burst capacity below rate limit, disabling burst"
            );
            burst_capacity = rate_limit;
        }

        let burst_duration = duration_ms(vars, BURST_DURATION_VAR, defaults.burst_duration);

        Self {
            rate_limit,
            window,
            rate_window,
            burst_capacity,
            burst_duration,
            burst_cooldown: defaults.burst_cooldown,
        }
    }
}

/// Attempts to load a provider configuration from an environment variable.
///
/// Returns `None` if the environment variable is not set or empty.
pub fn provider_from_env(env_key: &str, id: &'static str) -> Option<ProviderConfig> {
    env::var(env_key)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .map(|url| ProviderConfig {
            id: ProviderId(id),
            url,
        })
}

/// Loads every configured provider.
///
/// Looks for the following environment variables:
/// - `HELIUS_RPC_URL`
/// - `TRITON_RPC_URL`
/// - `QUICKNODE_RPC_URL`
///
/// # Errors
/// [`ResilienceError::NoProviders`] if none of them is set.
pub fn providers_from_env() -> Result<Vec<ProviderConfig>, ResilienceError> {
    let providers: Vec<ProviderConfig> = PROVIDER_VARS
        .iter()
        .filter_map(|(key, id)| provider_from_env(key, id))
        .collect();

    if providers.is_empty() {
        return Err(ResilienceError::NoProviders);
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = TokenBucketConfig::from_env_map(&HashMap::new());
        assert_eq!(cfg, TokenBucketConfig::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn valid_values_are_used() {
        let cfg = TokenBucketConfig::from_env_map(&vars(&[
            (RATE_LIMIT_VAR, "250"),
            (RATE_WINDOW_VAR, "2000"),
            (RATE_REFILL_VAR, "50"),
            (BURST_CAPACITY_VAR, "500"),
            (BURST_DURATION_VAR, "3000"),
        ]));

        assert_eq!(cfg.rate_limit, 250);
        assert_eq!(cfg.window, Duration::from_secs(2));
        assert_eq!(cfg.rate_window, Duration::from_millis(50));
        assert_eq!(cfg.burst_capacity, 500);
        assert_eq!(cfg.burst_duration, Duration::from_secs(3));
        assert!(cfg.burst_enabled());
    }

    #[test]
    fn invalid_fields_fall_back_individually() {
        let cfg = TokenBucketConfig::from_env_map(&vars(&[
            (RATE_LIMIT_VAR, "not-a-number"),
            (RATE_WINDOW_VAR, "0"),
            (RATE_REFILL_VAR, "-5"),
            (BURST_CAPACITY_VAR, "99999999999"),
            (BURST_DURATION_VAR, "2500"),
        ]));

        let defaults = TokenBucketConfig::default();
        assert_eq!(cfg.rate_limit, defaults.rate_limit);
        assert_eq!(cfg.window, defaults.window);
        assert_eq!(cfg.rate_window, defaults.rate_window);
        assert_eq!(cfg.burst_capacity, defaults.rate_limit);
        assert_eq!(cfg.burst_duration, Duration::from_millis(2500));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inconsistent_values_are_repaired() {
        let cfg = TokenBucketConfig::from_env_map(&vars(&[
            (RATE_LIMIT_VAR, "50"),
            (RATE_WINDOW_VAR, "40"),
            (BURST_CAPACITY_VAR, "10"),
        ]));

        assert_eq!(cfg.rate_window, Duration::from_millis(40));
        assert_eq!(cfg.burst_capacity, 50);
        assert!(!cfg.burst_enabled());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn oversized_durations_fall_back_to_defaults() {
        let cfg = TokenBucketConfig::from_env_map(&vars(&[
            (RATE_WINDOW_VAR, "18446744073709551615"),
            (BURST_CAPACITY_VAR, "200"),
            (BURST_DURATION_VAR, "18446744073709551615"),
        ]));

        let defaults = TokenBucketConfig::default();
        assert_eq!(cfg.window, defaults.window);
        assert_eq!(cfg.burst_duration, defaults.burst_duration);
        assert!(cfg.burst_enabled());
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_from_oversized_burst_duration_bursts_normally() {
        let cfg = TokenBucketConfig::from_env_map(&vars(&[
            (RATE_LIMIT_VAR, "10"),
            (BURST_CAPACITY_VAR, "20"),
            (BURST_DURATION_VAR, "18446744073709551615"),
        ]));
        let bucket = crate::rate_limiter::TokenBucket::new(cfg).unwrap();

        while bucket.consume(1) {}
        assert!(bucket.status().in_burst);
        assert_eq!(bucket.metrics().burst_activations, 1);
    }
}
