use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crate::errors::ConfigError;

/// Unique identifier for an RPC provider.
///
/// Also used as the circuit-breaker service name for that provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(pub &'static str);

impl ProviderId {
    /// Returns the provider name.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Configuration for a single RPC provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Unique identifier for this provider.
    pub id: ProviderId,
    /// RPC endpoint URL.
    pub url: String,
}

/// Read methods that are safe to race against each other.
pub const DEFAULT_HEDGEABLE_METHODS: &[&str] = &[
    "getAccountInfo",
    "getBalance",
    "getBlockHeight",
    "getEpochInfo",
    "getLatestBlockhash",
    "getMultipleAccounts",
    "getSignatureStatuses",
    "getSlot",
    "getTokenAccountBalance",
    "getTransaction",
];

/// Multi-subject reads that can be folded into one upstream call.
pub const DEFAULT_BATCHABLE_METHODS: &[&str] = &[
    "getAccountInfo",
    "getBalance",
    "getSignatureStatuses",
    "getTokenAccountBalance",
];

/// Methods whose responses must never be served from cache.
pub const DEFAULT_UNCACHEABLE_METHODS: &[&str] =
    &["requestAirdrop", "sendTransaction", "simulateTransaction"];

pub(crate) fn method_set(methods: &[&str]) -> HashSet<String> {
    methods.iter().map(|m| (*m).to_string()).collect()
}

fn ensure_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::NotPositive { field });
    }
    Ok(())
}

/// Longest window, refill interval, burst or cooldown a bucket accepts.
pub const MAX_BUCKET_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

fn ensure_bounded(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value > MAX_BUCKET_DURATION {
        return Err(ConfigError::invalid(
            field,
            format!("{value:?} exceeds {MAX_BUCKET_DURATION:?}"),
        ));
    }
    Ok(())
}

/// How additional backups are launched once the hedging delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupLaunch {
    /// One new backup per elapsed hedging delay.
    #[default]
    Staggered,
    /// Every backup at once when the first delay elapses.
    Simultaneous,
}

/// Hedging strategy configuration.
///
/// Controls how aggressively a slow primary call is raced against backups.
/// The strategy balances latency reduction with resource usage.
#[derive(Debug, Clone)]
pub struct HedgeConfig {
    /// Duration to wait for the primary before launching the first backup.
    pub hedging_delay: Duration,

    /// Maximum number of backups launched for a single call.
    pub max_backups: usize,

    /// How long losing attempts get to wind down after a winner is known.
    pub cancellation_timeout: Duration,

    /// Whether a per-call p95 latency hint may replace the base delay.
    ///
    /// The adapted delay never exceeds twice `hedging_delay`.
    pub adaptive_delay_enabled: bool,

    /// Launch policy for the second and later backups.
    pub backup_launch: BackupLaunch,

    /// Maximum time to wait for any attempt to succeed.
    pub overall_timeout: Option<Duration>,

    /// Methods that may be hedged. Everything else runs as a single call.
    pub hedgeable_methods: HashSet<String>,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            hedging_delay: Duration::from_millis(100),
            max_backups: 1,
            cancellation_timeout: Duration::from_millis(100),
            adaptive_delay_enabled: true,
            backup_launch: BackupLaunch::Staggered,
            overall_timeout: Some(Duration::from_secs(2)),
            hedgeable_methods: method_set(DEFAULT_HEDGEABLE_METHODS),
        }
    }
}

impl HedgeConfig {
    /// Creates a low-latency hedging configuration.
    ///
    /// Optimized for minimal response time with moderate resource usage:
    /// - Backs up to every other provider, one at a time
    /// - 20ms hedge delay
    /// - 1 second timeout
    pub fn low_latency(providers_len: usize) -> Self {
        Self {
            hedging_delay: Duration::from_millis(20),
            max_backups: providers_len.saturating_sub(1),
            overall_timeout: Some(Duration::from_secs(1)),
            ..Self::default()
        }
    }

    /// Creates a conservative hedging configuration.
    ///
    /// Minimizes resource usage, only hedging if the primary provider is slow:
    /// - At most one backup
    /// - 100ms hedge delay
    /// - 3 second timeout
    pub fn conservative(_providers_len: usize) -> Self {
        Self {
            hedging_delay: Duration::from_millis(100),
            max_backups: 1,
            overall_timeout: Some(Duration::from_secs(3)),
            ..Self::default()
        }
    }

    /// Creates an aggressive hedging configuration.
    ///
    /// Prioritizes latency over resource usage:
    /// - Every backup fires together after the first delay
    /// - 20ms hedge delay
    /// - 1 second timeout
    pub fn aggressive(providers_len: usize) -> Self {
        Self {
            hedging_delay: Duration::from_millis(20),
            max_backups: providers_len.saturating_sub(1),
            backup_launch: BackupLaunch::Simultaneous,
            overall_timeout: Some(Duration::from_secs(1)),
            ..Self::default()
        }
    }

    pub fn with_hedging_delay(mut self, delay: Duration) -> Self {
        self.hedging_delay = delay;
        self
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn with_backup_launch(mut self, launch: BackupLaunch) -> Self {
        self.backup_launch = launch;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.overall_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("hedging_delay", self.hedging_delay)?;
        ensure_positive("cancellation_timeout", self.cancellation_timeout)?;
        if let Some(timeout) = self.overall_timeout {
            ensure_positive("overall_timeout", timeout)?;
        }
        Ok(())
    }
}

/// Token bucket sizing and replenishment.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketConfig {
    /// Sustained number of requests admitted per `window`.
    pub rate_limit: u32,
    /// Period over which `rate_limit` applies.
    pub window: Duration,
    /// Replenishment quantum; tokens are credited once per elapsed quantum.
    pub rate_window: Duration,
    /// Capacity (and per-window rate) while burst mode is active.
    ///
    /// Burst mode is disabled when this equals `rate_limit`.
    pub burst_capacity: u32,
    /// How long burst mode lasts once triggered.
    pub burst_duration: Duration,
    /// Minimum time between the end of one burst and the start of the next.
    pub burst_cooldown: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            rate_limit: 100,
            window: Duration::from_secs(1),
            rate_window: Duration::from_millis(100),
            burst_capacity: 100,
            burst_duration: Duration::from_secs(5),
            burst_cooldown: Duration::from_secs(60),
        }
    }
}

impl TokenBucketConfig {
    /// Bucket admitting `rate_limit` requests per `window`, burst disabled.
    pub fn new(rate_limit: u32, window: Duration) -> Self {
        Self {
            rate_limit,
            window,
            burst_capacity: rate_limit,
            ..Self::default()
        }
    }

    pub fn with_rate_window(mut self, rate_window: Duration) -> Self {
        self.rate_window = rate_window;
        self
    }

    pub fn with_burst(mut self, burst_capacity: u32, burst_duration: Duration) -> Self {
        self.burst_capacity = burst_capacity;
        self.burst_duration = burst_duration;
        self
    }

    pub fn with_burst_cooldown(mut self, cooldown: Duration) -> Self {
        self.burst_cooldown = cooldown;
        self
    }

    pub fn burst_enabled(&self) -> bool {
        self.burst_capacity > self.rate_limit
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit == 0 {
            return Err(ConfigError::NotPositive { field: "rate_limit" });
        }
        ensure_positive("window", self.window)?;
        ensure_positive("rate_window", self.rate_window)?;
        ensure_bounded("window", self.window)?;
        ensure_bounded("burst_duration", self.burst_duration)?;
        ensure_bounded("burst_cooldown", self.burst_cooldown)?;
        if self.rate_window > self.window {
            return Err(ConfigError::invalid(
                "rate_window",
                format!("{:?} exceeds window {:?}", self.rate_window, self.window),
            ));
        }
        if self.burst_capacity < self.rate_limit {
            return Err(ConfigError::invalid(
                "burst_capacity",
                format!(
                    "{} is below rate_limit {}",
                    self.burst_capacity, self.rate_limit
                ),
            ));
        }
        if self.burst_enabled() {
            ensure_positive("burst_duration", self.burst_duration)?;
        }
        Ok(())
    }
}

/// Per-service circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed.
    pub reset_timeout: Duration,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// A failure further than this from the previous one restarts the count.
    pub monitoring_period: Duration,
    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            monitoring_period: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self.half_open_max_calls = self.half_open_max_calls.max(threshold);
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::NotPositive {
                field: "failure_threshold",
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::NotPositive {
                field: "success_threshold",
            });
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::NotPositive {
                field: "half_open_max_calls",
            });
        }
        ensure_positive("reset_timeout", self.reset_timeout)?;
        ensure_positive("monitoring_period", self.monitoring_period)?;
        Ok(())
    }
}

/// Response cache bounds and expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl: Duration,
    pub enable_coalescing: bool,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(5),
            enable_coalescing: true,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_entries",
            });
        }
        ensure_positive("default_ttl", self.default_ttl)?;
        ensure_positive("cleanup_interval", self.cleanup_interval)?;
        Ok(())
    }
}

/// Request batching window and size.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Time a batch stays open after its first request joined.
    pub batch_window: Duration,
    /// Queued requests that flush a batch immediately.
    pub max_batch_size: usize,
    pub enable_batching: bool,
    /// Methods eligible for batching. Others execute individually.
    pub batchable_methods: HashSet<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(10),
            max_batch_size: 100,
            enable_batching: true,
            batchable_methods: method_set(DEFAULT_BATCHABLE_METHODS),
        }
    }
}

impl BatchConfig {
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_batch_size",
            });
        }
        ensure_positive("batch_window", self.batch_window)?;
        Ok(())
    }
}

/// Configuration for the composed [`crate::ResilientTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub rate_limit: TokenBucketConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub hedge: HedgeConfig,
    /// Methods that always go upstream.
    pub uncacheable_methods: HashSet<String>,
    /// Per-method cache TTL overrides.
    pub method_ttls: HashMap<String, Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let method_ttls = HashMap::from([
            ("getLatestBlockhash".to_string(), Duration::from_secs(2)),
            ("getSlot".to_string(), Duration::from_millis(400)),
            ("getBlockHeight".to_string(), Duration::from_millis(400)),
        ]);

        Self {
            rate_limit: TokenBucketConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            hedge: HedgeConfig::default(),
            uncacheable_methods: method_set(DEFAULT_UNCACHEABLE_METHODS),
            method_ttls,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        self.cache.validate()?;
        self.batch.validate()?;
        self.hedge.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(TransportConfig::default().validate().is_ok());
        assert!(!TokenBucketConfig::default().burst_enabled());
    }

    #[test]
    fn hedge_presets_scale_with_providers() {
        let low = HedgeConfig::low_latency(3);
        assert_eq!(low.max_backups, 2);
        assert_eq!(low.backup_launch, BackupLaunch::Staggered);

        let aggressive = HedgeConfig::aggressive(4);
        assert_eq!(aggressive.max_backups, 3);
        assert_eq!(aggressive.backup_launch, BackupLaunch::Simultaneous);

        assert_eq!(HedgeConfig::conservative(5).max_backups, 1);
        assert_eq!(HedgeConfig::low_latency(0).max_backups, 0);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let cfg = TokenBucketConfig::new(0, Duration::from_secs(1));
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive { field: "rate_limit" })
        );
    }

    #[test]
    fn burst_below_rate_is_rejected() {
        let cfg = TokenBucketConfig::new(100, Duration::from_secs(1))
            .with_burst(50, Duration::from_secs(1));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "burst_capacity",
                ..
            })
        ));
    }

    #[test]
    fn rate_window_larger_than_window_is_rejected() {
        let cfg = TokenBucketConfig::new(10, Duration::from_millis(100))
            .with_rate_window(Duration::from_millis(200));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_bucket_durations_are_rejected() {
        let cfg = TokenBucketConfig::new(10, Duration::from_secs(1))
            .with_burst(20, Duration::from_millis(u64::MAX));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "burst_duration",
                ..
            })
        ));

        let cfg = TokenBucketConfig::new(10, MAX_BUCKET_DURATION + Duration::from_secs(1));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "window", .. })
        ));

        let cfg = TokenBucketConfig::default().with_burst_cooldown(MAX_BUCKET_DURATION);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        let cb = CircuitBreakerConfig::default().with_failure_threshold(0);
        assert!(cb.validate().is_err());

        let batch = BatchConfig::default().with_max_batch_size(0);
        assert!(batch.validate().is_err());

        let cache = CacheConfig::default().with_max_entries(0);
        assert!(cache.validate().is_err());

        let hedge = HedgeConfig::default().with_hedging_delay(Duration::ZERO);
        assert!(hedge.validate().is_err());
    }

    #[test]
    fn success_threshold_widens_half_open_trials() {
        let cb = CircuitBreakerConfig::default().with_success_threshold(4);
        assert_eq!(cb.half_open_max_calls, 4);
    }
}
