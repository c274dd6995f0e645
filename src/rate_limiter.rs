//! Token bucket admission control with quantized refill and temporary burst mode.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::{sync::broadcast, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    config::{TokenBucketConfig, MAX_BUCKET_DURATION},
    errors::{ConfigError, ResilienceError},
};

const EVENT_CAPACITY: usize = 64;

/// `now + delay`, saturating at the longest accepted bucket duration.
fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(MAX_BUCKET_DURATION))
        .unwrap_or(now)
}

/// Notifications published by a [`TokenBucket`].
#[derive(Debug, Clone, PartialEq)]
pub enum BucketEvent {
    /// Capacity and refill rate were raised to the burst values.
    BurstStarted { capacity: u32, until: Instant },
    /// Burst mode expired and the bucket decayed back to the base rate.
    BurstEnded { capacity: u32 },
    /// The bucket was restored to full capacity.
    Reset { capacity: u32 },
}

/// Point-in-time view of the bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStatus {
    pub tokens: f64,
    pub capacity: u32,
    /// Requests admitted per window at the current (base or burst) rate.
    pub rate_limit: u32,
    pub window: Duration,
    pub in_burst: bool,
    pub burst_remaining: Option<Duration>,
}

/// Running counters plus the current fill level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketMetrics {
    pub total_requests: u64,
    pub allowed: u64,
    pub rejected: u64,
    pub burst_activations: u64,
    pub tokens: f64,
    pub capacity: u32,
}

impl BucketMetrics {
    /// Fraction of `consume` calls that were rejected.
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.rejected as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    capacity: u32,
    rate: u32,
    last_refill: Instant,
    burst_until: Option<Instant>,
    burst_available_at: Instant,
    total_requests: u64,
    allowed: u64,
    rejected: u64,
    burst_activations: u64,
}

impl BucketState {
    fn full(config: &TokenBucketConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.rate_limit),
            capacity: config.rate_limit,
            rate: config.rate_limit,
            last_refill: now,
            burst_until: None,
            burst_available_at: now,
            total_requests: 0,
            allowed: 0,
            rejected: 0,
            burst_activations: 0,
        }
    }

    /// Credits every whole `rate_window` elapsed since the last refill and ends
    /// an expired burst.
    fn refill(&mut self, now: Instant, config: &TokenBucketConfig) -> Option<BucketEvent> {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let quantum = config.rate_window.as_nanos();
        let quanta = elapsed.as_nanos() / quantum;

        if quanta > 0 {
            let per_quantum = f64::from(self.rate) * config.rate_window.as_secs_f64()
                / config.window.as_secs_f64();
            self.tokens = (self.tokens + per_quantum * quanta as f64).min(f64::from(self.capacity));
            let remainder = u64::try_from(elapsed.as_nanos() % quantum).unwrap_or(0);
            self.last_refill = now - Duration::from_nanos(remainder);
        }

        match self.burst_until {
            Some(until) if now >= until => {
                self.burst_until = None;
                self.capacity = config.rate_limit;
                self.rate = config.rate_limit;
                self.tokens = self.tokens.min(f64::from(self.capacity));
                self.burst_available_at = deadline(now, config.burst_cooldown);
                Some(BucketEvent::BurstEnded {
                    capacity: self.capacity,
                })
            }
            _ => None,
        }
    }

    fn try_start_burst(&mut self, now: Instant, config: &TokenBucketConfig) -> Option<BucketEvent> {
        if !config.burst_enabled() || self.burst_until.is_some() || now < self.burst_available_at {
            return None;
        }

        let until = deadline(now, config.burst_duration);
        self.burst_until = Some(until);
        self.capacity = config.burst_capacity;
        self.rate = config.burst_capacity;
        self.burst_activations += 1;
        Some(BucketEvent::BurstStarted {
            capacity: self.capacity,
            until,
        })
    }
}

/// Bounds the outbound request rate.
///
/// Tokens are replenished in discrete `rate_window` quanta rather than
/// continuously, so every check is a constant-time, allocation-free update under
/// one short lock. Rejection is reported as `false`, never as an error.
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Mutex<BucketState>,
    events: broadcast::Sender<BucketEvent>,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the rate, windows or burst settings are invalid.
    pub fn new(config: TokenBucketConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    /// Creates a bucket from environment variables, falling back to defaults
    /// field by field. See [`TokenBucketConfig::from_env`].
    pub fn from_env() -> Self {
        Self::from_valid(TokenBucketConfig::from_env())
    }

    pub(crate) fn from_valid(config: TokenBucketConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = Mutex::new(BucketState::full(&config, Instant::now()));
        Self {
            config,
            state,
            events,
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Subscribes to bucket notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BucketEvent> {
        self.events.subscribe()
    }

    /// Takes `n` tokens if available. Returns `false` without side effects otherwise.
    pub fn consume(&self, n: u32) -> bool {
        let now = Instant::now();
        let mut events = Vec::new();

        let allowed = {
            let mut state = self.state.lock();
            events.extend(state.refill(now, &self.config));
            state.total_requests += 1;

            let wanted = f64::from(n);
            if state.tokens >= wanted {
                state.tokens -= wanted;
                state.allowed += 1;
                true
            } else {
                if n <= self.config.burst_capacity {
                    events.extend(state.try_start_burst(now, &self.config));
                }
                state.rejected += 1;
                trace!(requested = n, available = state.tokens, "token bucket rejected request");
                false
            }
        };

        for event in events {
            self.publish(event);
        }
        allowed
    }

    /// Non-blocking counterpart of [`TokenBucket::acquire`].
    pub fn try_acquire(&self, n: u32) -> bool {
        self.consume(n)
    }

    /// Checks whether `n` tokens are available without taking them.
    pub fn has_tokens(&self, n: u32) -> bool {
        let now = Instant::now();
        let (available, event) = {
            let mut state = self.state.lock();
            let event = state.refill(now, &self.config);
            (state.tokens >= f64::from(n), event)
        };
        if let Some(event) = event {
            self.publish(event);
        }
        available
    }

    /// Waits until `n` tokens can be taken, checking once per refill quantum.
    ///
    /// # Errors
    /// [`ResilienceError::RateLimited`] if `n` can never fit in the bucket,
    /// [`ResilienceError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, n: u32, cancel: &CancellationToken) -> Result<(), ResilienceError> {
        if n > self.config.burst_capacity.max(self.config.rate_limit) {
            return Err(ResilienceError::RateLimited);
        }

        loop {
            if self.consume(n) {
                return Ok(());
            }

            let wait = self.until_next_refill();
            tokio::select! {
                () = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn until_next_refill(&self) -> Duration {
        let state = self.state.lock();
        let since = Instant::now().saturating_duration_since(state.last_refill);
        self.config
            .rate_window
            .saturating_sub(since)
            .max(Duration::from_millis(1))
    }

    /// Current fill level, capacity and burst state.
    pub fn status(&self) -> BucketStatus {
        let now = Instant::now();
        let mut state = self.state.lock();
        let event = state.refill(now, &self.config);
        let status = BucketStatus {
            tokens: state.tokens,
            capacity: state.capacity,
            rate_limit: state.rate,
            window: self.config.window,
            in_burst: state.burst_until.is_some(),
            burst_remaining: state.burst_until.map(|until| until.saturating_duration_since(now)),
        };
        drop(state);

        if let Some(event) = event {
            self.publish(event);
        }
        status
    }

    pub fn metrics(&self) -> BucketMetrics {
        let state = self.state.lock();
        BucketMetrics {
            total_requests: state.total_requests,
            allowed: state.allowed,
            rejected: state.rejected,
            burst_activations: state.burst_activations,
            tokens: state.tokens,
            capacity: state.capacity,
        }
    }

    /// Restores full base capacity and leaves burst mode. Counters are kept.
    pub fn reset(&self) {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            state.tokens = f64::from(self.config.rate_limit);
            state.capacity = self.config.rate_limit;
            state.rate = self.config.rate_limit;
            state.last_refill = now;
            state.burst_until = None;
            state.burst_available_at = now;
        }

        info!(capacity = self.config.rate_limit, "token bucket reset");
        self.publish(BucketEvent::Reset {
            capacity: self.config.rate_limit,
        });
    }

    fn publish(&self, event: BucketEvent) {
        match &event {
            BucketEvent::BurstStarted { capacity, .. } => {
                info!(capacity, duration = ?self.config.burst_duration, "token bucket entered burst mode");
            }
            BucketEvent::BurstEnded { capacity } => {
                debug!(capacity, "token bucket burst ended");
            }
            BucketEvent::Reset { .. } => {}
        }
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::advance;

    use super::*;

    fn bucket(rate: u32) -> TokenBucket {
        TokenBucket::new(TokenBucketConfig::new(rate, Duration::from_secs(1))).unwrap()
    }

    fn drain(bucket: &TokenBucket) {
        while bucket.consume(1) {}
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_without_side_effects_when_empty() {
        let bucket = bucket(5);
        assert!(bucket.consume(3));
        assert!(!bucket.consume(3));
        assert_eq!(bucket.status().tokens, 2.0);
        assert!(bucket.consume(2));
        assert!(!bucket.consume(1));

        let metrics = bucket.metrics();
        assert_eq!(metrics.allowed, 2);
        assert_eq!(metrics.rejected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn has_tokens_does_not_consume() {
        let bucket = bucket(2);
        assert!(bucket.has_tokens(2));
        assert!(bucket.has_tokens(2));
        assert!(!bucket.has_tokens(3));
        assert!(bucket.consume(2));
        assert!(!bucket.has_tokens(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_quantized() {
        let bucket = bucket(100);
        drain(&bucket);

        advance(Duration::from_millis(50)).await;
        assert!(!bucket.has_tokens(1));

        advance(Duration::from_millis(50)).await;
        assert_eq!(bucket.status().tokens, 10.0);

        // partial quantum carries over to the next refill
        advance(Duration::from_millis(150)).await;
        assert_eq!(bucket.status().tokens, 20.0);
        advance(Duration::from_millis(50)).await;
        assert_eq!(bucket.status().tokens, 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_capped_at_capacity() {
        let bucket = bucket(10);
        advance(Duration::from_secs(30)).await;
        assert_eq!(bucket.status().tokens, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_overload_tracks_configured_rate() {
        let bucket = bucket(100);
        drain(&bucket);

        let mut allowed = 0u32;
        // ~111 attempts per second for 10 seconds
        for _ in 0..1111 {
            advance(Duration::from_millis(9)).await;
            if bucket.consume(1) {
                allowed += 1;
            }
        }

        let expected = 1000.0;
        let deviation = (f64::from(allowed) - expected).abs() / expected;
        assert!(deviation <= 0.05, "allowed {allowed}, deviation {deviation}");
    }

    #[tokio::test(start_paused = true)]
    async fn replenishment_matches_rate_after_exhaustion() {
        let bucket = bucket(100);
        drain(&bucket);

        advance(Duration::from_millis(500)).await;
        let tokens = bucket.status().tokens;
        assert!((tokens - 50.0).abs() <= 0.5, "tokens {tokens}");
    }

    #[tokio::test(start_paused = true)]
    async fn burst_raises_throughput_temporarily() {
        let config = TokenBucketConfig::new(100, Duration::from_secs(1))
            .with_burst(200, Duration::from_secs(1))
            .with_burst_cooldown(Duration::from_secs(60));
        let bucket = TokenBucket::new(config).unwrap();
        let mut events = bucket.subscribe();

        drain(&bucket);
        assert!(bucket.status().in_burst);
        assert!(matches!(
            events.try_recv(),
            Ok(BucketEvent::BurstStarted { capacity: 200, .. })
        ));

        let mut during_burst = 0u32;
        for _ in 0..1000 {
            advance(Duration::from_millis(1)).await;
            if bucket.consume(1) {
                during_burst += 1;
            }
        }
        assert!(during_burst > 150, "burst throughput {during_burst}");

        advance(Duration::from_millis(1)).await;
        let status = bucket.status();
        assert!(!status.in_burst);
        assert_eq!(status.capacity, 100);

        // cooldown keeps the sustained rate at the base value
        drain(&bucket);
        let mut after_burst = 0u32;
        for _ in 0..10 {
            advance(Duration::from_millis(100)).await;
            while bucket.consume(1) {
                after_burst += 1;
            }
        }
        assert_eq!(after_burst, 100);
        assert_eq!(bucket.metrics().burst_activations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_capacity_and_notifies() {
        let bucket = bucket(10);
        let mut events = bucket.subscribe();
        drain(&bucket);

        bucket.reset();
        assert_eq!(bucket.status().tokens, 10.0);
        assert_eq!(events.recv().await.unwrap(), BucketEvent::Reset { capacity: 10 });
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_the_next_quantum() {
        let bucket = bucket(10);
        drain(&bucket);

        let start = Instant::now();
        bucket.acquire(1, &CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_rejects_oversized_requests() {
        let bucket = bucket(10);
        let res = bucket.acquire(11, &CancellationToken::new()).await;
        assert!(matches!(res, Err(ResilienceError::RateLimited)));
    }

    #[test]
    fn deadlines_saturate_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline(now, Duration::MAX), now + MAX_BUCKET_DURATION);
    }

    #[test]
    fn invalid_config_fails_fast() {
        let res = TokenBucket::new(TokenBucketConfig::new(0, Duration::from_secs(1)));
        assert!(matches!(res, Err(ConfigError::NotPositive { field: "rate_limit" })));
    }

    #[test]
    fn admission_check_is_sub_millisecond() {
        let bucket = TokenBucket::new(TokenBucketConfig::new(1_000_000, Duration::from_secs(1))).unwrap();
        let iterations = 10_000u32;

        let start = std::time::Instant::now();
        for _ in 0..iterations {
            let _ = bucket.consume(1);
        }
        let avg = start.elapsed() / iterations;
        assert!(avg < Duration::from_millis(1), "avg admission {avg:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_never_overdraw() {
        let config = TokenBucketConfig::new(100, Duration::from_secs(3600));
        let bucket = Arc::new(TokenBucket::new(config).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                (0..1000).filter(|_| bucket.consume(1)).count()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 100);
    }
}
