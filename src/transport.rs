//! The composed call path.
//!
//! ```text
//! call ──► cache hit? ──yes──► value
//!              │ no (one fetch per key)
//!              ▼
//!        token bucket ──empty──► RateLimited
//!              │
//!              ▼
//!     batchable? ──yes──► batch on first admitting ──┐
//!              │ no                                   ├─ every provider call
//!              ▼                                      │  runs under its circuit
//!      hedged race across providers ─────────────────┘
//! ```
//!
//! A batch rejected by an open circuit falls through to the hedged race.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    batch::{BatchManager, BatchStats},
    cache::{CacheStats, RequestCache},
    circuit_breaker::{CircuitBreaker, CircuitMetrics},
    config::{ProviderConfig, ProviderId, TransportConfig},
    errors::{ConfigError, ResilienceError},
    executor::{run_cancellable, CallOptions, RpcExecutor, RpcParams},
    hedging::{attempt, Attempt, AttemptFn, HedgeStats, HedgedManager},
    rate_limiter::{BucketMetrics, TokenBucket},
    rpc::SolanaRpcExecutor,
};

#[derive(Debug, Default)]
struct ProviderStats {
    wins: u64,
    total_latency_ms: f64,
    errors: u64,
}

/// Snapshot of provider performance statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatsSnapshot {
    /// Number of calls this provider answered.
    pub wins: u64,
    /// Average latency in milliseconds for answered calls.
    pub avg_latency_ms: f64,
    /// Number of failed calls from this provider.
    pub errors: u64,
}

/// Every component's metrics at one point in time.
#[derive(Debug, Clone)]
pub struct TransportSnapshot {
    pub bucket: BucketMetrics,
    pub circuits: CircuitMetrics,
    pub cache: CacheStats,
    pub batch: BatchStats,
    pub hedge: HedgeStats,
    pub providers: HashMap<ProviderId, ProviderStatsSnapshot>,
}

/// Runs a provider's executor under that provider's circuit.
struct GuardedExecutor {
    id: ProviderId,
    executor: Arc<dyn RpcExecutor>,
    breaker: Arc<CircuitBreaker>,
}

#[async_trait]
impl RpcExecutor for GuardedExecutor {
    async fn execute(
        &self,
        method: &str,
        params: RpcParams,
        options: &CallOptions,
    ) -> Result<Value, ResilienceError> {
        self.breaker
            .execute(self.id.as_str(), || {
                self.executor.execute(method, params, options)
            })
            .await
    }

    async fn execute_batch(
        &self,
        method: &str,
        batch: Vec<RpcParams>,
        options: &CallOptions,
    ) -> Result<Vec<Value>, ResilienceError> {
        self.breaker
            .execute(self.id.as_str(), || {
                self.executor.execute_batch(method, batch, options)
            })
            .await
    }
}

struct TransportInner {
    config: TransportConfig,
    providers: Vec<(ProviderId, Arc<GuardedExecutor>)>,
    bucket: TokenBucket,
    breaker: Arc<CircuitBreaker>,
    cache: RequestCache<Value>,
    batcher: BatchManager,
    hedger: HedgedManager,
    stats: Mutex<HashMap<ProviderId, ProviderStats>>,
    /// Parent of every shared fetch's token; cancelled on shutdown.
    cancel: CancellationToken,
}

impl TransportInner {
    async fn fetch(
        &self,
        method: &str,
        params: RpcParams,
        options: CallOptions,
    ) -> Result<Value, ResilienceError> {
        if !self.bucket.consume(1) {
            debug!(method, "rejected by rate limiter");
            return Err(ResilienceError::RateLimited);
        }

        if self.batcher.is_batchable(method) {
            if let Some((id, executor)) = self.batch_target() {
                let started = Instant::now();
                let result = self
                    .batcher
                    .add_request_with_executor(method, params.clone(), options.clone(), executor)
                    .await;
                self.record(id, started, result.is_ok());
                match result {
                    Err(ResilienceError::CircuitOpen { service, .. }) => {
                        debug!(method, service = %service, "batch provider rejected, racing instead");
                    }
                    result => return result.map(|response| response.value),
                }
            }
        }

        self.race(method, params, options).await
    }

    /// First provider whose circuit would admit a call now.
    fn batch_target(&self) -> Option<(ProviderId, Arc<dyn RpcExecutor>)> {
        self.providers
            .iter()
            .find(|(id, _)| !self.breaker.is_rejecting(id.as_str()))
            .map(|(id, executor)| (*id, executor.clone() as Arc<dyn RpcExecutor>))
    }

    async fn race(
        &self,
        method: &str,
        params: RpcParams,
        options: CallOptions,
    ) -> Result<Value, ResilienceError> {
        let mut attempts: Vec<AttemptFn<Value>> = self
            .providers
            .iter()
            .map(|(_, executor)| {
                let executor = executor.clone();
                let method = method.to_string();
                let params = params.clone();
                let options = options.clone();
                attempt(move |token| async move {
                    let options = options.with_cancel(token);
                    executor.execute(&method, params, &options).await
                })
            })
            .collect();
        if attempts.is_empty() {
            return Err(ResilienceError::NoProviders);
        }
        let primary = attempts.remove(0);

        let started = Instant::now();
        let outcome = self
            .hedger
            .hedged_request(method, primary, attempts, &options)
            .await;

        match &outcome {
            Ok(hedged) => {
                if let Some(id) = self.provider_for(hedged.winner) {
                    self.record(id, started, true);
                }
            }
            Err(ResilienceError::AllFailed(failures)) => {
                for (attempt, _) in failures {
                    if let Some(id) = self.provider_for(*attempt) {
                        self.record(id, started, false);
                    }
                }
            }
            Err(_) => {}
        }

        outcome.map(|hedged| hedged.value)
    }

    fn provider_for(&self, attempt: Attempt) -> Option<ProviderId> {
        let index = match attempt {
            Attempt::Primary => 0,
            Attempt::Backup(n) => n,
        };
        self.providers.get(index).map(|(id, _)| *id)
    }

    fn record(&self, id: ProviderId, started: Instant, ok: bool) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(id).or_default();
        if ok {
            entry.wins += 1;
            entry.total_latency_ms += started.elapsed().as_secs_f64() * 1000.0;
        } else {
            entry.errors += 1;
        }
    }
}

/// Resilient Solana RPC transport.
///
/// Owns one of each component and routes every call through them. Cheap to
/// clone; clones share all state.
#[derive(Clone)]
pub struct ResilientTransport {
    inner: Arc<TransportInner>,
}

impl ResilientTransport {
    /// Creates a transport over the given provider executors, first one primary.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if `providers` is empty or any component
    /// configuration is invalid.
    pub fn new(
        config: TransportConfig,
        providers: Vec<(ProviderId, Arc<dyn RpcExecutor>)>,
    ) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::invalid(
                "providers",
                "at least one provider is required",
            ));
        }
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())?);
        let guarded = providers
            .into_iter()
            .map(|(id, executor)| {
                let guarded = GuardedExecutor {
                    id,
                    executor,
                    breaker: breaker.clone(),
                };
                (id, Arc::new(guarded))
            })
            .collect::<Vec<_>>();
        let stats = guarded
            .iter()
            .map(|(id, _)| (*id, ProviderStats::default()))
            .collect();

        info!(
            providers = guarded.len(),
            rate_limit = config.rate_limit.rate_limit,
            "resilient transport ready"
        );

        Ok(Self {
            inner: Arc::new(TransportInner {
                bucket: TokenBucket::new(config.rate_limit.clone())?,
                cache: RequestCache::new(config.cache.clone())?,
                batcher: BatchManager::new(config.batch.clone())?,
                hedger: HedgedManager::new(config.hedge.clone())?,
                breaker,
                providers: guarded,
                stats: Mutex::new(stats),
                cancel: CancellationToken::new(),
                config,
            }),
        })
    }

    /// Creates a transport talking to Solana RPC endpoints.
    ///
    /// # Errors
    /// See [`ResilientTransport::new`].
    pub fn from_providers(
        config: TransportConfig,
        providers: &[ProviderConfig],
    ) -> Result<Self, ConfigError> {
        let executors = providers
            .iter()
            .map(|provider| {
                let executor: Arc<dyn RpcExecutor> = Arc::new(SolanaRpcExecutor::new(provider));
                (provider.id, executor)
            })
            .collect();
        Self::new(config, executors)
    }

    /// Performs one JSON-RPC call through the full resilience stack.
    ///
    /// Cacheable methods are served from the cache when possible, and concurrent
    /// identical calls share one upstream request. Cancelling `options.cancel`
    /// abandons only this caller's wait; the shared request keeps running for
    /// the others.
    ///
    /// # Errors
    /// [`ResilienceError::RateLimited`] when the bucket is empty, otherwise the
    /// error of the batch or hedged race that served the call.
    pub async fn call(
        &self,
        method: &str,
        params: RpcParams,
        options: CallOptions,
    ) -> Result<Value, ResilienceError> {
        let inner = &self.inner;
        if inner.config.uncacheable_methods.contains(method) {
            return inner.fetch(method, params, options).await;
        }

        let key = RequestCache::<Value>::generate_key(method, &params);
        let ttl = options
            .cache_ttl
            .or_else(|| inner.config.method_ttls.get(method).copied());
        let caller = options.cancel.clone();
        let fetcher = {
            let inner = inner.clone();
            let method = method.to_string();
            let options = options.child_of(&inner.cancel);
            move || async move { inner.fetch(&method, params, options).await }
        };

        run_cancellable(&caller, None, inner.cache.get(&key, fetcher, ttl)).await
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Returns the configured provider ids, primary first.
    pub fn providers(&self) -> Vec<ProviderId> {
        self.inner.providers.iter().map(|(id, _)| *id).collect()
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.inner.bucket
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn cache(&self) -> &RequestCache<Value> {
        &self.inner.cache
    }

    pub fn batcher(&self) -> &BatchManager {
        &self.inner.batcher
    }

    pub fn hedger(&self) -> &HedgedManager {
        &self.inner.hedger
    }

    /// Returns a snapshot of accumulated performance statistics for each provider.
    pub fn provider_stats(&self) -> HashMap<ProviderId, ProviderStatsSnapshot> {
        let stats = self.inner.stats.lock();

        stats
            .iter()
            .map(|(id, s)| {
                let avg = if s.wins > 0 {
                    s.total_latency_ms / (s.wins as f64)
                } else {
                    0.0
                };

                (
                    *id,
                    ProviderStatsSnapshot {
                        wins: s.wins,
                        avg_latency_ms: avg,
                        errors: s.errors,
                    },
                )
            })
            .collect()
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            bucket: self.inner.bucket.metrics(),
            circuits: self.inner.breaker.metrics(),
            cache: self.inner.cache.stats(),
            batch: self.inner.batcher.stats(),
            hedge: self.inner.hedger.stats(),
            providers: self.provider_stats(),
        }
    }

    /// Starts the cache's periodic sweep. Needs a running Tokio runtime.
    pub fn start_background_tasks(&self) {
        self.inner.cache.start_cleanup_task();
    }

    /// Stops background work, flushes pending batches and then cancels shared
    /// requests still in flight.
    ///
    /// Batchable calls made afterwards fail with [`ResilienceError::Shutdown`]
    /// and other cacheable calls with [`ResilienceError::Cancelled`].
    pub async fn shutdown(&self) {
        self.inner.cache.shutdown();
        self.inner.batcher.shutdown().await;
        self.inner.cancel.cancel();
        info!("resilient transport shut down");
    }
}
