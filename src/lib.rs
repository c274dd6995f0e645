//! Resilience primitives for Solana JSON-RPC traffic.
//!
//! Five components guard an RPC client against overload, provider failures and
//! tail latency, and [`ResilientTransport`] composes them into one call path:
//!
//! - [`TokenBucket`]: token-bucket admission control with an optional burst mode.
//! - [`CircuitBreaker`]: per-service Closed / Open / HalfOpen failure isolation.
//! - [`RequestCache`]: TTL + LRU response cache that coalesces concurrent misses.
//! - [`BatchManager`]: groups same-method calls into one upstream batch.
//! - [`HedgedManager`]: races delayed backup attempts against a slow primary.
//!
//! # Quick Start
//!
//! ```no_run
//! use rpc_resilience::{CallOptions, ProviderConfig, ProviderId, ResilientTransport, TransportConfig};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let providers = vec![
//!     ProviderConfig {
//!         id: ProviderId("helius"),
//!         url: "https://mainnet.helius-rpc.com".to_string(),
//!     },
//!     ProviderConfig {
//!         id: ProviderId("triton"),
//!         url: "https://triton.helius.xyz".to_string(),
//!     },
//! ];
//!
//! let transport = ResilientTransport::from_providers(TransportConfig::default(), &providers)?;
//! transport.start_background_tasks();
//!
//! let slot = transport
//!     .call("getSlot", vec![], CallOptions::default())
//!     .await?;
//! println!("current slot: {slot}");
//!
//! let balance = transport
//!     .call(
//!         "getBalance",
//!         vec![json!("So11111111111111111111111111111111111111112")],
//!         CallOptions::default(),
//!     )
//!     .await?;
//! println!("balance: {balance}");
//!
//! transport.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Hedging Strategy
//!
//! Hedgeable reads go to the primary provider first. If it has not answered
//! after `hedging_delay` (or the caller's p95 latency, capped at twice the
//! delay), backups are launched one at a time or all at once. The first
//! success wins and the losers are cancelled. A failed attempt launches the
//! next backup immediately.
//!
//! # Preset Configurations
//!
//! Use `HedgeConfig::low_latency()`, `::conservative()`, or `::aggressive()` for
//! common hedging strategies, or build a custom configuration with the
//! `with_*` setters.

pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod env;
pub mod errors;
pub mod executor;
pub mod hedging;
pub mod rate_limiter;
pub mod rpc;
pub mod transport;

pub use batch::{BatchEvent, BatchManager, BatchResponse, BatchStats, Dispatch, FlushTrigger};
pub use cache::{CacheEvent, CacheStats, RequestCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitEvent, CircuitMetrics, CircuitState, ServiceSnapshot,
};
pub use config::{
    BackupLaunch, BatchConfig, CacheConfig, CircuitBreakerConfig, HedgeConfig, ProviderConfig,
    ProviderId, TokenBucketConfig, TransportConfig,
};
pub use errors::{ConfigError, ResilienceError};
pub use executor::{
    batch_executor_fn, executor_fn, CallOptions, FnBatchExecutor, FnExecutor, RpcExecutor,
    RpcParams,
};
pub use hedging::{attempt, Attempt, AttemptFn, HedgeEvent, HedgeStats, Hedged, HedgedManager};
pub use rate_limiter::{BucketEvent, BucketMetrics, BucketStatus, TokenBucket};
pub use rpc::SolanaRpcExecutor;
pub use transport::{ProviderStatsSnapshot, ResilientTransport, TransportSnapshot};
pub use solana_sdk::{hash::Hash, pubkey::Pubkey};
