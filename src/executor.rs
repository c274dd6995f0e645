//! The boundary between the resilience layer and whatever performs the remote call.
//!
//! Every component that talks to the network does so through an [`RpcExecutor`].
//! Production code uses [`crate::rpc::SolanaRpcExecutor`]; tests and callers with
//! their own transport can wrap a plain async closure in [`FnExecutor`] or
//! [`FnBatchExecutor`].

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use solana_commitment_config::CommitmentConfig;
use tokio_util::sync::CancellationToken;

use crate::errors::ResilienceError;

/// Positional JSON-RPC parameters of a single request.
pub type RpcParams = Vec<Value>;

/// Per-call options threaded through every executor invocation.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Cooperative cancellation signal; executors should stop work once it fires.
    pub cancel: CancellationToken,
    /// Upper bound for a single executor call.
    pub timeout: Option<Duration>,
    /// Recent p95 latency of the target, used to adapt the hedging delay.
    pub p95_latency: Option<Duration>,
    /// Commitment level forwarded to the node, when the method accepts one.
    pub commitment: Option<CommitmentConfig>,
    /// Overrides the cache TTL for this call.
    pub cache_ttl: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            timeout: None,
            p95_latency: None,
            commitment: None,
            cache_ttl: None,
        }
    }
}

impl CallOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_p95_latency(mut self, latency: Duration) -> Self {
        self.p95_latency = Some(latency);
        self
    }

    pub fn with_commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = Some(commitment);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Copy of these options whose token is a child of `parent`.
    pub(crate) fn child_of(&self, parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            ..self.clone()
        }
    }
}

/// Asynchronous executor for remote calls.
///
/// `execute_batch` must return one result per entry of `batch`, in the same order.
/// The default implementation issues the single calls concurrently.
#[async_trait]
pub trait RpcExecutor: Send + Sync {
    async fn execute(
        &self,
        method: &str,
        params: RpcParams,
        options: &CallOptions,
    ) -> Result<Value, ResilienceError>;

    async fn execute_batch(
        &self,
        method: &str,
        batch: Vec<RpcParams>,
        options: &CallOptions,
    ) -> Result<Vec<Value>, ResilienceError> {
        let calls = batch
            .into_iter()
            .map(|params| self.execute(method, params, options));
        futures::future::try_join_all(calls).await
    }
}

/// Adapts an async closure `(method, params, options) -> Result<Value>` to [`RpcExecutor`].
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> RpcExecutor for FnExecutor<F>
where
    F: Fn(String, RpcParams, CallOptions) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ResilienceError>> + Send,
{
    async fn execute(
        &self,
        method: &str,
        params: RpcParams,
        options: &CallOptions,
    ) -> Result<Value, ResilienceError> {
        (self.0)(method.to_string(), params, options.clone()).await
    }
}

/// Adapts an async closure `(method, batch, options) -> Result<Vec<Value>>` to [`RpcExecutor`].
///
/// Single calls are sent as a batch of one.
pub struct FnBatchExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> RpcExecutor for FnBatchExecutor<F>
where
    F: Fn(String, Vec<RpcParams>, CallOptions) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Value>, ResilienceError>> + Send,
{
    async fn execute(
        &self,
        method: &str,
        params: RpcParams,
        options: &CallOptions,
    ) -> Result<Value, ResilienceError> {
        let mut results = (self.0)(method.to_string(), vec![params], options.clone()).await?;
        if results.len() != 1 {
            return Err(ResilienceError::BatchSizeMismatch {
                method: method.to_string(),
                expected: 1,
                actual: results.len(),
            });
        }
        Ok(results.swap_remove(0))
    }

    async fn execute_batch(
        &self,
        method: &str,
        batch: Vec<RpcParams>,
        options: &CallOptions,
    ) -> Result<Vec<Value>, ResilienceError> {
        (self.0)(method.to_string(), batch, options.clone()).await
    }
}

/// Boxes a closure as a shared [`RpcExecutor`].
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn RpcExecutor>
where
    F: Fn(String, RpcParams, CallOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ResilienceError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

/// Boxes a batch closure as a shared [`RpcExecutor`].
pub fn batch_executor_fn<F, Fut>(f: F) -> Arc<dyn RpcExecutor>
where
    F: Fn(String, Vec<RpcParams>, CallOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Value>, ResilienceError>> + Send + 'static,
{
    Arc::new(FnBatchExecutor(f))
}

/// Runs `fut` until it completes, the token fires, or the optional timeout elapses.
pub async fn run_cancellable<T, F>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    fut: F,
) -> Result<T, ResilienceError>
where
    F: Future<Output = Result<T, ResilienceError>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(ResilienceError::Timeout(limit))),
            None => fut.await,
        }
    };

    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(ResilienceError::Cancelled),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn default_batch_runs_each_call_in_order() {
        let exec = FnExecutor(|_method: String, params: RpcParams, _opts: CallOptions| async move {
            Ok::<_, ResilienceError>(json!(params[0].as_u64().unwrap_or(0) * 10))
        });

        let out = exec
            .execute_batch(
                "getBalance",
                vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]],
                &CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, vec![json!(10), json!(20), json!(30)]);
    }

    #[tokio::test]
    async fn batch_executor_serves_single_calls() {
        let exec = FnBatchExecutor(
            |_method: String, batch: Vec<RpcParams>, _opts: CallOptions| async move {
                Ok::<Vec<Value>, ResilienceError>(batch.into_iter().map(|p| p[0].clone()).collect())
            },
        );

        let out = exec
            .execute("getSlot", vec![json!("x")], &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(out, json!("x"));
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_pending_work() {
        let token = CancellationToken::new();
        token.cancel();
        let res: Result<(), _> =
            run_cancellable(&token, None, futures::future::pending()).await;
        assert!(matches!(res, Err(ResilienceError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_with_its_limit() {
        let token = CancellationToken::new();
        let res: Result<(), _> = run_cancellable(
            &token,
            Some(Duration::from_millis(50)),
            futures::future::pending(),
        )
        .await;
        assert!(matches!(res, Err(ResilienceError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[test]
    fn child_options_follow_parent_cancellation() {
        let parent = CancellationToken::new();
        let opts = CallOptions::default().with_timeout(Duration::from_secs(1));
        let child = opts.child_of(&parent);
        assert_eq!(child.timeout, Some(Duration::from_secs(1)));
        parent.cancel();
        assert!(child.cancel.is_cancelled());
        assert!(!opts.cancel.is_cancelled());
    }
}
