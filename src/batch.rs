//! Time-and-size windowed request batching.
//!
//! Requests for the same batchable method that arrive within `batch_window` of
//! each other are folded into one `execute_batch` call. A batch flushes when it
//! reaches `max_batch_size`, when its window elapses, or on [`BatchManager::flush_all`].
//! Result `i` of the executor answers request `i`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::BatchConfig,
    errors::{ConfigError, ResilienceError},
    executor::{CallOptions, RpcExecutor, RpcParams},
};

const EVENT_CAPACITY: usize = 256;

/// How a request reached the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Folded into a batch of `batch_size` requests.
    Batched { batch_size: usize },
    /// Executed on its own.
    Direct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub value: Value,
    pub dispatch: Dispatch,
}

/// Reason a batch was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Full,
    Timeout,
    Manual,
}

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Created {
        batch_id: u64,
        method: String,
    },
    Full {
        batch_id: u64,
        method: String,
        size: usize,
    },
    Executed {
        batch_id: u64,
        method: String,
        size: usize,
        trigger: FlushTrigger,
        elapsed: Duration,
    },
    Failed {
        batch_id: u64,
        method: String,
        size: usize,
        error: ResilienceError,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub total_requests: u64,
    pub batched_requests: u64,
    pub direct_requests: u64,
    pub batches_executed: u64,
    pub full_flushes: u64,
    pub timeout_flushes: u64,
    pub manual_flushes: u64,
    pub failed_batches: u64,
}

impl BatchStats {
    pub fn average_batch_size(&self) -> f64 {
        if self.batches_executed == 0 {
            return 0.0;
        }
        self.batched_requests as f64 / self.batches_executed as f64
    }

    /// Fraction of logical requests that did not need their own executor call.
    pub fn request_reduction(&self) -> f64 {
        let requests = self.batched_requests + self.direct_requests;
        if requests == 0 {
            return 0.0;
        }
        let calls = self.batches_executed + self.direct_requests;
        1.0 - calls as f64 / requests as f64
    }
}

type Reply = oneshot::Sender<Result<BatchResponse, ResilienceError>>;

struct PendingBatch {
    id: u64,
    method: String,
    requests: Vec<(RpcParams, Reply)>,
    created_at: Instant,
    timer: Option<JoinHandle<()>>,
    executor: Arc<dyn RpcExecutor>,
    options: CallOptions,
}

struct BatchInner {
    config: BatchConfig,
    pending: Mutex<HashMap<String, PendingBatch>>,
    next_id: AtomicU64,
    stats: Mutex<BatchStats>,
    events: broadcast::Sender<BatchEvent>,
    cancel: CancellationToken,
}

impl BatchInner {
    async fn flush_expired(&self, method: &str, batch_id: u64) {
        let batch = {
            let mut pending = self.pending.lock();
            let current = pending.get(method).is_some_and(|batch| batch.id == batch_id);
            if current {
                pending.remove(method)
            } else {
                None
            }
        };

        if let Some(mut batch) = batch {
            // the handle belongs to the task running this flush
            drop(batch.timer.take());
            self.execute(batch, FlushTrigger::Timeout).await;
        }
    }

    async fn execute(&self, batch: PendingBatch, trigger: FlushTrigger) {
        let PendingBatch {
            id,
            method,
            requests,
            created_at,
            executor,
            options,
            ..
        } = batch;
        let size = requests.len();
        let (params, replies): (Vec<_>, Vec<_>) = requests.into_iter().unzip();
        let options = options.child_of(&self.cancel);

        debug!(batch_id = id, method = %method, size, ?trigger, "executing batch");
        let result = match executor.execute_batch(&method, params, &options).await {
            Ok(values) if values.len() != size => Err(ResilienceError::BatchSizeMismatch {
                method: method.clone(),
                expected: size,
                actual: values.len(),
            }),
            other => other,
        };

        {
            let mut stats = self.stats.lock();
            stats.batches_executed += 1;
            stats.batched_requests += size as u64;
            match trigger {
                FlushTrigger::Full => stats.full_flushes += 1,
                FlushTrigger::Timeout => stats.timeout_flushes += 1,
                FlushTrigger::Manual => stats.manual_flushes += 1,
            }
            if result.is_err() {
                stats.failed_batches += 1;
            }
        }

        match result {
            Ok(values) => {
                for (reply, value) in replies.into_iter().zip(values) {
                    let _ = reply.send(Ok(BatchResponse {
                        value,
                        dispatch: Dispatch::Batched { batch_size: size },
                    }));
                }
                let _ = self.events.send(BatchEvent::Executed {
                    batch_id: id,
                    method,
                    size,
                    trigger,
                    elapsed: created_at.elapsed(),
                });
            }
            Err(error) => {
                warn!(batch_id = id, method = %method, size, %error, "batch execution failed");
                for reply in replies {
                    let _ = reply.send(Err(error.clone()));
                }
                let _ = self.events.send(BatchEvent::Failed {
                    batch_id: id,
                    method,
                    size,
                    error,
                });
            }
        }
    }

    fn take_all(&self) -> Vec<PendingBatch> {
        let mut pending = self.pending.lock();
        pending
            .drain()
            .map(|(_, mut batch)| {
                if let Some(timer) = batch.timer.take() {
                    timer.abort();
                }
                batch
            })
            .collect()
    }
}

/// Folds concurrent same-method requests into single executor calls.
pub struct BatchManager {
    inner: Arc<BatchInner>,
    shut_down: AtomicBool,
}

impl BatchManager {
    /// # Errors
    /// Returns [`ConfigError`] if `max_batch_size` or `batch_window` is zero.
    pub fn new(config: BatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(BatchInner {
                config,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stats: Mutex::new(BatchStats::default()),
                events,
                cancel: CancellationToken::new(),
            }),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_batchable(&self, method: &str) -> bool {
        self.inner.config.enable_batching && self.inner.config.batchable_methods.contains(method)
    }

    /// Queues one request and waits for its slice of the batch result.
    ///
    /// Methods that are not batchable (or any method while batching is disabled)
    /// go straight to `executor`. A batch runs with the executor and options of
    /// its first request; its cancellation is owned by the manager so one caller
    /// giving up does not cancel the others.
    ///
    /// # Errors
    /// The batch's executor error, [`ResilienceError::BatchSizeMismatch`] if the
    /// executor returned the wrong number of results, or
    /// [`ResilienceError::Shutdown`] once the manager is shut down.
    pub async fn add_request_with_executor(
        &self,
        method: &str,
        params: RpcParams,
        options: CallOptions,
        executor: Arc<dyn RpcExecutor>,
    ) -> Result<BatchResponse, ResilienceError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ResilienceError::Shutdown);
        }
        self.inner.stats.lock().total_requests += 1;

        if !self.is_batchable(method) {
            self.inner.stats.lock().direct_requests += 1;
            let value = executor.execute(method, params, &options).await?;
            return Ok(BatchResponse {
                value,
                dispatch: Dispatch::Direct,
            });
        }

        let (reply, response) = oneshot::channel();
        let full = {
            let mut pending = self.inner.pending.lock();
            // shutdown drains under this lock, so a batch opened now would never flush
            if self.shut_down.load(Ordering::Acquire) {
                return Err(ResilienceError::Shutdown);
            }
            let batch = pending
                .entry(method.to_string())
                .or_insert_with(|| self.open_batch(method, executor, options));
            batch.requests.push((params, reply));

            if batch.requests.len() >= self.inner.config.max_batch_size {
                pending.remove(method)
            } else {
                None
            }
        };

        if let Some(mut batch) = full {
            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }
            let _ = self.inner.events.send(BatchEvent::Full {
                batch_id: batch.id,
                method: batch.method.clone(),
                size: batch.requests.len(),
            });
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.execute(batch, FlushTrigger::Full).await });
        }

        response.await.map_err(|_| ResilienceError::Shutdown)?
    }

    /// Executes every pending batch now and waits for all of them to finish.
    pub async fn flush_all(&self) {
        let batches = self.inner.take_all();
        if batches.is_empty() {
            return;
        }

        debug!(count = batches.len(), "flushing all pending batches");
        let runs = batches.into_iter().map(|batch| {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.execute(batch, FlushTrigger::Manual).await })
        });
        futures::future::join_all(runs).await;
    }

    /// Flushes pending work and rejects any later request.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush_all().await;
        info!("batch manager shut down");
    }

    pub fn pending_batches(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner
            .pending
            .lock()
            .values()
            .map(|batch| batch.requests.len())
            .sum()
    }

    pub fn stats(&self) -> BatchStats {
        self.inner.stats.lock().clone()
    }

    fn open_batch(
        &self,
        method: &str,
        executor: Arc<dyn RpcExecutor>,
        options: CallOptions,
    ) -> PendingBatch {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let window = self.inner.config.batch_window;
        let weak: Weak<BatchInner> = Arc::downgrade(&self.inner);
        let timer_method = method.to_string();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                inner.flush_expired(&timer_method, id).await;
            }
        });

        let _ = self.inner.events.send(BatchEvent::Created {
            batch_id: id,
            method: method.to_string(),
        });

        PendingBatch {
            id,
            method: method.to_string(),
            requests: Vec::new(),
            created_at: Instant::now(),
            timer: Some(timer),
            executor,
            options,
        }
    }
}

impl Drop for BatchManager {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        // dropping the reply senders wakes every waiter with `Shutdown`
        drop(self.inner.take_all());
    }
}
