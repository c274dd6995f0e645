//! TTL response cache with LRU eviction and request coalescing.
//!
//! Concurrent misses on the same key share one in-flight fetch: the first
//! caller registers a [`Shared`] future under the key and every later caller
//! awaits a clone of it. The fetch itself writes its result back into the table,
//! so the value lands exactly once no matter how many waiters there are.
//!
//! Expired entries are treated as absent on lookup; the optional background
//! sweep only reclaims memory.

use std::{
    collections::HashMap,
    future::Future,
    num::NonZeroUsize,
    sync::{Arc, Weak},
    time::Duration,
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{sync::broadcast, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    config::CacheConfig,
    errors::{ConfigError, ResilienceError},
};

const EVENT_CAPACITY: usize = 256;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ResilienceError>>>;

/// Notification emitted by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A sweep finished.
    Cleanup { removed: usize, remaining: usize },
    /// An entry was pushed out to respect `max_entries`.
    Evicted { key: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that joined a fetch already in flight.
    pub coalesced: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub fetch_errors: u64,
    pub size: usize,
}

impl CacheStats {
    /// Share of lookups served without starting a fetch.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses + self.coalesced;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct PendingFetch<V: Clone> {
    id: u64,
    fetch: SharedFetch<V>,
    /// Callers currently awaiting `fetch`.
    waiters: usize,
}

struct CacheState<V: Clone> {
    entries: LruCache<String, CacheEntry<V>>,
    pending: HashMap<String, PendingFetch<V>>,
    next_fetch_id: u64,
    /// Bumped by `delete` and `clear`; uncoalesced fetches started in an older
    /// epoch do not write back.
    epoch: u64,
    stats: CacheStats,
}

impl<V: Clone> CacheState<V> {
    fn fresh_value(&mut self, key: &str, now: Instant) -> Option<V> {
        let fresh = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));

        match fresh {
            Some(Some(value)) => {
                self.stats.hits += 1;
                Some(value)
            }
            Some(None) => {
                self.entries.pop(key);
                self.stats.expirations += 1;
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: String, value: V, expires_at: Instant) -> Option<String> {
        let evicted = self
            .entries
            .push(key.clone(), CacheEntry { value, expires_at })
            .map(|(old_key, _)| old_key)
            .filter(|old_key| *old_key != key);

        if evicted.is_some() {
            self.stats.evictions += 1;
        }
        evicted
    }

    fn live_len(&self, now: Instant) -> usize {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .count()
    }
}

struct CacheInner<V: Clone> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
    events: broadcast::Sender<CacheEvent>,
}

impl<V: Clone> CacheInner<V> {
    /// Drops the pending fetch for `key` once its last waiter has gone away.
    fn leave(&self, key: &str, fetch_id: u64) {
        let abandoned = {
            let mut state = self.state.lock();
            let last = match state.pending.get_mut(key) {
                Some(pending) if pending.id == fetch_id => {
                    pending.waiters = pending.waiters.saturating_sub(1);
                    pending.waiters == 0
                }
                _ => false,
            };
            if last {
                state.pending.remove(key)
            } else {
                None
            }
        };

        if abandoned.is_some() {
            trace!(key, "every waiter left, dropping in-flight fetch");
        }
    }
}

/// Registered for each caller awaiting a coalesced fetch.
struct Waiter<V: Clone> {
    inner: Weak<CacheInner<V>>,
    key: String,
    fetch_id: u64,
}

impl<V: Clone> Drop for Waiter<V> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.leave(&self.key, self.fetch_id);
        }
    }
}

impl<V: Clone + Send + Sync + 'static> CacheInner<V> {
    fn complete(
        &self,
        key: String,
        fetch_id: u64,
        epoch: u64,
        ttl: Duration,
        result: &Result<V, ResilienceError>,
    ) {
        let evicted = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let still_valid = if self.config.enable_coalescing {
                let current = state
                    .pending
                    .get(&key)
                    .is_some_and(|pending| pending.id == fetch_id);
                if current {
                    state.pending.remove(&key);
                }
                current
            } else {
                state.epoch == epoch
            };

            match result {
                Err(_) => {
                    state.stats.fetch_errors += 1;
                    None
                }
                Ok(_) if !still_valid => {
                    trace!(key = %key, "discarding result of invalidated fetch");
                    None
                }
                Ok(value) => state.insert(key, value.clone(), Instant::now() + ttl),
            }
        };

        if let Some(key) = evicted {
            self.evicted(key);
        }
    }

    fn evicted(&self, key: String) {
        trace!(key = %key, "evicted least recently used entry");
        let _ = self.events.send(CacheEvent::Evicted { key });
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let (removed, remaining) = {
            let mut state = self.state.lock();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                state.entries.pop(key);
            }
            state.stats.expirations += expired.len() as u64;
            (expired.len(), state.entries.len())
        };

        debug!(removed, remaining, "cache cleanup finished");
        let _ = self.events.send(CacheEvent::Cleanup { removed, remaining });
        removed
    }
}

struct CleanupTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Bounded response cache keyed by method and parameters.
pub struct RequestCache<V: Clone = Value> {
    inner: Arc<CacheInner<V>>,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl<V: Clone + Send + Sync + 'static> RequestCache<V> {
    /// # Errors
    /// Returns [`ConfigError`] if `max_entries`, `default_ttl` or
    /// `cleanup_interval` is zero.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_entries).ok_or(ConfigError::NotPositive {
            field: "max_entries",
        })?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    pending: HashMap::new(),
                    next_fetch_id: 0,
                    epoch: 0,
                    stats: CacheStats::default(),
                }),
                events,
            }),
            cleanup: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Cache key for a JSON-RPC call.
    ///
    /// Objects inside `params` serialize with sorted keys, so logically equal
    /// parameters produce the same key.
    pub fn generate_key(method: &str, params: &[Value]) -> String {
        format!("{method}:{}", Value::Array(params.to_vec()))
    }

    /// Returns the cached value for `key`, or runs `fetcher` and caches its result
    /// for `ttl` (the configured default when `None`).
    ///
    /// While a fetch for `key` is in flight, further callers wait for it instead of
    /// starting their own. Its error, if any, reaches every waiter and is not cached.
    /// Once every waiter has dropped its future, the fetch is dropped too.
    pub async fn get<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<V, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ResilienceError>> + Send + 'static,
    {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);

        let (fetch, _waiter) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            if let Some(value) = state.fresh_value(key, Instant::now()) {
                return Ok(value);
            }

            if let Some(pending) = state.pending.get_mut(key) {
                state.stats.coalesced += 1;
                trace!(key, "joining in-flight fetch");
                pending.waiters += 1;
                let waiter = Waiter {
                    inner: Arc::downgrade(&self.inner),
                    key: key.to_string(),
                    fetch_id: pending.id,
                };
                (pending.fetch.clone(), Some(waiter))
            } else {
                state.stats.misses += 1;
                state.next_fetch_id += 1;
                let fetch_id = state.next_fetch_id;
                let epoch = state.epoch;

                let inner = Arc::downgrade(&self.inner);
                let owned_key = key.to_string();
                let upstream = fetcher();
                let fetch = async move {
                    let result = upstream.await;
                    if let Some(inner) = Weak::upgrade(&inner) {
                        inner.complete(owned_key, fetch_id, epoch, ttl, &result);
                    }
                    result
                }
                .boxed()
                .shared();

                if !self.inner.config.enable_coalescing {
                    (fetch, None)
                } else {
                    state.pending.insert(
                        key.to_string(),
                        PendingFetch {
                            id: fetch_id,
                            fetch: fetch.clone(),
                            waiters: 1,
                        },
                    );
                    let waiter = Waiter {
                        inner: Arc::downgrade(&self.inner),
                        key: key.to_string(),
                        fetch_id,
                    };
                    (fetch, Some(waiter))
                }
            }
        };

        fetch.await
    }

    /// Whether a live entry exists. Does not affect LRU order.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Stores `value` under `key`, replacing any existing entry.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let evicted = self
            .inner
            .state
            .lock()
            .insert(key.to_string(), value, Instant::now() + ttl);

        if let Some(key) = evicted {
            self.inner.evicted(key);
        }
    }

    /// Removes `key` and invalidates any fetch in flight for it.
    ///
    /// Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        state.pending.remove(key);
        state.entries.pop(key).is_some()
    }

    /// Removes every entry and invalidates all fetches in flight.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        state.pending.clear();
        state.entries.clear();
    }

    /// Number of fetches currently in flight with at least one waiter.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.inner.state.lock().live_len(Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            size: state.live_len(Instant::now()),
            ..state.stats.clone()
        }
    }

    /// Drops expired entries now and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.inner.sweep()
    }

    /// Starts the periodic sweep. Calling it again while running is a no-op.
    pub fn start_cleanup_task(&self) {
        let mut slot = self.cleanup.lock();
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let stop = token.clone();
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.config.cleanup_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;

                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.sweep();
                    }
                }
            }
            debug!("cache cleanup task stopped");
        });

        *slot = Some(CleanupTask { token, handle });
    }

    pub fn cleanup_running(&self) -> bool {
        self.cleanup
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Stops the periodic sweep.
    pub fn shutdown(&self) {
        if let Some(task) = self.cleanup.lock().take() {
            task.token.cancel();
            task.handle.abort();
        }
    }
}

impl<V: Clone> Drop for RequestCache<V> {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup.get_mut().take() {
            task.token.cancel();
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::time::{advance, sleep};

    use super::*;

    fn cache(max_entries: usize) -> RequestCache<Value> {
        RequestCache::new(CacheConfig::default().with_max_entries(max_entries)).unwrap()
    }

    fn counting(
        calls: &Arc<AtomicUsize>,
        value: Value,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Value, ResilienceError>> {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(delay).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_get_is_a_hit() {
        let cache = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get("k", counting(&calls, json!(1), Duration::ZERO), None)
            .await
            .unwrap();
        let second = cache
            .get("k", counting(&calls, json!(2), Duration::ZERO), None)
            .await
            .unwrap();

        assert_eq!(first, json!(1));
        assert_eq!(second, json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = Arc::new(cache(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                let fetcher = counting(&calls, json!("slot"), Duration::from_millis(50));
                tokio::spawn(async move { cache.get("unseen", fetcher, None).await })
            })
            .collect();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), json!("slot"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().coalesced, 9);
        assert!(cache.has("unseen"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetches_are_dropped() {
        let cache = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        for i in 0..1000 {
            let key = format!("k-{i}");
            let fetcher = counting(&calls, json!(i), Duration::from_secs(60));
            let res = tokio::time::timeout(Duration::from_millis(1), cache.get(&key, fetcher, None)).await;
            assert!(res.is_err());
        }
        assert_eq!(cache.in_flight(), 0);

        let fresh = cache
            .get("k-0", counting(&calls, json!("fresh"), Duration::ZERO), None)
            .await
            .unwrap();
        assert_eq!(fresh, json!("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_survives_while_any_waiter_remains() {
        let cache = Arc::new(cache(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let impatient = cache.get("k", counting(&calls, json!(1), Duration::from_millis(50)), None);
        let patient = {
            let cache = cache.clone();
            let fetcher = counting(&calls, json!(2), Duration::from_millis(50));
            async move {
                sleep(Duration::from_millis(1)).await;
                cache.get("k", fetcher, None).await
            }
        };

        let (left, value) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(10), impatient),
            patient
        );
        assert!(left.is_err());
        assert_eq!(value.unwrap(), json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.has("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_without_a_sweep() {
        let cache = cache(10);
        cache.set("k", json!(1), Some(Duration::from_secs(1)));

        advance(Duration::from_millis(950)).await;
        assert!(cache.has("k"));

        advance(Duration::from_millis(50)).await;
        assert!(!cache.has("k"));
        assert_eq!(cache.size(), 0);

        let calls = Arc::new(AtomicUsize::new(0));
        let refreshed = cache
            .get("k", counting(&calls, json!(2), Duration::ZERO), None)
            .await
            .unwrap();
        assert_eq!(refreshed, json!(2));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_accessed() {
        let cache = cache(3);
        let mut events = cache.subscribe();
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        cache.set("c", json!(3), None);

        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .get("a", counting(&calls, json!(0), Duration::ZERO), None)
            .await
            .unwrap();
        cache.set("d", json!(4), None);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
        assert_eq!(
            events.try_recv().unwrap(),
            CacheEvent::Evicted { key: "b".into() }
        );
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn has_does_not_refresh_recency() {
        let cache = cache(2);
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        assert!(cache.has("a"));
        cache.set("c", json!(3), None);
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_every_waiter_and_are_not_cached() {
        let cache = Arc::new(cache(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get(
                            "bad",
                            move || async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                sleep(Duration::from_millis(20)).await;
                                Err::<Value, _>(ResilienceError::upstream(
                                    "getBalance",
                                    anyhow::anyhow!("429 too many requests"),
                                ))
                            },
                            None,
                        )
                        .await
                })
            })
            .collect();

        for waiter in waiters {
            let err = waiter.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("429"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.has("bad"));
        assert_eq!(cache.stats().fetch_errors, 1);

        let retry = cache
            .get("bad", counting(&calls, json!("ok"), Duration::ZERO), None)
            .await
            .unwrap();
        assert_eq!(retry, json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_during_fetch_prevents_write_back() {
        let cache = Arc::new(cache(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let cache = cache.clone();
            let fetcher = counting(&calls, json!("stale"), Duration::from_millis(50));
            tokio::spawn(async move { cache.get("k", fetcher, None).await })
        };
        sleep(Duration::from_millis(10)).await;
        cache.delete("k");

        assert_eq!(waiter.await.unwrap().unwrap(), json!("stale"));
        assert!(!cache.has("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_during_uncoalesced_fetch_prevents_write_back() {
        let mut config = CacheConfig::default();
        config.enable_coalescing = false;
        let cache = Arc::new(RequestCache::<Value>::new(config).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let cache = cache.clone();
            let fetcher = counting(&calls, json!("stale"), Duration::from_millis(50));
            tokio::spawn(async move { cache.get("k", fetcher, None).await })
        };
        sleep(Duration::from_millis(10)).await;
        cache.clear();

        waiter.await.unwrap().unwrap();
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn coalescing_can_be_disabled() {
        let mut config = CacheConfig::default();
        config.enable_coalescing = false;
        let cache = Arc::new(RequestCache::<Value>::new(config).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache.get("k", counting(&calls, json!(1), Duration::from_millis(20)), None);
        let b = cache.get("k", counting(&calls, json!(1), Duration::from_millis(20)), None);
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_reports_and_stops() {
        let cache = RequestCache::<Value>::new(
            CacheConfig::default().with_cleanup_interval(Duration::from_secs(10)),
        )
        .unwrap();
        let mut events = cache.subscribe();
        cache.set("short", json!(1), Some(Duration::from_secs(1)));
        cache.set("long", json!(2), Some(Duration::from_secs(60)));

        cache.start_cleanup_task();
        assert!(cache.cleanup_running());

        sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::Cleanup {
                removed: 1,
                remaining: 1
            }
        );

        cache.shutdown();
        tokio::task::yield_now().await;
        assert!(!cache.cleanup_running());

        sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn mixed_read_pattern_mostly_hits() {
        let cache = cache(100);
        let calls = Arc::new(AtomicUsize::new(0));

        for i in 0..1000u64 {
            let key = if i % 5 == 0 {
                format!("cold-{i}")
            } else {
                format!("hot-{}", i % 10)
            };
            cache
                .get(&key, counting(&calls, json!(i), Duration::ZERO), None)
                .await
                .unwrap();
        }

        assert!(cache.stats().hit_rate() > 0.7);
    }

    #[test]
    fn keys_ignore_object_field_order() {
        let mut a = serde_json::Map::new();
        a.insert("encoding".into(), json!("base64"));
        a.insert("commitment".into(), json!("confirmed"));
        let mut b = serde_json::Map::new();
        b.insert("commitment".into(), json!("confirmed"));
        b.insert("encoding".into(), json!("base64"));

        let pubkey = json!("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");
        assert_eq!(
            RequestCache::<Value>::generate_key("getAccountInfo", &[pubkey.clone(), Value::Object(a)]),
            RequestCache::<Value>::generate_key("getAccountInfo", &[pubkey, Value::Object(b)]),
        );
        assert_ne!(
            RequestCache::<Value>::generate_key("getBalance", &[json!(1)]),
            RequestCache::<Value>::generate_key("getSlot", &[json!(1)]),
        );
    }
}
