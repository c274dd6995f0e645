use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::join_all;
use rpc_resilience::{
    batch_executor_fn, executor_fn, Attempt, CacheConfig, CallOptions, CircuitBreakerConfig,
    CircuitState, ConfigError, ProviderId, ResilienceError, ResilientTransport, RpcExecutor,
    TokenBucketConfig, TransportConfig,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn answering(calls: Arc<AtomicUsize>, answer: Value) -> Arc<dyn RpcExecutor> {
    executor_fn(move |_method, _params, _options| {
        calls.fetch_add(1, Ordering::SeqCst);
        let answer = answer.clone();
        async move { Ok(answer) }
    })
}

fn slow(calls: Arc<AtomicUsize>, delay: Duration, answer: Value) -> Arc<dyn RpcExecutor> {
    executor_fn(move |_method, _params, _options| {
        calls.fetch_add(1, Ordering::SeqCst);
        let answer = answer.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok(answer)
        }
    })
}

fn failing(calls: Arc<AtomicUsize>) -> Arc<dyn RpcExecutor> {
    executor_fn(move |method, _params, _options| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Err(ResilienceError::upstream(method, anyhow::anyhow!("node unhealthy"))) }
    })
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn transport(
    config: TransportConfig,
    providers: Vec<(&'static str, Arc<dyn RpcExecutor>)>,
) -> ResilientTransport {
    let providers = providers
        .into_iter()
        .map(|(id, executor)| (ProviderId(id), executor))
        .collect();
    ResilientTransport::new(config, providers).expect("valid transport config")
}

#[tokio::test(start_paused = true)]
async fn cache_hit_skips_upstream_and_rate_limiter() {
    let calls = counter();
    let t = transport(
        TransportConfig::default(),
        vec![("a", answering(calls.clone(), json!({ "value": 42 })))],
    );

    let params = vec![json!("So11111111111111111111111111111111111111112")];
    let first = t
        .call("getBalance", params.clone(), CallOptions::default())
        .await
        .unwrap();
    let second = t
        .call("getBalance", params, CallOptions::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let snap = t.snapshot();
    assert_eq!(snap.cache.hits, 1);
    assert_eq!(snap.bucket.allowed, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_calls_share_one_upstream_request() {
    let calls = counter();
    let t = transport(
        TransportConfig::default(),
        vec![(
            "a",
            slow(calls.clone(), Duration::from_millis(50), json!(123_456)),
        )],
    );

    let results = join_all((0..10).map(|_| t.call("getSlot", vec![], CallOptions::default()))).await;

    assert!(results.iter().all(|r| r.as_ref().unwrap() == &json!(123_456)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(t.snapshot().cache.coalesced, 9);
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_leaves_shared_request_running() {
    let calls = counter();
    let t = transport(
        TransportConfig::default(),
        vec![(
            "a",
            slow(calls.clone(), Duration::from_millis(50), json!(123_456)),
        )],
    );

    let cancel = CancellationToken::new();
    let first = t.call(
        "getSlot",
        vec![],
        CallOptions::default().with_cancel(cancel.clone()),
    );
    let second = t.call("getSlot", vec![], CallOptions::default());
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    };

    let (first, second, ()) = tokio::join!(first, second, canceller);

    assert!(matches!(first, Err(ResilienceError::Cancelled)));
    assert_eq!(second.unwrap(), json!(123_456));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(t.cache().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn uncacheable_calls_are_rate_limited() {
    let calls = counter();
    let config = TransportConfig {
        rate_limit: TokenBucketConfig::new(2, Duration::from_secs(1)),
        ..TransportConfig::default()
    };
    let t = transport(config, vec![("a", answering(calls.clone(), json!("sig")))]);

    for _ in 0..2 {
        t.call("sendTransaction", vec![json!("tx")], CallOptions::default())
            .await
            .unwrap();
    }
    let err = t
        .call("sendTransaction", vec![json!("tx")], CallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ResilienceError::RateLimited));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(t.bucket().metrics().rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn failing_primary_fails_over_and_opens_its_circuit() {
    let primary_calls = counter();
    let backup_calls = counter();
    let mut config = TransportConfig {
        circuit_breaker: CircuitBreakerConfig::default().with_failure_threshold(2),
        ..TransportConfig::default()
    };
    config.uncacheable_methods.insert("getSlot".to_string());

    let t = transport(
        config,
        vec![
            ("a", failing(primary_calls.clone())),
            ("b", answering(backup_calls.clone(), json!(7))),
        ],
    );

    for _ in 0..4 {
        let slot = t.call("getSlot", vec![], CallOptions::default()).await;
        assert_eq!(slot.unwrap(), json!(7));
    }

    // Once open, the primary's circuit rejects without invoking the executor.
    assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
    assert_eq!(backup_calls.load(Ordering::SeqCst), 4);
    assert_eq!(t.breaker().state("a"), CircuitState::Open);
    assert_eq!(t.breaker().state("b"), CircuitState::Closed);
    assert_eq!(t.breaker().metrics().rejected_calls, 2);

    let stats = t.provider_stats();
    assert_eq!(stats[&ProviderId("b")].wins, 4);
    assert_eq!(stats[&ProviderId("a")].wins, 0);
}

#[tokio::test(start_paused = true)]
async fn batched_reads_move_off_an_open_primary() {
    let primary_calls = counter();
    let backup_calls = counter();
    let config = TransportConfig {
        circuit_breaker: CircuitBreakerConfig::default().with_failure_threshold(2),
        ..TransportConfig::default()
    };
    let t = transport(
        config,
        vec![
            ("a", failing(primary_calls.clone())),
            ("b", answering(backup_calls.clone(), json!({ "value": 5 }))),
        ],
    );

    let mut ok = 0;
    for i in 0..10 {
        let balance = t
            .call("getBalance", vec![json!(format!("account-{i}"))], CallOptions::default())
            .await;
        if balance.is_ok() {
            ok += 1;
        }
    }

    assert_eq!(ok, 8);
    assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
    assert_eq!(backup_calls.load(Ordering::SeqCst), 8);
    assert_eq!(t.breaker().state("a"), CircuitState::Open);
    assert_eq!(t.provider_stats()[&ProviderId("b")].wins, 8);
}

#[tokio::test(start_paused = true)]
async fn all_providers_failing_reports_every_attempt() {
    let t = transport(
        TransportConfig::default(),
        vec![("a", failing(counter())), ("b", failing(counter()))],
    );

    let err = t
        .call("getSlot", vec![], CallOptions::default())
        .await
        .unwrap_err();

    let ResilienceError::AllFailed(failures) = err else {
        panic!("expected AllFailed, got {err:?}");
    };
    let attempts: Vec<Attempt> = failures.iter().map(|(a, _)| *a).collect();
    assert_eq!(attempts, vec![Attempt::Primary, Attempt::Backup(1)]);

    let stats = t.provider_stats();
    assert_eq!(stats[&ProviderId("a")].errors, 1);
    assert_eq!(stats[&ProviderId("b")].errors, 1);
    assert_eq!(t.cache().stats().fetch_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_balance_reads_become_one_batch() {
    let batches = counter();
    let executor = {
        let batches = batches.clone();
        batch_executor_fn(move |_method, batch, _options| {
            batches.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(batch
                    .into_iter()
                    .map(|params| json!({ "owner": params[0].clone() }))
                    .collect::<Vec<_>>())
            }
        })
    };
    let t = transport(TransportConfig::default(), vec![("a", executor)]);

    let keys: Vec<String> = (0..5).map(|i| format!("account-{i}")).collect();
    let results = join_all(
        keys.iter()
            .map(|k| t.call("getBalance", vec![json!(k)], CallOptions::default())),
    )
    .await;

    for (key, result) in keys.iter().zip(results) {
        assert_eq!(result.unwrap(), json!({ "owner": key }));
    }
    assert_eq!(batches.load(Ordering::SeqCst), 1);

    let batch = t.batcher().stats();
    assert_eq!(batch.batches_executed, 1);
    assert_eq!(batch.batched_requests, 5);
}

#[tokio::test(start_paused = true)]
async fn non_hedgeable_method_uses_only_the_primary() {
    let primary_calls = counter();
    let backup_calls = counter();
    let t = transport(
        TransportConfig::default(),
        vec![
            (
                "a",
                slow(primary_calls.clone(), Duration::from_millis(500), json!("sig")),
            ),
            ("b", answering(backup_calls.clone(), json!("other"))),
        ],
    );

    let sig = t
        .call("sendTransaction", vec![json!("tx")], CallOptions::default())
        .await
        .unwrap();

    assert_eq!(sig, json!("sig"));
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backup_calls.load(Ordering::SeqCst), 0);
    assert_eq!(t.hedger().stats().backups_launched, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_primary_is_hedged_by_backup() {
    let t = transport(
        TransportConfig::default(),
        vec![
            ("a", slow(counter(), Duration::from_secs(1), json!(1))),
            ("b", slow(counter(), Duration::from_millis(20), json!(2))),
        ],
    );

    let slot = t
        .call("getSlot", vec![], CallOptions::default())
        .await
        .unwrap();

    assert_eq!(slot, json!(2));
    let hedge = t.hedger().stats();
    assert_eq!(hedge.backup_wins, 1);
    assert_eq!(hedge.backups_launched, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_batched_calls() {
    let t = transport(
        TransportConfig::default(),
        vec![("a", answering(counter(), json!(1)))],
    );

    t.shutdown().await;

    let err = t
        .call("getBalance", vec![json!("acct")], CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::Shutdown));
    assert!(!t.cache().cleanup_running());
}

#[test]
fn construction_validates_providers_and_config() {
    let empty = ResilientTransport::new(TransportConfig::default(), Vec::new());
    assert!(matches!(
        empty.err(),
        Some(ConfigError::Invalid {
            field: "providers",
            ..
        })
    ));

    let config = TransportConfig {
        cache: CacheConfig::default().with_max_entries(0),
        ..TransportConfig::default()
    };
    let providers = vec![(ProviderId("a"), answering(counter(), json!(1)))];
    assert!(ResilientTransport::new(config, providers).is_err());
}
