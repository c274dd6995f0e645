//! High-volume load test through the resilient transport.
//!
//! Fires many concurrent reads at a fixed account, alternating a batchable
//! method (`getBalance`) with a hedged one (`getSlot`), and reports how each
//! layer absorbed the load: rate-limit rejections, cache and coalescing hits,
//! batch sizes, hedge wins and circuit activity.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use rpc_resilience::{
    env::providers_from_env, CallOptions, HedgeConfig, ResilienceError, ResilientTransport,
    TokenBucketConfig, TransportConfig,
};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

const NUM_CALLS: usize = 5_000;
const MAX_IN_FLIGHT: usize = 256;

#[derive(Debug)]
enum CallOutcome {
    Ok { latency: Duration },
    Err { kind: &'static str, latency: Duration },
}

#[derive(Debug)]
struct CallResult {
    method: &'static str,
    outcome: CallOutcome,
}

fn error_kind(err: &ResilienceError) -> &'static str {
    match err {
        ResilienceError::RateLimited => "rate limited",
        ResilienceError::CircuitOpen { .. } => "circuit open",
        ResilienceError::Timeout(_) => "timeout",
        ResilienceError::AllFailed(_) => "all attempts failed",
        ResilienceError::Upstream { .. } => "upstream",
        _ => "other",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpc_resilience=warn".into()),
        )
        .init();

    let providers = match providers_from_env() {
        Ok(providers) => providers,
        Err(_) => {
            eprintln!("No providers configured.");
            eprintln!("Set at least one of: HELIUS_RPC_URL, TRITON_RPC_URL, QUICKNODE_RPC_URL");
            return Ok(());
        }
    };

    let config = TransportConfig {
        rate_limit: TokenBucketConfig::from_env(),
        hedge: HedgeConfig::aggressive(providers.len()),
        ..TransportConfig::default()
    };
    let transport = ResilientTransport::from_providers(config, &providers)?;
    transport.start_background_tasks();

    let account = "So11111111111111111111111111111111111111112";
    let (tx, mut rx) = mpsc::channel::<CallResult>(MAX_IN_FLIGHT * 2);
    let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));

    let consumer = tokio::spawn(async move {
        let mut results: Vec<CallResult> = Vec::with_capacity(NUM_CALLS);
        while let Some(res) = rx.recv().await {
            results.push(res);
        }
        results
    });

    let started = Instant::now();
    for i in 0..NUM_CALLS {
        let transport = transport.clone();
        let tx = tx.clone();
        let sem = semaphore.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };

            let (method, params) = if i % 2 == 0 {
                ("getBalance", vec![json!(account)])
            } else {
                ("getSlot", vec![])
            };

            let start = Instant::now();
            let res = transport.call(method, params, CallOptions::default()).await;
            let latency = start.elapsed();

            let outcome = match res {
                Ok(_) => CallOutcome::Ok { latency },
                Err(e) => CallOutcome::Err {
                    kind: error_kind(&e),
                    latency,
                },
            };

            let _ = tx.send(CallResult { method, outcome }).await;
        });
    }

    drop(tx);
    let results = consumer.await?;
    let wall = started.elapsed();

    let mut successes: HashMap<&'static str, (usize, Duration)> = HashMap::new();
    let mut errors: HashMap<&'static str, usize> = HashMap::new();
    let mut error_latency = Duration::ZERO;

    for r in &results {
        match &r.outcome {
            CallOutcome::Ok { latency } => {
                let entry = successes.entry(r.method).or_insert((0, Duration::ZERO));
                entry.0 += 1;
                entry.1 += *latency;
            }
            CallOutcome::Err { kind, latency } => {
                *errors.entry(*kind).or_insert(0) += 1;
                error_latency += *latency;
            }
        }
    }

    println!("=== summary ===");
    println!("total calls          : {}", NUM_CALLS);
    println!("wall time            : {:?}", wall);
    for (method, (count, total)) in &successes {
        println!(
            "{:>20} : ok = {:6}, avg_latency = {:8.3} ms",
            method,
            count,
            total.as_secs_f64() * 1000.0 / (*count as f64)
        );
    }
    let error_count: usize = errors.values().sum();
    for (kind, count) in &errors {
        println!("{:>20} : {}", kind, count);
    }
    if error_count > 0 {
        println!(
            "avg error latency    : {:.3} ms",
            error_latency.as_secs_f64() * 1000.0 / error_count as f64
        );
    }

    let snap = transport.snapshot();
    println!("\n=== components ===");
    println!(
        "rate limiter : allowed {} rejected {} ({:.1}%) bursts {}",
        snap.bucket.allowed,
        snap.bucket.rejected,
        snap.bucket.rejection_rate() * 100.0,
        snap.bucket.burst_activations
    );
    println!(
        "cache        : hits {} coalesced {} misses {} hit rate {:.1}%",
        snap.cache.hits,
        snap.cache.coalesced,
        snap.cache.misses,
        snap.cache.hit_rate() * 100.0
    );
    println!(
        "batching     : {} batches, avg size {:.1}, {:.1}% fewer upstream calls",
        snap.batch.batches_executed,
        snap.batch.average_batch_size(),
        snap.batch.request_reduction() * 100.0
    );
    println!(
        "hedging      : {} races, {} hedged, primary/backup wins {}/{}",
        snap.hedge.total_requests,
        snap.hedge.hedged_requests,
        snap.hedge.primary_wins,
        snap.hedge.backup_wins
    );
    println!(
        "circuits     : {} open, {} rejected calls",
        snap.circuits.open, snap.circuits.rejected_calls
    );
    for (provider, stats) in &snap.providers {
        println!(
            "provider {:>10}: wins = {:6}, avg_latency = {:8.3} ms, errors = {}",
            provider.0, stats.wins, stats.avg_latency_ms, stats.errors,
        );
    }

    transport.shutdown().await;
    Ok(())
}
