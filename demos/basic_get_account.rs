//! Basic example of calls through the resilient transport.
//!
//! Fetches a blockhash (hedged across providers) and account data (batched on
//! the primary), then repeats the account read to show it served from cache.
//!
//! Set at least one of `HELIUS_RPC_URL`, `TRITON_RPC_URL`, `QUICKNODE_RPC_URL`.

use std::time::{Duration, Instant};

use rpc_resilience::{
    env::providers_from_env, CallOptions, HedgeConfig, ResilienceError, ResilientTransport,
    TransportConfig,
};
use serde_json::json;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpc_resilience=debug".into()),
        )
        .init();

    let providers = match providers_from_env() {
        Ok(providers) => providers,
        Err(ResilienceError::NoProviders) => {
            eprintln!("No providers configured.");
            eprintln!("Set at least one of: HELIUS_RPC_URL, TRITON_RPC_URL, QUICKNODE_RPC_URL");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    eprintln!(
        "Using providers:\n{}",
        providers
            .iter()
            .map(|p| format!("- {}: {}", (p.id).0, p.url))
            .collect::<Vec<_>>()
            .join("\n")
    );

    let config = TransportConfig {
        hedge: HedgeConfig::default()
            .with_hedging_delay(Duration::from_millis(80))
            .with_max_backups(providers.len().saturating_sub(1)),
        ..TransportConfig::default()
    };
    let transport = ResilientTransport::from_providers(config, &providers)?;

    let addr: Pubkey = "So11111111111111111111111111111111111111112".parse()?;
    let options = CallOptions::default().with_commitment(CommitmentConfig::processed());

    let t0 = Instant::now();
    let blockhash = transport
        .call("getLatestBlockhash", vec![], options.clone())
        .await?;
    println!(
        "[blockhash] latency={:?} hash={}",
        t0.elapsed(),
        blockhash["value"]["blockhash"]
    );

    let params = vec![json!(addr.to_string()), json!({ "encoding": "base64" })];
    for round in ["cold", "cached"] {
        let t = Instant::now();
        let resp = transport
            .call("getAccountInfo", params.clone(), options.clone())
            .await?;
        println!(
            "[account/{round}] latency={:?} slot={}",
            t.elapsed(),
            resp["context"]["slot"]
        );

        match resp["value"].as_object() {
            Some(account) => {
                println!("lamports={}", account["lamports"]);
                println!("owner={}", account["owner"]);
            }
            None => println!("account not found"),
        }
    }

    let snapshot = transport.snapshot();
    println!(
        "\ncache: hits={} misses={}  batches={}  hedged races={} (backups {})",
        snapshot.cache.hits,
        snapshot.cache.misses,
        snapshot.batch.batches_executed,
        snapshot.hedge.total_requests,
        snapshot.hedge.backups_launched,
    );
    for (provider, stats) in &snapshot.providers {
        println!(
            "provider {:>10}: wins = {}, avg_latency = {:.1} ms, errors = {}",
            provider.0, stats.wins, stats.avg_latency_ms, stats.errors
        );
    }

    transport.shutdown().await;
    Ok(())
}
