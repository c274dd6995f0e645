//! Solana JSON-RPC executor.
//!
//! Sends calls through `solana_client`'s nonblocking [`RpcClient`]. Batches of
//! multi-subject reads are collapsed into a single upstream call and split back
//! per request:
//! - `getAccountInfo` and `getBalance` become `getMultipleAccounts`
//! - `getSignatureStatuses` requests are merged into one
//!
//! Any other batch is sent as concurrent single calls.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_rpc_client_api::request::RpcRequest;
use tracing::debug;

use crate::{
    config::{ProviderConfig, ProviderId},
    errors::ResilienceError,
    executor::{run_cancellable, CallOptions, RpcExecutor, RpcParams},
};

/// Upper bound on keys per `getMultipleAccounts` call.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;
/// Upper bound on signatures per `getSignatureStatuses` call.
pub const MAX_SIGNATURE_STATUSES: usize = 256;

/// Maps a JSON-RPC method name to the client's request type.
pub fn rpc_request(method: &str) -> Option<RpcRequest> {
    let request = match method {
        "getAccountInfo" => RpcRequest::GetAccountInfo,
        "getBalance" => RpcRequest::GetBalance,
        "getBlockHeight" => RpcRequest::GetBlockHeight,
        "getEpochInfo" => RpcRequest::GetEpochInfo,
        "getHealth" => RpcRequest::GetHealth,
        "getLatestBlockhash" => RpcRequest::GetLatestBlockhash,
        "getMultipleAccounts" => RpcRequest::GetMultipleAccounts,
        "getSignatureStatuses" => RpcRequest::GetSignatureStatuses,
        "getSlot" => RpcRequest::GetSlot,
        "getTokenAccountBalance" => RpcRequest::GetTokenAccountBalance,
        "getTransaction" => RpcRequest::GetTransaction,
        "getVersion" => RpcRequest::GetVersion,
        "requestAirdrop" => RpcRequest::RequestAirdrop,
        "sendTransaction" => RpcRequest::SendTransaction,
        "simulateTransaction" => RpcRequest::SimulateTransaction,
        _ => return None,
    };
    Some(request)
}

/// Number of positional arguments before the optional config object.
fn config_position(method: &str) -> Option<usize> {
    match method {
        "getBlockHeight" | "getEpochInfo" | "getLatestBlockhash" | "getSlot" => Some(0),
        "getAccountInfo" | "getBalance" | "getMultipleAccounts" | "getTokenAccountBalance"
        | "getTransaction" => Some(1),
        _ => None,
    }
}

fn commitment_name(commitment: CommitmentConfig) -> &'static str {
    if commitment.is_finalized() {
        "finalized"
    } else if commitment.is_confirmed() {
        "confirmed"
    } else {
        "processed"
    }
}

/// Adds `commitment` to the method's config object unless the caller set one.
pub fn apply_commitment(
    method: &str,
    mut params: RpcParams,
    commitment: Option<CommitmentConfig>,
) -> RpcParams {
    let (Some(commitment), Some(position)) = (commitment, config_position(method)) else {
        return params;
    };
    if params.len() < position {
        return params;
    }

    if params.len() == position {
        params.push(Value::Object(Map::new()));
    }
    if let Some(config) = params[position].as_object_mut() {
        config
            .entry("commitment")
            .or_insert_with(|| json!(commitment_name(commitment)));
    }
    params
}

/// How a batch is sent upstream.
#[derive(Debug, Clone, PartialEq)]
enum BatchPlan {
    /// One `getMultipleAccounts` per chunk; `lamports` projects balances.
    Accounts {
        keys: Vec<Value>,
        config: Value,
        lamports: bool,
    },
    /// One merged `getSignatureStatuses`; `counts[i]` signatures belong to request `i`.
    SignatureStatuses {
        signatures: Vec<Value>,
        counts: Vec<usize>,
        config: Option<Value>,
    },
}

/// The config object every request in `batch` carries at `position`.
///
/// `None` when the requests disagree or carry trailing arguments, so they
/// cannot share one upstream call. `Some(None)` when none of them set one.
fn shared_config(batch: &[RpcParams], position: usize) -> Option<Option<Value>> {
    let (first, rest) = batch.split_first()?;
    let config = first.get(position);
    let agrees = |params: &RpcParams| params.len() <= position + 1 && params.get(position) == config;
    if !agrees(first) || !rest.iter().all(agrees) {
        return None;
    }
    Some(config.cloned())
}

fn plan_batch(method: &str, batch: &[RpcParams]) -> Option<BatchPlan> {
    match method {
        "getAccountInfo" | "getBalance" => {
            let lamports = method == "getBalance";
            let mut keys = Vec::with_capacity(batch.len());
            for params in batch {
                keys.push(params.first().filter(|key| key.is_string())?.clone());
            }

            let mut config = shared_config(batch, 1)?.unwrap_or_else(|| Value::Object(Map::new()));
            let object = config.as_object_mut()?;
            if lamports {
                object.insert("encoding".into(), json!("base64"));
                object.insert("dataSlice".into(), json!({ "offset": 0, "length": 0 }));
            }

            Some(BatchPlan::Accounts {
                keys,
                config,
                lamports,
            })
        }
        "getSignatureStatuses" => {
            let mut signatures = Vec::new();
            let mut counts = Vec::with_capacity(batch.len());
            for params in batch {
                let list = params.first()?.as_array()?;
                counts.push(list.len());
                signatures.extend(list.iter().cloned());
            }
            if signatures.len() > MAX_SIGNATURE_STATUSES {
                return None;
            }

            Some(BatchPlan::SignatureStatuses {
                signatures,
                counts,
                config: shared_config(batch, 1)?,
            })
        }
        _ => None,
    }
}

fn malformed(method: &str, detail: &str) -> ResilienceError {
    ResilienceError::upstream(method, anyhow!("malformed response: {detail}"))
}

/// Splits a `getMultipleAccounts` response into per-key `getAccountInfo` or
/// `getBalance` shaped responses.
fn split_accounts(
    method: &str,
    response: Value,
    expected: usize,
    lamports: bool,
) -> Result<Vec<Value>, ResilienceError> {
    let Value::Object(mut response) = response else {
        return Err(malformed(method, "expected an object"));
    };
    let context = response.remove("context").unwrap_or(Value::Null);
    let Some(Value::Array(accounts)) = response.remove("value") else {
        return Err(malformed(method, "missing account list"));
    };
    if accounts.len() != expected {
        return Err(ResilienceError::BatchSizeMismatch {
            method: method.to_string(),
            expected,
            actual: accounts.len(),
        });
    }

    Ok(accounts
        .into_iter()
        .map(|account| {
            let value = if lamports {
                account.get("lamports").cloned().unwrap_or(json!(0))
            } else {
                account
            };
            json!({ "context": context.clone(), "value": value })
        })
        .collect())
}

/// Splits a merged `getSignatureStatuses` response by the original request sizes.
fn split_signature_statuses(
    method: &str,
    response: Value,
    counts: &[usize],
) -> Result<Vec<Value>, ResilienceError> {
    let Value::Object(mut response) = response else {
        return Err(malformed(method, "expected an object"));
    };
    let context = response.remove("context").unwrap_or(Value::Null);
    let Some(Value::Array(statuses)) = response.remove("value") else {
        return Err(malformed(method, "missing status list"));
    };
    let expected: usize = counts.iter().sum();
    if statuses.len() != expected {
        return Err(ResilienceError::BatchSizeMismatch {
            method: method.to_string(),
            expected,
            actual: statuses.len(),
        });
    }

    let mut statuses = statuses.into_iter();
    Ok(counts
        .iter()
        .map(|&count| {
            let slice: Vec<Value> = statuses.by_ref().take(count).collect();
            json!({ "context": context.clone(), "value": slice })
        })
        .collect())
}

/// [`RpcExecutor`] backed by one Solana RPC endpoint.
#[derive(Clone)]
pub struct SolanaRpcExecutor {
    id: ProviderId,
    client: Arc<RpcClient>,
}

impl SolanaRpcExecutor {
    pub fn new(provider: &ProviderConfig) -> Self {
        Self::with_client(provider.id, Arc::new(RpcClient::new(provider.url.clone())))
    }

    pub fn with_client(id: ProviderId, client: Arc<RpcClient>) -> Self {
        Self { id, client }
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    async fn send(
        &self,
        method: &str,
        params: RpcParams,
        options: &CallOptions,
    ) -> Result<Value, ResilienceError> {
        let request = rpc_request(method)
            .ok_or_else(|| ResilienceError::upstream(method, anyhow!("unsupported method")))?;
        let params = apply_commitment(method, params, options.commitment);

        run_cancellable(&options.cancel, options.timeout, async {
            self.client
                .send::<Value>(request, Value::Array(params))
                .await
                .map_err(|e| ResilienceError::upstream(method, e))
        })
        .await
    }

    async fn send_accounts(
        &self,
        method: &str,
        keys: Vec<Value>,
        config: Value,
        lamports: bool,
        options: &CallOptions,
    ) -> Result<Vec<Value>, ResilienceError> {
        let chunks = keys.chunks(MAX_MULTIPLE_ACCOUNTS).map(|chunk| {
            let params = vec![Value::Array(chunk.to_vec()), config.clone()];
            let expected = chunk.len();
            async move {
                let response = self.send("getMultipleAccounts", params, options).await?;
                split_accounts(method, response, expected, lamports)
            }
        });

        let parts = futures::future::try_join_all(chunks).await?;
        Ok(parts.into_iter().flatten().collect())
    }
}

#[async_trait]
impl RpcExecutor for SolanaRpcExecutor {
    async fn execute(
        &self,
        method: &str,
        params: RpcParams,
        options: &CallOptions,
    ) -> Result<Value, ResilienceError> {
        self.send(method, params, options).await
    }

    async fn execute_batch(
        &self,
        method: &str,
        batch: Vec<RpcParams>,
        options: &CallOptions,
    ) -> Result<Vec<Value>, ResilienceError> {
        let size = batch.len();
        match plan_batch(method, &batch) {
            Some(BatchPlan::Accounts {
                keys,
                config,
                lamports,
            }) => {
                debug!(provider = %self.id, method, size, "collapsing into getMultipleAccounts");
                self.send_accounts(method, keys, config, lamports, options)
                    .await
            }
            Some(BatchPlan::SignatureStatuses {
                signatures,
                counts,
                config,
            }) => {
                debug!(provider = %self.id, method, size, "merging signature status lookups");
                let mut params = vec![Value::Array(signatures)];
                params.extend(config);
                let response = self.send(method, params, options).await?;
                split_signature_statuses(method, response, &counts)
            }
            None => {
                let calls = batch
                    .into_iter()
                    .map(|params| self.send(method, params, options));
                futures::future::try_join_all(calls).await
            }
        }
    }
}
