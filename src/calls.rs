//! Dispatches dashboard calls through the resilient transport.

use std::time::Instant;

use rpc_resilience::{CallOptions, RpcParams};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::app::{App, AppEvent, Method};

fn params_for(app: &App) -> RpcParams {
    let account = app.target_account.to_string();
    match app.method {
        Method::LatestBlockhash | Method::GetSlot => vec![],
        Method::GetAccount => vec![json!(account), json!({ "encoding": "base64" })],
        Method::GetBalance => vec![json!(account)],
    }
}

fn summarize(method: Method, value: &Value) -> String {
    let inner = value.get("value").unwrap_or(value);
    match method {
        Method::LatestBlockhash => inner
            .get("blockhash")
            .and_then(Value::as_str)
            .map(|hash| format!("blockhash {hash}"))
            .unwrap_or_else(|| "blockhash <unexpected shape>".to_string()),
        Method::GetAccount => match inner.get("lamports").and_then(Value::as_u64) {
            Some(lamports) => format!("account lamports={lamports}"),
            None if inner.is_null() => "account not found".to_string(),
            None => "account <unexpected shape>".to_string(),
        },
        Method::GetBalance => format!("balance {inner}"),
        Method::GetSlot => format!("slot {inner}"),
    }
}

/// Spawns one call for the currently selected method.
///
/// The outcome is reported back on `tx` as [`AppEvent::CallFinished`].
pub fn spawn_call(app: &App, tx: mpsc::UnboundedSender<AppEvent>) {
    let transport = app.transport.clone();
    let method = app.method;
    let params = params_for(app);

    tokio::spawn(async move {
        let start = Instant::now();
        let result = transport
            .call(method.name(), params, CallOptions::default())
            .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (ok, message) = match result {
            Ok(value) => (true, summarize(method, &value)),
            Err(err) => (false, format!("{} failed: {err}", method.name())),
        };

        let _ = tx.send(AppEvent::CallFinished {
            method: method.name(),
            latency_ms,
            ok,
            message,
        });
    });
}
