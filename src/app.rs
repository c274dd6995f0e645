//! Application state and logic for the TUI dashboard.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use color_eyre::Result;
use rpc_resilience::{
    config::{ProviderConfig, ProviderId},
    CircuitState, ResilientTransport, TransportSnapshot,
};
use solana_sdk::pubkey::Pubkey;

/// RPC method to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Fetch the latest blockhash (hedged, cached briefly).
    LatestBlockhash,
    /// Fetch account data for the target account (batched).
    GetAccount,
    /// Fetch the target account's balance (batched).
    GetBalance,
    /// Fetch the current slot (hedged).
    GetSlot,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::LatestBlockhash => "getLatestBlockhash",
            Method::GetAccount => "getAccountInfo",
            Method::GetBalance => "getBalance",
            Method::GetSlot => "getSlot",
        }
    }

    fn next(self) -> Self {
        match self {
            Method::LatestBlockhash => Method::GetAccount,
            Method::GetAccount => Method::GetBalance,
            Method::GetBalance => Method::GetSlot,
            Method::GetSlot => Method::LatestBlockhash,
        }
    }
}

/// Events emitted by RPC operations.
#[derive(Debug)]
pub enum AppEvent {
    /// A call through the transport completed.
    CallFinished {
        method: &'static str,
        latency_ms: f64,
        ok: bool,
        message: String,
    },
}

/// Main application state for the TUI.
pub struct App {
    pub transport: ResilientTransport,
    pub providers: Vec<(ProviderId, String)>,
    pub selected_idx: usize,
    pub method: Method,
    pub last_message: String,
    pub last_method: Option<&'static str>,
    pub last_latency_ms: Option<f64>,
    pub snapshot: TransportSnapshot,
    pub circuit_states: HashMap<ProviderId, CircuitState>,
    pub target_account: Pubkey,
    pub load_mode: bool,
    pub load_count: usize,
    pub load_started: usize,
    pub load_finished: usize,
    pub load_per_tick: usize,
    pub session_start: Instant,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_errors: u64,
    pub latency_history: VecDeque<u64>,
    pub call_timestamps: VecDeque<Instant>,
}

impl App {
    pub fn new(transport: ResilientTransport, providers_cfg: Vec<ProviderConfig>) -> Result<Self> {
        let providers: Vec<(ProviderId, String)> = providers_cfg
            .into_iter()
            .map(|pcfg| (pcfg.id, pcfg.url))
            .collect();

        let target_account: Pubkey = "So11111111111111111111111111111111111111112".parse()?;
        let snapshot = transport.snapshot();

        Ok(Self {
            transport,
            providers,
            selected_idx: 0,
            method: Method::GetBalance,
            last_message: String::from("Ready. Press 'r' to run a call or 'l' for a load run"),
            last_method: None,
            last_latency_ms: None,
            snapshot,
            circuit_states: HashMap::new(),
            target_account,
            load_mode: false,
            load_count: 100,
            load_started: 0,
            load_finished: 0,
            load_per_tick: 5,
            session_start: Instant::now(),
            total_calls: 0,
            total_successes: 0,
            total_errors: 0,
            latency_history: VecDeque::with_capacity(100),
            call_timestamps: VecDeque::with_capacity(1000),
        })
    }

    pub fn next_provider(&mut self) {
        if !self.providers.is_empty() {
            self.selected_idx = (self.selected_idx + 1) % self.providers.len();
        }
    }

    pub fn prev_provider(&mut self) {
        if !self.providers.is_empty() {
            if self.selected_idx == 0 {
                self.selected_idx = self.providers.len() - 1;
            } else {
                self.selected_idx -= 1;
            }
        }
    }

    pub fn toggle_method(&mut self) {
        self.method = self.method.next();
    }

    pub fn toggle_load_mode(&mut self) {
        self.load_mode = !self.load_mode;
        if self.load_mode {
            self.load_started = 0;
            self.load_finished = 0;
            self.last_message = format!(
                "Load run ON: {} x {} queued",
                self.load_count,
                self.method.name()
            );
        } else {
            self.last_message = "Load run OFF".to_string();
        }
    }

    pub fn increase_load_count(&mut self) {
        self.load_count = (self.load_count + 100).min(10_000);
    }

    pub fn decrease_load_count(&mut self) {
        self.load_count = (self.load_count.saturating_sub(100)).max(100);
    }

    /// Number of calls to start on this tick of a load run.
    pub fn load_calls_due(&self) -> usize {
        if !self.load_mode {
            return 0;
        }
        self.load_per_tick
            .min(self.load_count.saturating_sub(self.load_started))
    }

    pub fn refresh_stats(&mut self) {
        self.snapshot = self.transport.snapshot();
        for (id, _) in &self.providers {
            let state = self.transport.breaker().state(id.as_str());
            self.circuit_states.insert(*id, state);
        }
    }

    pub fn clear_cache(&mut self) {
        self.transport.cache().clear();
        self.last_message = "Cache cleared".to_string();
    }

    pub fn reset_selected_circuit(&mut self) {
        if let Some(id) = self.selected_provider_id() {
            self.transport.breaker().reset_service(id.as_str());
            self.last_message = format!("Circuit for {} reset", id.0);
        }
    }

    pub fn reset_session(&mut self) {
        self.total_calls = 0;
        self.total_successes = 0;
        self.total_errors = 0;
        self.latency_history.clear();
        self.call_timestamps.clear();
        self.session_start = Instant::now();
        self.last_message = "Session stats reset".to_string();
    }

    pub fn set_last_result(
        &mut self,
        method: &'static str,
        latency_ms: f64,
        ok: bool,
        message: String,
    ) {
        self.last_method = Some(method);
        self.last_latency_ms = Some(latency_ms);

        self.total_calls += 1;
        if ok {
            self.total_successes += 1;
        } else {
            self.total_errors += 1;
        }

        self.latency_history.push_back(latency_ms as u64);
        if self.latency_history.len() > 100 {
            self.latency_history.pop_front();
        }

        self.call_timestamps.push_back(Instant::now());
        if self.call_timestamps.len() > 1000 {
            self.call_timestamps.pop_front();
        }

        let status = if ok { "✓" } else { "✗" };
        self.last_message = format!("{} {} ({:.0} ms)", status, message, latency_ms);

        if self.load_mode {
            self.load_finished += 1;
            if self.load_finished >= self.load_count {
                self.load_mode = false;
                self.last_message = format!("Load run complete! {} calls finished", self.load_count);
            }
        }
    }

    pub fn selected_provider_id(&self) -> Option<ProviderId> {
        self.providers.get(self.selected_idx).map(|(id, _)| *id)
    }

    pub fn session_uptime(&self) -> Duration {
        self.session_start.elapsed()
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls > 0 {
            (self.total_successes as f64 / self.total_calls as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn calls_per_second(&self) -> f64 {
        let now = Instant::now();
        let one_sec_ago = now - Duration::from_secs(1);

        self.call_timestamps
            .iter()
            .filter(|&&ts| ts > one_sec_ago)
            .count() as f64
    }

    pub fn average_latency(&self) -> f64 {
        if self.latency_history.is_empty() {
            return 0.0;
        }
        let total: u64 = self.latency_history.iter().sum();
        total as f64 / self.latency_history.len() as f64
    }
}
