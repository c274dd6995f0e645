//! Interactive TUI dashboard for the resilient RPC transport.
//!
//! Sends live Solana RPC calls through the full stack and shows what each
//! layer is doing:
//! - Token bucket level, rejections and burst activations
//! - Per-provider circuit state, wins and latency
//! - Cache hits and coalesced lookups
//! - Batch sizes and hedge outcomes
//!
//! Logs go to `rpc-resilience.log` in the working directory, filtered by
//! `RUST_LOG` (default `rpc_resilience=info`).

mod app;
mod calls;
mod ui;

use std::{fs::File, sync::Mutex, time::Duration};

use app::{App, AppEvent};
use calls::spawn_call;
use color_eyre::{eyre::WrapErr, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use rpc_resilience::{
    env::providers_from_env, ResilientTransport, TokenBucketConfig, TransportConfig,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use ui::draw_ui;

const LOG_FILE: &str = "rpc-resilience.log";

fn init_tracing() -> Result<()> {
    let file = File::create(LOG_FILE).wrap_err_with(|| format!("creating {LOG_FILE}"))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rpc_resilience=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    let providers_cfg = providers_from_env()?;
    let config = TransportConfig {
        rate_limit: TokenBucketConfig::from_env(),
        ..TransportConfig::default()
    };
    let transport = ResilientTransport::from_providers(config, &providers_cfg)?;
    transport.start_background_tasks();

    let mut app = App::new(transport.clone(), providers_cfg)?;

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, &mut app).await;

    ratatui::restore();
    transport.shutdown().await;

    result
}

async fn run_app(terminal: &mut ratatui::DefaultTerminal, app: &mut App) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AppEvent>();

    loop {
        while let Ok(ev) = rx.try_recv() {
            match ev {
                AppEvent::CallFinished {
                    method,
                    latency_ms,
                    ok,
                    message,
                } => {
                    app.set_last_result(method, latency_ms, ok, message);
                }
            }
        }

        app.refresh_stats();
        terminal.draw(|frame| draw_ui(frame, app))?;

        let due = app.load_calls_due();
        if due > 0 {
            for _ in 0..due {
                spawn_call(app, tx.clone());
            }
            app.load_started += due;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if crossterm::event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent {
                code,
                kind: KeyEventKind::Press,
                ..
            }) = event::read()?
            {
                match code {
                    KeyCode::Char('q') => break,
                    KeyCode::Up => app.prev_provider(),
                    KeyCode::Down => app.next_provider(),
                    KeyCode::Char('m') => app.toggle_method(),
                    KeyCode::Char('r') => {
                        spawn_call(app, tx.clone());
                    }
                    KeyCode::Char('l') => {
                        app.toggle_load_mode();
                    }
                    KeyCode::Char('[') | KeyCode::Char(',') => {
                        app.decrease_load_count();
                    }
                    KeyCode::Char(']') | KeyCode::Char('.') => {
                        app.increase_load_count();
                    }
                    KeyCode::Char('c') => app.clear_cache(),
                    KeyCode::Char('x') => app.reset_selected_circuit(),
                    KeyCode::Char('s') => app.reset_session(),
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
