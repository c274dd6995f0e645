//! UI rendering functions for the TUI dashboard.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Wrap},
};
use rpc_resilience::CircuitState;

use super::styles::*;
use crate::app::App;

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let size = frame.area();

    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Min(0),
            Constraint::Length(5),
        ])
        .split(size);

    let body_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(main_layout[2]);

    let left_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(9)])
        .split(body_layout[0]);

    draw_header(frame, main_layout[0]);
    draw_session_stats(frame, main_layout[1], app);
    draw_providers_table(frame, left_layout[0], app);
    draw_components_table(frame, left_layout[1], app);
    draw_detail_panel(frame, body_layout[1], app);
    draw_keybinds(frame, main_layout[3]);
}

fn draw_header(frame: &mut Frame, area: Rect) {
    let title = " RPC Resilience :: Real-time Dashboard ";
    let block = Block::default()
        .title(title)
        .title_style(header_style())
        .borders(Borders::ALL)
        .border_style(border_style());

    frame.render_widget(block, area);
}

fn format_uptime(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn ratio_bar(ratio: f64, width: usize) -> String {
    let filled = ((ratio.clamp(0.0, 1.0)) * width as f64) as usize;
    format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(width.saturating_sub(filled))
    )
}

fn draw_session_stats(frame: &mut Frame, area: Rect, app: &App) {
    let uptime_str = format_uptime(app.session_uptime().as_secs());
    let success_rate = app.success_rate();

    let text = vec![Line::from(vec![
        Span::raw(format!("Uptime: {} ", uptime_str)).style(text_style()),
        Span::raw("│ ").style(muted_style()),
        Span::raw(format!("Calls: {} ", app.total_calls)).style(text_style()),
        Span::raw("│ ").style(muted_style()),
        Span::raw(format!("Errors: {} ", app.total_errors)).style(if app.total_errors > 0 {
            error_style()
        } else {
            text_style()
        }),
        Span::raw("│ ").style(muted_style()),
        Span::raw(format!("{:.1} calls/s ", app.calls_per_second())).style(highlight_style()),
        Span::raw("│ ").style(muted_style()),
        Span::raw(format!("Avg: {:.0}ms ", app.average_latency()))
            .style(text_style()),
        Span::raw("│ ").style(muted_style()),
        Span::raw(ratio_bar(success_rate / 100.0, 15)).style(if success_rate > 95.0 {
            success_style()
        } else if success_rate > 80.0 {
            highlight_style()
        } else {
            error_style()
        }),
        Span::raw(format!(" {:.1}%", success_rate)).style(text_style()),
    ])];

    let paragraph = Paragraph::new(text).block(panel(" Session Analytics "));

    frame.render_widget(paragraph, area);
}

fn draw_providers_table(frame: &mut Frame, area: Rect, app: &App) {
    let stats = &app.snapshot.providers;

    let header_cells = ["Provider", "Circuit", "Wins", "Avg ms", "Errors", "Win Rate"]
        .into_iter()
        .map(|h| Cell::from(h).style(table_header_style()));

    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let total_wins: u64 = stats.values().map(|s| s.wins).sum();

    let rows = app.providers.iter().enumerate().map(|(idx, (id, _url))| {
        let snapshot = stats.get(id);
        let wins = snapshot.map(|s| s.wins).unwrap_or(0);
        let avg_ms = snapshot.map(|s| s.avg_latency_ms).unwrap_or(0.0);
        let errors = snapshot.map(|s| s.errors).unwrap_or(0);
        let state = app
            .circuit_states
            .get(id)
            .copied()
            .unwrap_or(CircuitState::Closed);

        let win_rate = if total_wins > 0 {
            wins as f64 / total_wins as f64 * 100.0
        } else {
            0.0
        };

        let cells = vec![
            Cell::from(id.0.to_string()),
            Cell::from(state.to_string()).style(circuit_style(state)),
            Cell::from(format!("{}", wins)).style(if wins > 0 {
                success_style()
            } else {
                Style::default()
            }),
            Cell::from(format!("{:.1}", avg_ms)),
            Cell::from(format!("{}", errors)).style(if errors > 0 {
                error_style()
            } else {
                Style::default()
            }),
            Cell::from(format!("{} {:.0}%", ratio_bar(win_rate / 100.0, 10), win_rate)).style(
                if win_rate > 50.0 {
                    success_style()
                } else if win_rate > 20.0 {
                    highlight_style()
                } else {
                    Style::default()
                },
            ),
        ];

        let mut row = Row::new(cells).height(1);
        if idx == app.selected_idx {
            row = row.style(selected_row_style());
        }
        row
    });

    let circuits = &app.snapshot.circuits;
    let title = format!(
        " Providers ({} open, {} rejected) ",
        circuits.open, circuits.rejected_calls
    );

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Min(18),
        ],
    )
    .header(header)
    .block(panel(title))
    .column_spacing(2);

    frame.render_widget(table, area);
}

fn draw_components_table(frame: &mut Frame, area: Rect, app: &App) {
    let snap = &app.snapshot;
    let text_cell = |s: String| Cell::from(s).style(text_style());

    let rows = vec![
        Row::new(vec![
            Cell::from("Rate limit").style(table_header_style()),
            text_cell(format!(
                "{:.0}/{} tokens  allowed {}  rejected {} ({:.1}%)  bursts {}",
                snap.bucket.tokens,
                snap.bucket.capacity,
                snap.bucket.allowed,
                snap.bucket.rejected,
                snap.bucket.rejection_rate() * 100.0,
                snap.bucket.burst_activations
            )),
        ]),
        Row::new(vec![
            Cell::from("Cache").style(table_header_style()),
            text_cell(format!(
                "{} entries  hits {}  misses {}  coalesced {}  hit rate {:.1}%",
                snap.cache.size,
                snap.cache.hits,
                snap.cache.misses,
                snap.cache.coalesced,
                snap.cache.hit_rate() * 100.0
            )),
        ]),
        Row::new(vec![
            Cell::from("Batching").style(table_header_style()),
            text_cell(format!(
                "{} batches  avg size {:.1}  direct {}  saved {:.1}%",
                snap.batch.batches_executed,
                snap.batch.average_batch_size(),
                snap.batch.direct_requests,
                snap.batch.request_reduction() * 100.0
            )),
        ]),
        Row::new(vec![
            Cell::from("Hedging").style(table_header_style()),
            text_cell(format!(
                "{} races  {} hedged  {} backups  primary/backup wins {}/{}",
                snap.hedge.total_requests,
                snap.hedge.hedged_requests,
                snap.hedge.backups_launched,
                snap.hedge.primary_wins,
                snap.hedge.backup_wins
            )),
        ]),
        Row::new(vec![
            Cell::from("Failures").style(table_header_style()),
            Cell::from(format!(
                "all-failed {}  timeouts {}  circuit failures {}",
                snap.hedge.all_failed, snap.hedge.timeouts, snap.circuits.failures
            ))
            .style(
                if snap.hedge.all_failed + snap.hedge.timeouts > 0 {
                    error_style()
                } else {
                    muted_style()
                },
            ),
        ]),
    ];

    let table = Table::new(rows, [Constraint::Length(11), Constraint::Min(30)])
        .block(panel(" Components "))
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn create_mini_sparkline(data: &[u64]) -> String {
    if data.is_empty() {
        return "───────────".to_string();
    }

    let chars = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let max_val = *data.iter().max().unwrap_or(&1);
    let min_val = *data.iter().min().unwrap_or(&0);
    let range = if max_val > min_val {
        max_val - min_val
    } else {
        1
    };

    data.iter()
        .rev()
        .take(24)
        .rev()
        .map(|&val| {
            let normalized = ((val - min_val) as f64 / range as f64 * 7.0) as usize;
            chars[normalized.min(7)]
        })
        .collect()
}

fn draw_detail_panel(frame: &mut Frame, area: Rect, app: &App) {
    let constraints = if app.load_mode {
        vec![
            Constraint::Length(6),
            Constraint::Min(0),
            Constraint::Length(3),
            Constraint::Length(3),
        ]
    } else {
        vec![
            Constraint::Length(6),
            Constraint::Min(0),
            Constraint::Length(3),
        ]
    };

    let detail_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    draw_config_section(frame, detail_layout[0], app);
    draw_last_call_section(frame, detail_layout[1], app);

    if app.load_mode {
        draw_load_progress(frame, detail_layout[2], app);
        draw_hedge_config_section(frame, detail_layout[3], app);
    } else {
        draw_hedge_config_section(frame, detail_layout[2], app);
    }
}

fn draw_config_section(frame: &mut Frame, area: Rect, app: &App) {
    let provider_str = app
        .selected_provider_id()
        .map(|id| id.0.to_string())
        .unwrap_or_else(|| "-".into());

    let load_status = if app.load_mode {
        format!("ON ({}/{})", app.load_finished, app.load_count)
    } else {
        format!("OFF (count: {})", app.load_count)
    };

    let text = vec![
        Line::from(vec![
            Span::raw("Method  : ").style(muted_style()),
            Span::raw(app.method.name()).style(highlight_style()),
        ]),
        Line::from(vec![
            Span::raw("Provider: ").style(muted_style()),
            Span::raw(provider_str).style(text_style()),
        ]),
        Line::from(vec![
            Span::raw("Load    : ").style(muted_style()),
            Span::raw(load_status).style(if app.load_mode {
                success_style()
            } else {
                muted_style()
            }),
        ]),
        Line::from(vec![
            Span::raw("Account : ").style(muted_style()),
            Span::raw(app.target_account.to_string()).style(text_style()),
        ]),
    ];

    let paragraph = Paragraph::new(text)
        .block(panel(" Configuration "))
        .wrap(Wrap { trim: false });

    frame.render_widget(paragraph, area);
}

fn draw_last_call_section(frame: &mut Frame, area: Rect, app: &App) {
    let last_latency_str = app
        .last_latency_ms
        .map(|ms| format!("{:.1} ms", ms))
        .unwrap_or_else(|| "-".into());

    let latency_style = app
        .last_latency_ms
        .map(|ms| {
            if ms < 200.0 {
                success_style()
            } else if ms < 500.0 {
                highlight_style()
            } else {
                error_style()
            }
        })
        .unwrap_or_else(muted_style);

    let history: Vec<u64> = app.latency_history.iter().copied().collect();

    let text = vec![
        Line::from(vec![
            Span::raw("Result  : ").style(muted_style()),
            Span::raw(&app.last_message).style(text_style()),
        ]),
        Line::from(vec![
            Span::raw("Method  : ").style(muted_style()),
            Span::raw(app.last_method.unwrap_or("-")).style(success_style()),
        ]),
        Line::from(vec![
            Span::raw("Latency : ").style(muted_style()),
            Span::raw(last_latency_str).style(latency_style),
        ]),
        Line::from(vec![
            Span::raw("Trend   : ").style(muted_style()),
            Span::raw(create_mini_sparkline(&history)).style(highlight_style()),
        ]),
    ];

    let paragraph = Paragraph::new(text)
        .block(panel(" Last Call "))
        .wrap(Wrap { trim: false });

    frame.render_widget(paragraph, area);
}

fn draw_load_progress(frame: &mut Frame, area: Rect, app: &App) {
    let progress = if app.load_count > 0 {
        (app.load_finished as f64 / app.load_count as f64 * 100.0).min(100.0) as u16
    } else {
        0
    };

    let label = format!("{}/{}", app.load_finished, app.load_count);

    let gauge = Gauge::default()
        .block(panel(" Load Progress "))
        .gauge_style(success_style())
        .percent(progress)
        .label(label);

    frame.render_widget(gauge, area);
}

fn draw_hedge_config_section(frame: &mut Frame, area: Rect, app: &App) {
    let hedge = app.transport.hedger().config();
    let delay = format!("{}ms", hedge.hedging_delay.as_millis());
    let launch = format!("{:?}", hedge.backup_launch);

    let text = vec![Line::from(vec![
        Span::raw("Backups: ").style(muted_style()),
        Span::raw(hedge.max_backups.to_string()).style(success_style()),
        Span::raw("  │  Delay: ").style(muted_style()),
        Span::raw(delay).style(text_style()),
        Span::raw("  │  ").style(muted_style()),
        Span::raw(launch).style(text_style()),
    ])];

    let paragraph = Paragraph::new(text)
        .block(panel(" Hedge Config "))
        .wrap(Wrap { trim: false });

    frame.render_widget(paragraph, area);
}

fn draw_keybinds(frame: &mut Frame, area: Rect) {
    let keybinds = vec![
        Line::from(vec![
            Span::raw("  ").style(muted_style()),
            Span::raw("↑/↓").style(highlight_style()),
            Span::raw(" Select provider  │  ").style(muted_style()),
            Span::raw("r").style(highlight_style()),
            Span::raw(" Run call  │  ").style(muted_style()),
            Span::raw("m").style(highlight_style()),
            Span::raw(" Next method  │  ").style(muted_style()),
            Span::raw("l").style(highlight_style()),
            Span::raw(" Toggle load run  │  ").style(muted_style()),
            Span::raw(",/.").style(highlight_style()),
            Span::raw(" Load count").style(muted_style()),
        ]),
        Line::from(vec![
            Span::raw("  ").style(muted_style()),
            Span::raw("c").style(highlight_style()),
            Span::raw(" Clear cache      │  ").style(muted_style()),
            Span::raw("x").style(highlight_style()),
            Span::raw(" Reset circuit  │  ").style(muted_style()),
            Span::raw("s").style(highlight_style()),
            Span::raw(" Reset session  │  ").style(muted_style()),
            Span::raw("q").style(highlight_style()),
            Span::raw(" Quit").style(muted_style()),
        ]),
    ];

    let paragraph = Paragraph::new(keybinds)
        .block(panel(" Keybinds "))
        .alignment(Alignment::Left);

    frame.render_widget(paragraph, area);
}
