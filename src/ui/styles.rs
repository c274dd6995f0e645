//! Color scheme and styling for the TUI dashboard.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders},
};
use rpc_resilience::CircuitState;

pub const HEADER_BG: Color = Color::Rgb(30, 30, 46);
pub const HEADER_FG: Color = Color::Rgb(180, 190, 254);

pub const TABLE_HEADER_FG: Color = Color::Rgb(137, 180, 250);

pub const SELECTED_BG: Color = Color::Rgb(137, 180, 250);
pub const SELECTED_FG: Color = Color::Black;

pub const SUCCESS_COLOR: Color = Color::Rgb(166, 227, 161);
pub const ERROR_COLOR: Color = Color::Rgb(243, 139, 168);
pub const WARNING_COLOR: Color = Color::Rgb(249, 226, 175);

pub const BORDER_COLOR: Color = Color::Rgb(69, 71, 90);
pub const TEXT_COLOR: Color = Color::Rgb(205, 214, 244);
pub const MUTED_COLOR: Color = Color::Rgb(127, 132, 156);

pub fn header_style() -> Style {
    Style::default()
        .bg(HEADER_BG)
        .fg(HEADER_FG)
        .add_modifier(Modifier::BOLD)
}

pub fn panel_title_style() -> Style {
    text_style().add_modifier(Modifier::BOLD)
}

/// Bordered block with a bold title, used by every dashboard panel.
pub fn panel<'a>(title: impl Into<Line<'a>>) -> Block<'a> {
    Block::default()
        .title(title.into())
        .title_style(panel_title_style())
        .borders(Borders::ALL)
        .border_style(border_style())
}

pub fn table_header_style() -> Style {
    Style::default()
        .fg(TABLE_HEADER_FG)
        .add_modifier(Modifier::BOLD)
}

pub fn selected_row_style() -> Style {
    Style::default()
        .bg(SELECTED_BG)
        .fg(SELECTED_FG)
        .add_modifier(Modifier::BOLD)
}

pub fn border_style() -> Style {
    Style::default().fg(BORDER_COLOR)
}

pub fn text_style() -> Style {
    Style::default().fg(TEXT_COLOR)
}

pub fn success_style() -> Style {
    Style::default()
        .fg(SUCCESS_COLOR)
        .add_modifier(Modifier::BOLD)
}

pub fn error_style() -> Style {
    Style::default()
        .fg(ERROR_COLOR)
        .add_modifier(Modifier::BOLD)
}

pub fn highlight_style() -> Style {
    Style::default()
        .fg(WARNING_COLOR)
        .add_modifier(Modifier::BOLD)
}

pub fn muted_style() -> Style {
    Style::default().fg(MUTED_COLOR)
}

/// Green when closed, amber while probing, red when open.
pub fn circuit_style(state: CircuitState) -> Style {
    match state {
        CircuitState::Closed => success_style(),
        CircuitState::HalfOpen => highlight_style(),
        CircuitState::Open => error_style(),
    }
}
