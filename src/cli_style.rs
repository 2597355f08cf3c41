/*!
 * Tether CLI Style System
 *
 * Themed text, tables and status lines for the console front end.
 */

use std::time::Duration;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use tether_core_interface::ActionType;
use tether_core_resilience::{CircuitState, ProtectionMetrics};

use crate::audit::{Event, EventKind};
use crate::core::{ArmingState, StateSnapshot};

// ============================================================================
// THEME COLORS
// ============================================================================

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    /// Primary accent color (cyan/blue)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    /// Muted/secondary text (dim)
    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

/// Unicode icons for visual feedback
pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const LOCK: &'static str = "🔒";
    pub const UNLOCK: &'static str = "🔓";
    pub const CLOCK: &'static str = "⏱";
    pub const SHIELD: &'static str = "🛡";
    pub const LIGHTNING: &'static str = "⚡";
    pub const ARROW_RIGHT: &'static str = "→";
}

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    println!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

// ============================================================================
// STATUS
// ============================================================================

/// Countdown text such as `7.4s`
pub fn format_remaining(remaining: Duration) -> String {
    format!("{:.1}s", remaining.as_secs_f64())
}

/// One-line description of the machine state, without styling
pub fn describe_state(snapshot: &StateSnapshot) -> String {
    match (snapshot.state, snapshot.grace) {
        (ArmingState::GracePeriod, Some(grace)) => format!(
            "{} {} ({} left{})",
            Icons::CLOCK,
            snapshot.state,
            format_remaining(grace.remaining),
            if grace.cancellable {
                ""
            } else {
                ", not cancellable"
            }
        ),
        (ArmingState::Armed, _) => format!("{} armed", Icons::LOCK),
        (ArmingState::Disarmed, _) => format!("{} disarmed", Icons::UNLOCK),
        (ArmingState::Triggered, _) => format!("{} triggered", Icons::LIGHTNING),
        (state, None) => state.to_string(),
    }
}

/// Print the machine state with its theme color
pub fn print_state(snapshot: &StateSnapshot) {
    let text = describe_state(snapshot);
    let styled = match snapshot.state {
        ArmingState::Disarmed => Theme::muted(text),
        ArmingState::Armed => Theme::success(text),
        ArmingState::GracePeriod => Theme::warning(text),
        ArmingState::Triggered => Theme::error(text),
    };
    println!("{} {}", Theme::header("State:"), styled);
}

// ============================================================================
// TABLES
// ============================================================================

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a minimal table (no outer borders)
pub fn create_minimal_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Key-value table for settings summaries
pub fn stats_table(items: &[(&str, String)]) -> Table {
    let mut table = create_minimal_table();

    for (key, value) in items {
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan),
            Cell::new(value)
                .fg(Color::White)
                .add_attribute(Attribute::Bold),
        ]);
    }

    table
}

fn event_color(kind: EventKind) -> Color {
    match kind {
        EventKind::Armed | EventKind::AuthSucceeded | EventKind::AutoArmTriggered => Color::Green,
        EventKind::Disarmed | EventKind::PowerConnected => Color::Grey,
        EventKind::PowerDisconnected | EventKind::GracePeriodStarted => Color::Yellow,
        EventKind::GracePeriodCancelled => Color::Cyan,
        EventKind::ActionsExecuted | EventKind::AuthFailed => Color::Red,
    }
}

/// Audit events, oldest first
pub fn event_table(events: &[Event]) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        Cell::new("Time").add_attribute(Attribute::Bold),
        Cell::new("Event").add_attribute(Attribute::Bold),
        Cell::new("State").add_attribute(Attribute::Bold),
        Cell::new("Details").add_attribute(Attribute::Bold),
    ]);

    for event in events {
        table.add_row(vec![
            Cell::new(event.timestamp.format("%H:%M:%S%.3f")),
            Cell::new(event.kind).fg(event_color(event.kind)),
            Cell::new(event.state.as_str()),
            Cell::new(event.details.as_deref().unwrap_or("")),
        ]);
    }

    table
}

fn circuit_cell(state: &CircuitState) -> Cell {
    let color = match state {
        CircuitState::Closed => Color::Green,
        CircuitState::HalfOpen { .. } => Color::Yellow,
        CircuitState::Open { .. } => Color::Red,
    };
    Cell::new(state.label()).fg(color)
}

/// Per-action protection counters
pub fn metrics_table(rows: &[(ActionType, ProtectionMetrics)]) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        Cell::new("Action").add_attribute(Attribute::Bold),
        Cell::new("Attempts").add_attribute(Attribute::Bold),
        Cell::new("Failures").add_attribute(Attribute::Bold),
        Cell::new("Rate limited").add_attribute(Attribute::Bold),
        Cell::new("Circuit rejections").add_attribute(Attribute::Bold),
        Cell::new("Circuit").add_attribute(Attribute::Bold),
    ]);

    for (action, metrics) in rows {
        table.add_row(vec![
            Cell::new(action.label()),
            Cell::new(metrics.attempts),
            Cell::new(metrics.failures),
            Cell::new(metrics.rate_limited),
            Cell::new(metrics.circuit_rejections),
            circuit_cell(&metrics.circuit_state),
        ]);
    }

    table
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}

/// Print the Tether welcome banner
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!(
        "  {} {}  {}",
        Icons::SHIELD,
        Theme::header("T E T H E R"),
        Theme::muted(format!("v{}", version))
    );
    println!(
        "  {}",
        Theme::muted("Power-loss theft deterrence for unattended machines")
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GraceCountdown;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::from_millis(7_450)), "7.5s");
        assert_eq!(format_remaining(Duration::ZERO), "0.0s");
    }

    #[test]
    fn test_describe_grace_state() {
        let snapshot = StateSnapshot {
            state: ArmingState::GracePeriod,
            grace: Some(GraceCountdown {
                id: 1,
                duration: Duration::from_secs(10),
                remaining: Duration::from_secs(4),
                cancellable: false,
            }),
        };
        let text = describe_state(&snapshot);
        assert!(text.contains("in grace period"));
        assert!(text.contains("4.0s left"));
        assert!(text.contains("not cancellable"));
    }

    #[test]
    fn test_metrics_table_renders_rows() {
        let rows = vec![(
            ActionType::Shutdown,
            ProtectionMetrics {
                attempts: 2,
                failures: 2,
                rate_limited: 1,
                circuit_rejections: 0,
                circuit_state: CircuitState::Closed,
            },
        )];
        let rendered = metrics_table(&rows).to_string();
        assert!(rendered.contains("Shut down"));
        assert!(rendered.contains("Rate limited"));
    }
}
