//! Terminal colors and status-line formatting.
//!
//! Color is decided once at startup by [`init_colors`]:
//! - `NO_COLOR` set (any value): never color (https://no-color.org/)
//! - `CLICOLOR_FORCE` set and not `0`: always color
//! - `CLICOLOR=0`: never color
//! - otherwise: color only when stdout is a terminal

use colored::{ColoredString, Colorize, control};

pub fn init_colors() {
    control::set_override(color_enabled(
        std::env::var_os("NO_COLOR").is_some(),
        std::env::var("CLICOLOR_FORCE").ok().as_deref(),
        std::env::var("CLICOLOR").ok().as_deref(),
        std::io::IsTerminal::is_terminal(&std::io::stdout()),
    ));
}

fn color_enabled(
    no_color: bool,
    clicolor_force: Option<&str>,
    clicolor: Option<&str>,
    is_tty: bool,
) -> bool {
    if no_color {
        return false;
    }
    if clicolor_force.is_some_and(|v| v != "0") {
        return true;
    }
    if clicolor == Some("0") {
        return false;
    }
    is_tty
}

/// `==> message`, the heading style for advisory output
pub fn ohai(message: &str) -> String {
    format!("{} {}", "==>".blue().bold(), message.bold())
}

pub fn check() -> ColoredString {
    "✓".green()
}

pub fn cross() -> ColoredString {
    "✗".red()
}

pub fn warning() -> ColoredString {
    "⚠".yellow()
}
