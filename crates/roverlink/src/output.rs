//! Output formatting: table, JSON, plain.
//!
//! Table rendering uses `tabled`; structured output goes through serde.
//! Plain mode emits one identifier per line for scripting.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::OutputFormat;

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled rows in the chosen format.
pub fn render_list<R>(format: &OutputFormat, rows: &[R], id_fn: impl Fn(&R) -> String) -> String
where
    R: Tabled + serde::Serialize,
{
    match format {
        OutputFormat::Table => render_table(rows),
        OutputFormat::Json => render_json(rows),
        OutputFormat::Plain => rows.iter().map(id_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single item. Table mode uses a pre-formatted detail block,
/// since detail views don't use the `Tabled` derive.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data),
        OutputFormat::Plain => id_fn(data),
    }
}

/// Print rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// A status line, colorized on interactive terminals.
pub fn note(message: &str, quiet: bool) {
    if quiet {
        return;
    }
    if io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err() {
        println!("{}", message.dimmed());
    } else {
        println!("{message}");
    }
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

// ── Small display helpers ────────────────────────────────────────────

/// Visual signal bar for scan output.
pub fn signal_bar(signal: u8) -> &'static str {
    match signal {
        80..=100 => "████",
        60..=79 => "███░",
        40..=59 => "██░░",
        20..=39 => "█░░░",
        _ => "░░░░",
    }
}

/// Mask a password for display, capping the mask length.
pub fn mask_password(password: &str) -> String {
    "*".repeat(password.chars().count().min(12))
}
