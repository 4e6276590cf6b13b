//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use ops_lib::{OperationState, ProgressEvent};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or the serializable source as JSON
pub fn print_table<R: Tabled, S: Serialize + ?Sized>(
    rows: Vec<R>,
    source: &S,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return Ok(());
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(source)?,
    }
    Ok(())
}

pub fn print_json<S: Serialize + ?Sized>(value: &S) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// One progress line: terminal states get a status marker, the rest a
/// bracketed state tag
pub fn print_progress(event: &ProgressEvent, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event.state {
        OperationState::Succeeded => print_success(&event.message),
        OperationState::Failed => print_error(&event.message),
        OperationState::TimedOut => print_warning(&event.message),
        state => println!("{} {}", color_state(state), event.message),
    }
    Ok(())
}

pub fn color_state(state: OperationState) -> String {
    let tag = format!("[{}]", state);
    match state {
        OperationState::Pending => tag.dimmed().to_string(),
        OperationState::Mutating => tag.cyan().to_string(),
        OperationState::Converging => tag.blue().to_string(),
        OperationState::Succeeded => tag.green().to_string(),
        OperationState::Failed => tag.red().to_string(),
        OperationState::TimedOut => tag.yellow().to_string(),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "running" | "succeeded" | "active" => status.green().to_string(),
        "pending" | "unknown" | "suppressed" => status.yellow().to_string(),
        "failed" | "firing" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// `{k="v", ...}` rendering of a label set
pub fn format_labels<'a>(labels: impl IntoIterator<Item = (&'a String, &'a String)>) -> String {
    let pairs: Vec<String> = labels
        .into_iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Format timestamp for display
pub fn format_timestamp(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
