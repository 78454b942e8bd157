//! Terminal and JSON output for `cubctl`.

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use cubapi_migrations::MigrationStatus;
use serde::Serialize;

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output.
    Json,
}

impl OutputFormat {
    /// Create an output format from a JSON flag.
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

#[derive(Clone, Copy)]
enum Tone {
    Ok,
    Fail,
    Warn,
    Note,
}

impl Tone {
    fn marker(self) -> ColoredString {
        match self {
            Self::Ok => "✓".green().bold(),
            Self::Fail => "✗".red().bold(),
            Self::Warn => "⚠".yellow().bold(),
            Self::Note => "ℹ".blue().bold(),
        }
    }
}

fn emit(tone: Tone, message: &str) {
    match tone {
        Tone::Ok | Tone::Note => println!("{} {message}", tone.marker()),
        Tone::Fail | Tone::Warn => eprintln!("{} {message}", tone.marker()),
    }
}

/// Print a success line.
pub fn success(message: &str) {
    emit(Tone::Ok, message);
}

/// Print an error line to stderr.
pub fn error(message: &str) {
    emit(Tone::Fail, message);
}

/// Print a warning line to stderr.
pub fn warning(message: &str) {
    emit(Tone::Warn, message);
}

/// Print an informational line.
pub fn info(message: &str) {
    emit(Tone::Note, message);
}

/// Print an indented `key: value` line.
pub fn key_value(key: &str, value: &str) {
    println!("  {}: {value}", key.bold());
}

/// Print a section header.
pub fn section(title: &str) {
    println!("\n{}", title.bold().underline());
}

/// Marker shown next to a migration in status listings.
pub fn status_marker(status: MigrationStatus, drift: bool) -> ColoredString {
    match status {
        MigrationStatus::Applied if drift => "!".yellow().bold(),
        MigrationStatus::Applied => "✓".green(),
        MigrationStatus::Pending => "○".normal(),
        MigrationStatus::Skipped => "✗".red(),
    }
}

/// Format a timestamp for humans.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Shorten a checksum to its first 12 hex digits.
pub fn short_checksum(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

/// Envelope for `--json` output.
#[derive(Debug, Serialize)]
pub struct CommandResult<T: Serialize> {
    /// Whether the command succeeded.
    pub success: bool,
    /// Result data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    /// Successful result carrying `data`.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Attach data, e.g. the issues behind a failure.
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    /// Print as pretty JSON, or as a one-line summary in text mode.
    ///
    /// Text mode only prints the error; commands render their own data.
    pub fn print(&self, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(self)?),
            OutputFormat::Text => {
                if let Some(ref err) = self.error {
                    error(err);
                }
            }
        }
        Ok(())
    }
}
