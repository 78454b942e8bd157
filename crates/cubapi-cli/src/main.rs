//! cubapi CLI
//!
//! Inspect and apply the cubapi schema migrations by hand.

use anyhow::Result;
use clap::Parser;
use cubapi_telemetry::{init_logging, LogFormat, LoggingConfig};

mod cli;
mod commands;
mod output;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&logging_config(cli.verbose, cli.json))?;

    cli.execute().await
}

/// Map `-v` repetitions onto a default filter. `RUST_LOG` still wins.
fn logging_config(verbose: u8, json: bool) -> LoggingConfig {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let format = if json { LogFormat::Json } else { LogFormat::Text };

    LoggingConfig::new()
        .with_level(level)
        .with_format(format)
        .with_target(verbose > 1)
        .with_service_name("cubctl")
}
