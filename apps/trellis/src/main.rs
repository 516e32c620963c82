//! # Trellis
//!
//! The command line binary for the Trellis object-graph mapper.
//!
//! ## Usage
//!
//! ```bash
//! # Inspect the schema declared in trellis.toml
//! trellis types
//!
//! # Create, link and query entities
//! trellis create Person -s name=alice -s age=30
//! trellis link node:1 friends node:2
//! trellis lookup Person name alice --json
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // TRELLIS_LOG_FORMAT=json enables machine-parseable logs.
    let log_format = std::env::var("TRELLIS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "trellis=debug,trellis_core=debug"
    } else {
        "trellis=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries command output.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = cli::execute(cli, &mut stdout) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
