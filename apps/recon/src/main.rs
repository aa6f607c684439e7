//! # Recon
//!
//! The main binary for the recon graph engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for graph operations and transforms
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              apps/recon (THE BINARY)             │
//! │                                                  │
//! │  ┌─────────────┐    ┌─────────────┐              │
//! │  │   CLI       │    │   HTTP API  │              │
//! │  │  (clap)     │    │   (axum)    │              │
//! │  └──────┬──────┘    └──────┬──────┘              │
//! │         └─────────┬────────┘                     │
//! │                   ▼                              │
//! │   ┌──────────────┐     ┌──────────────────┐      │
//! │   │  recon-core  │◄────│ recon-transforms │      │
//! │   │ (THE LOGIC)  │     │  (enrichment)    │      │
//! │   └──────────────┘     └──────────────────┘      │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! recon add -f seeds.json
//! recon transform '*' --select '[type = "domain"]' --group
//! recon traverse 'nodes | leaves'
//! recon server --port 8080
//! ```

use clap::Parser;
use recon::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // RECON_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("RECON_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "recon=info,recon_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
