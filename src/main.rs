//! NATS protocol gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌────────────────────────────────────────────────────────────┐
//!                 │                        NATS PORT                           │
//!                 │                                                            │
//!  HTTP POST ─────┼─▶ http::port ──▶ relay (auth chain) ──▶ backbone request ──┼──▶ NATS
//!                 │                                                            │
//!  WebSocket ─────┼─▶ http::websocket ──▶ relay (auth + namespace)             │
//!                 │         │                                                  │
//!                 │         ▼                                                  │
//!                 │     multiplexer ──(one subscription per key)──▶ backbone ──┼──▶ NATS
//!                 │         │                                                  │
//!  ◀── frames ────┼─────────┘  pump fans each message out to every socket      │
//!                 │                                                            │
//!                 │  config · observability · lifecycle (signals, drain)       │
//!                 └────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use nats_port::config::{load_config, GatewayConfig};
use nats_port::lifecycle::{self, signals};
use nats_port::observability::logging;

#[derive(Parser)]
#[command(name = "nats-port")]
#[command(about = "HTTP and WebSocket gateway for a NATS backbone", long_about = None)]
struct Args {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init(&GatewayConfig::default().observability);
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.observability);

    if args.check {
        tracing::info!("Configuration is valid");
        return ExitCode::SUCCESS;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "nats-port starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backbone = %config.backbone.uri,
        http_path = %config.http.path,
        ws_path = %config.websocket.path,
        auth_subjects = config.auth.subjects.len(),
        "Configuration loaded"
    );

    match lifecycle::run(config, signals::wait_for_signal()).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}
