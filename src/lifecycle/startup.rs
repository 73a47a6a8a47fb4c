//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter
//! - Connect the backbone before accepting traffic
//! - Bind the listener and serve until a signal arrives
//! - Flush the backbone after the server has drained
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::backbone::{Backbone, BackboneError, NatsBackbone};
use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("backbone unavailable: {0}")]
    Backbone(#[from] BackboneError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Run the gateway until `signal` resolves.
pub async fn run<F>(config: GatewayConfig, signal: F) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let nats = Arc::new(NatsBackbone::new(&config.backbone));
    nats.connect().await?;
    tracing::info!(uri = %config.backbone.uri, "Connected to backbone");
    let backbone: Arc<dyn Backbone> = nats;

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

    let server = HttpServer::new(config, Arc::clone(&backbone));
    server.run(listener, signal).await.map_err(StartupError::Serve)?;

    if let Err(e) = backbone.close().await {
        tracing::warn!(error = %e, "Failed to flush backbone");
    }
    tracing::info!("Backbone closed");
    Ok(())
}
