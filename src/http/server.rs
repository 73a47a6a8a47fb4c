//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the port, WebSocket and health handlers
//! - Wire up middleware (tracing, CORS, timeout, body limit, request ID)
//! - Bind server to listener
//! - On shutdown: stop accepting, close sockets, drain the multiplexer

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::backbone::{Backbone, EnvelopeClient};
use crate::config::{CorsConfig, GatewayConfig};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::{port, websocket};
use crate::lifecycle::Shutdown;
use crate::multiplexer::Multiplexer;
use crate::net::ConnectionTracker;
use crate::relay::Relay;

/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub client: EnvelopeClient,
    pub relay: Relay,
    pub multiplexer: Multiplexer,
    pub connections: ConnectionTracker,
    pub shutdown: Shutdown,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server over `backbone`.
    ///
    /// Spawns the multiplexer, so it must be called inside a Tokio runtime.
    pub fn new(config: GatewayConfig, backbone: Arc<dyn Backbone>) -> Self {
        let codec = config.backbone.codec;
        let client = EnvelopeClient::new(Arc::clone(&backbone), codec, config.backbone.request_timeout());
        let relay = Relay::new(client.clone(), config.auth.clone());
        let multiplexer = Multiplexer::spawn(backbone, codec);

        let state = AppState {
            config: Arc::new(config),
            client,
            relay,
            multiplexer,
            connections: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
        };

        let router = Self::build_router(&state);
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: &AppState) -> Router {
        let config = &state.config;
        let http_path = config.http.path.as_str();
        let ws_path = config.websocket.path.as_str();

        let mut router = Router::new().route(HEALTH_PATH, get(health));
        router = if http_path == ws_path {
            router.route(http_path, post(port::handle).get(websocket::upgrade))
        } else {
            router
                .route(http_path, post(port::handle))
                .route(ws_path, get(websocket::upgrade))
        };

        // Outermost first: the request ID exists before tracing starts.
        let middleware = ServiceBuilder::new()
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id_layer())
            .layer(cors_layer(&config.cors))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                Duration::from_secs(config.http.request_timeout_secs),
            ))
            .layer(MapResponseBodyLayer::new(axum::body::Body::new))
            .layer(RequestBodyLimitLayer::new(config.http.max_body_size));

        router
            .with_state(state.clone())
            .layer(DefaultBodyLimit::disable())
            .layer(middleware)
    }

    /// Run the server until `signal` resolves, then drain.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            http_path = %self.state.config.http.path,
            ws_path = %self.state.config.websocket.path,
            "HTTP server starting"
        );

        let shutdown = self.state.shutdown.clone();
        let graceful = async move {
            signal.await;
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app).with_graceful_shutdown(graceful).await?;

        let grace = Duration::from_secs(self.state.config.listener.shutdown_grace_secs);
        if !self.state.connections.wait_for_idle(grace).await {
            tracing::warn!(
                remaining = self.state.connections.active_count(),
                "WebSocket connections still open after grace period"
            );
        }

        if let Err(e) = self.state.multiplexer.shutdown().await {
            tracing::warn!(error = %e, "Multiplexer already stopped");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }
}

/// CORS policy for the configured origins.
///
/// A wildcard origin combined with credentials mirrors the caller's origin,
/// since browsers reject `*` on credentialed requests.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);

    let origins = if config.allows_any_origin() {
        if config.credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::from(Any)
        }
    } else {
        let list: Vec<HeaderValue> = config
            .origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };

    if config.credentials {
        layer
            .allow_origin(origins)
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        layer.allow_origin(origins).allow_headers(Any)
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    connections: u64,
    subscriptions: usize,
    handlers: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.connections.active_count();
    match state.multiplexer.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(HealthStatus {
                status: "ok",
                connections,
                subscriptions: stats.entries,
                handlers: stats.handlers,
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthStatus {
                status: "shutting_down",
                connections,
                subscriptions: 0,
                handlers: 0,
            }),
        ),
    }
}
