//! NATS protocol gateway library.
//!
//! Bridges a NATS backbone to HTTP request-reply and WebSocket subscriptions,
//! with one upstream subscription per subject shared by every interested socket.

pub mod backbone;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod multiplexer;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod relay;

pub use backbone::{Backbone, MemoryBackbone, NatsBackbone};
pub use client::{ClientConfig, ClientEvent, ReconnectingSocket};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use multiplexer::Multiplexer;
