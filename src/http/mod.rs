//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, CORS, timeout, body limit, request ID)
//!     → POST <http.path>
//!         → request.rs (validate headers and `{data}` body)
//!         → port.rs (relay, then backbone request-reply)
//!         → response.rs (`{code, body}`, status, set-cookie)
//!     → GET <websocket.path> (upgrade)
//!         → websocket.rs (per-connection command loop)
//!     → GET /health
//! ```

pub mod port;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
