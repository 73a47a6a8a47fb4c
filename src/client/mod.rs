//! Reconnecting WebSocket client for the gateway's subscription port.
//!
//! # State Machine
//! ```text
//! Connecting ──open──▶ Open ──abnormal close──▶ Reconnecting ──open──▶ Open
//!     │                 │                           │
//!     │                 ├── close() ──▶ Closing ──▶ Closed
//!     │                 └── 4401 / 4403 ──────────▶ Closed
//!     └── retries exhausted (from Connecting or Reconnecting) ──▶ Closed
//! ```
//!
//! # Design Decisions
//! - One driver task owns the socket; the handle talks to it through channels
//! - The retry counter resets on every successful open
//! - Sends wait for `Open` with a bounded number of checks

mod socket;

use std::time::Duration;

use thiserror::Error;

use crate::protocol::WsResponse;

pub use socket::ReconnectingSocket;

/// Retry and ready-state tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect attempts after an abnormal close before giving up.
    pub max_retries: u32,
    /// Delay before each reconnect attempt.
    pub retry_interval: Duration,
    /// Ready-state checks a send performs before failing.
    pub ready_checks: u32,
    /// Delay between ready-state checks.
    pub ready_check_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(5),
            ready_checks: 10,
            ready_check_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

/// Notifications delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// First successful open.
    Opened,
    /// Open again after a reconnect.
    Reconnected,
    /// A frame pushed by the gateway.
    Message(WsResponse),
    Error(String),
    /// Terminal: no further reconnects will happen.
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("invalid WebSocket URL '{0}'")]
    InvalidUrl(String),

    #[error("socket did not open after {checks} checks")]
    NotReady { checks: u32 },

    #[error("socket is closed")]
    Closed,

    #[error("failed to serialize request: {0}")]
    Serialize(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
