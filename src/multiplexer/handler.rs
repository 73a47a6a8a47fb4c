//! Subscription keys and per-connection message handlers.

use std::sync::Arc;

use thiserror::Error;

use crate::net::ConnectionId;
use crate::protocol::WsResponse;

/// Multiplexing key: `subject`, or `subject.namespace` when a tenant namespace applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn new(subject: &str, namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) => Self(format!("{}.{}", subject, ns)),
            None => Self(subject.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A handler could not take a message.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The receiving side of the connection has gone away.
    #[error("connection is no longer accepting messages")]
    Disconnected,

    #[error("failed to serialize message: {0}")]
    Serialize(String),
}

/// Receives every message published on the keys a connection subscribed to.
///
/// Called from the entry's pump task while it holds the handler list, so
/// implementations must not block.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &WsResponse) -> Result<(), DeliveryError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&WsResponse) -> Result<(), DeliveryError> + Send + Sync + 'static,
{
    fn handle(&self, message: &WsResponse) -> Result<(), DeliveryError> {
        self(message)
    }
}

/// One connection's membership in a subscription entry.
#[derive(Clone)]
pub struct ConnectionHandler {
    pub connection_id: ConnectionId,
    pub on_handle: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}
