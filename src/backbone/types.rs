//! Envelope types and error definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Header set carried inside an envelope: lower-case name → string or array of strings.
pub type Headers = serde_json::Map<String, Value>;

/// Success code used by every backbone service.
pub const CODE_OK: u16 = 200;

/// The `{headers, body, code}` structure exchanged with backbone services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl Envelope {
    /// Build an outgoing request envelope.
    pub fn request(headers: Headers, body: Option<Value>) -> Self {
        Self {
            headers: Some(headers),
            body,
            code: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(CODE_OK)
    }

    /// All values of a header, flattening array-valued entries.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        let Some(value) = self.headers.as_ref().and_then(|h| h.get(name)) else {
            return Vec::new();
        };
        match value {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Errors that can occur while talking to the backbone.
#[derive(Debug, Clone, Error)]
pub enum BackboneError {
    /// Connection could not be established.
    #[error("failed to connect to {uri}: {reason}")]
    Connect { uri: String, reason: String },

    /// No reply arrived before the deadline.
    #[error("request to '{subject}' timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    /// Nobody is listening on the subject.
    #[error("no responders for '{0}'")]
    NoResponders(String),

    /// Request failed for another transport reason.
    #[error("request to '{subject}' failed: {reason}")]
    Request { subject: String, reason: String },

    #[error("subscribe to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("unsubscribe from '{subject}' failed: {reason}")]
    Unsubscribe { subject: String, reason: String },

    #[error("failed to encode envelope: {0}")]
    Encode(String),

    #[error("failed to decode envelope: {0}")]
    Decode(String),

    /// Flushing the connection at shutdown failed.
    #[error("failed to close backbone connection: {0}")]
    Close(String),
}

/// Result type for backbone operations.
pub type BackboneResult<T> = Result<T, BackboneError>;
