//! Gateway wire types shared by the HTTP endpoint, the WebSocket endpoint
//! and the client socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backbone::Headers;

/// Header carrying the target backbone subject.
pub const SUBJECT_HEADER: &str = "nats-subject";

/// Optional correlation header accepted on HTTP requests.
pub const TRACE_ID_HEADER: &str = "trace-id";

/// Base of the private close-code range used to carry a failure code.
pub const CLOSE_CODE_BASE: u16 = 4000;

/// Close codes the gateway sends when the relay rejects a connection.
pub const AUTH_CLOSE_CODES: [u16; 2] = [CLOSE_CODE_BASE + 401, CLOSE_CODE_BASE + 403];

/// Map a relay failure code onto a WebSocket close code.
///
/// Codes below 1000 land in the private range (401 → 4401); anything else
/// collapses to the bare base code.
pub fn close_code_for(code: u16) -> u16 {
    if code < 1000 {
        CLOSE_CODE_BASE + code
    } else {
        CLOSE_CODE_BASE
    }
}

/// Whether a close code means the server refused the connection's credentials.
pub fn is_authorization_close(close_code: u16) -> bool {
    AUTH_CLOSE_CODES.contains(&close_code)
}

/// Subscription command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Client → server WebSocket command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsRequest {
    pub subject: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

impl WsRequest {
    pub fn subscribe(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            action: Action::Subscribe,
            headers: None,
        }
    }

    pub fn unsubscribe(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            action: Action::Unsubscribe,
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Loosely-typed form of [`WsRequest`] as it arrives off the socket.
///
/// Shape problems are left for validation so they answer 400 instead of the
/// 500 reserved for unparseable frames.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWsRequest {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub headers: Option<Headers>,
}

/// Server → client WebSocket frame: a published message or an error notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl WsResponse {
    pub fn message(subject: &str, code: u16, body: Option<Value>) -> Self {
        Self {
            subject: Some(subject.to_string()),
            code,
            body,
        }
    }

    pub fn error(subject: Option<&str>, code: u16, body: Option<Value>) -> Self {
        Self {
            subject: subject.map(str::to_string),
            code,
            body,
        }
    }
}

/// HTTP request body: `{ data }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// HTTP response body: `{ code, body }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}
