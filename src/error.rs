//! Gateway error taxonomy.
//!
//! Every failure a request or WebSocket command can hit maps onto one
//! variant here, and each variant carries the envelope code the caller sees.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use thiserror::Error;

use crate::backbone::BackboneError;
use crate::multiplexer::MultiplexerError;
use crate::protocol::PortResponse;

pub const CODE_BAD_REQUEST: u16 = 400;
pub const CODE_INTERNAL: u16 = 500;
pub const CODE_BAD_GATEWAY: u16 = 502;
pub const CODE_GATEWAY_TIMEOUT: u16 = 504;

/// Gateway error type.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed request; nothing was sent to the backbone.
    #[error("invalid request: {0}")]
    Validation(String),

    /// An authorization hop answered with a non-200 code.
    #[error("authorization rejected with code {code}")]
    Authorization { code: u16, body: Option<Value> },

    /// Namespace lookup failed or returned no namespace.
    #[error("namespace resolution failed with code {code}")]
    NamespaceResolution { code: u16, body: Option<Value> },

    /// A backbone call hit its deadline.
    #[error("backbone timeout: {0}")]
    UpstreamTimeout(String),

    /// Backbone transport failure other than a timeout.
    #[error("backbone error: {0}")]
    Upstream(String),

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Unexpected(String),
}

impl GatewayError {
    /// Envelope code reported to the caller.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) => CODE_BAD_REQUEST,
            Self::Authorization { code, .. } | Self::NamespaceResolution { code, .. } => *code,
            Self::UpstreamTimeout(_) => CODE_GATEWAY_TIMEOUT,
            Self::Upstream(_) => CODE_BAD_GATEWAY,
            Self::Decode(_) | Self::Unexpected(_) => CODE_INTERNAL,
        }
    }

    /// Envelope body reported to the caller.
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::Authorization { body, .. } | Self::NamespaceResolution { body, .. } => body.clone(),
            other => Some(Value::String(other.to_string())),
        }
    }

    /// Rejections that close a WebSocket instead of answering on it.
    pub fn closes_socket(&self) -> bool {
        matches!(self, Self::Authorization { .. } | Self::NamespaceResolution { .. })
    }
}

/// HTTP status for an envelope code: the code itself when it is a valid status, else 500.
pub fn status_for(code: u16) -> StatusCode {
    if (100..=599).contains(&code) {
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<BackboneError> for GatewayError {
    fn from(e: BackboneError) -> Self {
        match e {
            BackboneError::Timeout { .. } => Self::UpstreamTimeout(e.to_string()),
            BackboneError::Decode(_) => Self::Decode(e.to_string()),
            BackboneError::Encode(_) => Self::Unexpected(e.to_string()),
            _ => Self::Upstream(e.to_string()),
        }
    }
}

impl From<MultiplexerError> for GatewayError {
    fn from(e: MultiplexerError) -> Self {
        match e {
            MultiplexerError::Backbone(e) => e.into(),
            MultiplexerError::Closed => Self::Unexpected(MultiplexerError::Closed.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = PortResponse {
            code: Some(code),
            body: self.body(),
        };
        (status_for(code), Json(body)).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
