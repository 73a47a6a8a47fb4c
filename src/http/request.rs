//! Request handling and validation.
//!
//! # Responsibilities
//! - Attach a UUID request ID to every request and echo it on the response
//! - Convert HTTP headers into envelope headers
//! - Validate port requests before anything reaches the backbone
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Validation failures never touch the backbone

use axum::http::{header, HeaderMap, HeaderName};
use bytes::Bytes;
use serde_json::Value;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::backbone::Headers;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{PortRequest, SUBJECT_HEADER, TRACE_ID_HEADER};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer assigning a UUID v4 request ID when the caller sent none.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Layer copying the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Request ID of an inbound request, or `unknown`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Envelope headers from HTTP headers.
///
/// Names are lower-case; repeated headers become arrays; values that are not
/// visible ASCII are dropped.
pub fn headers_from_http(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for name in headers.keys() {
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string()))
            .collect();

        match values.len() {
            0 => {}
            1 => {
                out.insert(name.as_str().to_string(), values.into_iter().next().unwrap_or(Value::Null));
            }
            _ => {
                out.insert(name.as_str().to_string(), Value::Array(values));
            }
        }
    }
    out
}

/// A port request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPortRequest {
    pub subject: String,
    pub trace_id: Option<String>,
    pub data: Option<Value>,
}

/// Check the `nats-subject`, `trace-id` and `content-type` headers and the `{data}` body.
pub fn validate_port_request(headers: &HeaderMap, body: &Bytes) -> GatewayResult<ValidatedPortRequest> {
    let subject = match headers.get(SUBJECT_HEADER).map(|v| v.to_str()) {
        Some(Ok(subject)) if !subject.trim().is_empty() => subject.trim().to_string(),
        Some(Ok(_)) | None => {
            return Err(GatewayError::Validation(format!("missing {} header", SUBJECT_HEADER)));
        }
        Some(Err(_)) => {
            return Err(GatewayError::Validation(format!("{} header is not a string", SUBJECT_HEADER)));
        }
    };

    let trace_id = match headers.get(TRACE_ID_HEADER).map(|v| v.to_str()) {
        Some(Ok(id)) => Some(id.trim().to_string()),
        Some(Err(_)) => {
            return Err(GatewayError::Validation(format!("{} header is not a string", TRACE_ID_HEADER)));
        }
        None => None,
    };

    if let Some(Err(_)) = headers.get(header::CONTENT_TYPE).map(|v| v.to_str()) {
        return Err(GatewayError::Validation("content-type header is not a string".to_string()));
    }

    let data = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::Validation(format!("body is not JSON: {}", e)))?;
        if !value.is_object() {
            return Err(GatewayError::Validation("body must be a JSON object".to_string()));
        }
        let request: PortRequest = serde_json::from_value(value)
            .map_err(|e| GatewayError::Validation(format!("malformed body: {}", e)))?;
        request.data
    };

    Ok(ValidatedPortRequest {
        subject,
        trace_id,
        data,
    })
}
