//! Response construction.
//!
//! # Responsibilities
//! - Map a backbone reply onto `{code, body}` and an HTTP status
//! - Pass `set-cookie` from the reply through to the caller
//!
//! # Design Decisions
//! - No other reply headers are forwarded
//! - Status mirrors the envelope code when it is a valid HTTP status

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::backbone::Envelope;
use crate::error::status_for;
use crate::protocol::PortResponse;

/// HTTP response for a backbone reply.
pub fn port_response(reply: Envelope) -> Response {
    let cookies = reply.header_values("set-cookie");
    let status = reply.code.map(status_for).unwrap_or(StatusCode::OK);

    let mut response = (
        status,
        Json(PortResponse {
            code: reply.code,
            body: reply.body,
        }),
    )
        .into_response();

    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(_) => tracing::warn!("Dropping set-cookie value that is not a valid header"),
        }
    }
    response
}
