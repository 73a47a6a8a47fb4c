//! HTTP port: `Validate → Authenticate → Forward → Respond`.

use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::backbone::Envelope;
use crate::error::GatewayError;
use crate::http::request::{headers_from_http, request_id, validate_port_request};
use crate::http::response::port_response;
use crate::http::server::AppState;
use crate::observability::metrics;

/// `POST <http.path>` handler.
pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let request_id = request_id(&headers).to_string();

    let response = match forward(&state, &headers, &body, &request_id).await {
        Ok(response) => response,
        Err(e) => {
            tracing::info!(request_id = %request_id, code = e.code(), error = %e, "Port request failed");
            e.into_response()
        }
    };

    metrics::record_http_request(response.status().as_u16(), start);
    response
}

async fn forward(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
    request_id: &str,
) -> Result<Response, GatewayError> {
    let request = validate_port_request(headers, body)?;
    tracing::debug!(
        request_id = %request_id,
        subject = %request.subject,
        trace_id = request.trace_id.as_deref().unwrap_or("-"),
        "Port request validated"
    );

    let auth_headers = state
        .relay
        .authenticate(&request.subject, headers_from_http(headers))
        .await?;

    tracing::info!(request_id = %request_id, subject = %request.subject, "Forwarding request");
    let reply = state
        .client
        .request(&request.subject, &Envelope::request(auth_headers, request.data))
        .await?;

    tracing::debug!(request_id = %request_id, subject = %request.subject, code = ?reply.code, "Backbone replied");
    Ok(port_response(reply))
}
