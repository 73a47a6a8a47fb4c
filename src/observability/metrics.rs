//! Metrics collection and exposition.
//!
//! # Metrics
//! - `nats_port_http_requests_total` (counter): HTTP port requests by status
//! - `nats_port_http_request_duration_seconds` (histogram): HTTP port latency
//! - `nats_port_ws_connections` (gauge): open WebSocket connections
//! - `nats_port_upstream_subscriptions` (gauge): live multiplexer entries
//! - `nats_port_relay_hops_total` (counter): relay calls by stage and outcome
//! - `nats_port_pump_deliveries_total` (counter): messages handed to handlers
//! - `nats_port_pump_failures_total` (counter): 500 notices by cause

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_http_request(status: u16, start: Instant) {
    let status = status.to_string();
    counter!("nats_port_http_requests_total", "status" => status).increment(1);
    histogram!("nats_port_http_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn ws_connection_opened() {
    gauge!("nats_port_ws_connections").increment(1.0);
}

pub fn ws_connection_closed() {
    gauge!("nats_port_ws_connections").decrement(1.0);
}

pub fn set_upstream_subscriptions(count: usize) {
    gauge!("nats_port_upstream_subscriptions").set(count as f64);
}

/// `stage` is `auth` or `namespace`; `outcome` is `ok`, `rejected` or `error`.
pub fn record_relay_hop(stage: &'static str, outcome: &'static str) {
    counter!("nats_port_relay_hops_total", "stage" => stage, "outcome" => outcome).increment(1);
}

pub fn record_pump_delivery(handlers: usize) {
    counter!("nats_port_pump_deliveries_total").increment(handlers as u64);
}

pub fn record_pump_failure(cause: &'static str) {
    counter!("nats_port_pump_failures_total", "cause" => cause).increment(1);
}
