//! Shared utilities for gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use bytes::Bytes;
use nats_port::backbone::{BackboneError, Envelope, MemoryBackbone};
use nats_port::client::{ClientConfig, ClientEvent};
use nats_port::config::GatewayConfig;
use nats_port::protocol::WsResponse;
use nats_port::HttpServer;

/// A gateway served on an ephemeral port over an in-process backbone.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub backbone: Arc<MemoryBackbone>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestGateway {
    pub fn http_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger graceful shutdown and wait for the server to finish draining.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(10), &mut self.task).await;
    }
}

/// Start a gateway; `configure` adjusts the test defaults first.
pub async fn spawn_gateway<F>(configure: F) -> TestGateway
where
    F: FnOnce(&mut GatewayConfig),
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = GatewayConfig::default();
    config.listener.bind_address = addr.to_string();
    config.listener.shutdown_grace_secs = 2;
    config.backbone.request_timeout_secs = 1;
    config.observability.metrics_enabled = false;
    configure(&mut config);

    let backbone = Arc::new(MemoryBackbone::new());
    let server = HttpServer::new(config, backbone.clone());

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let signal = async move {
            let _ = stopped.await;
        };
        let _ = server.run(listener, signal).await;
    });

    TestGateway {
        addr,
        backbone,
        stop: Some(stop),
        task,
    }
}

/// Answer every request on `subject` with a fixed reply.
pub fn answer(backbone: &MemoryBackbone, subject: &str, reply: Value) {
    backbone.respond(subject, move |_payload| {
        let reply = reply.clone();
        async move { Ok::<_, BackboneError>(Bytes::from(serde_json::to_vec(&reply).unwrap())) }
    });
}

/// Answer every request on `subject` with `{code: 200, body: <request body>}`.
pub fn echo(backbone: &MemoryBackbone, subject: &str) {
    backbone.respond(subject, |payload| async move {
        let request: Envelope = serde_json::from_slice(&payload).unwrap();
        let reply = Envelope {
            headers: None,
            body: request.body,
            code: Some(200),
        };
        Ok::<_, BackboneError>(Bytes::from(serde_json::to_vec(&reply).unwrap()))
    });
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Client tuning that keeps tests fast.
pub fn fast_client() -> ClientConfig {
    ClientConfig {
        max_retries: 3,
        retry_interval: Duration::from_millis(100),
        ready_checks: 50,
        ready_check_interval: Duration::from_millis(20),
    }
}

/// Next event, or `None` after `timeout`.
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    timeout: Duration,
) -> Option<ClientEvent> {
    tokio::time::timeout(timeout, events.recv()).await.ok().flatten()
}

/// Next pushed message, skipping other events.
pub async fn next_message(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    timeout: Duration,
) -> Option<WsResponse> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match next_event(events, remaining).await? {
            ClientEvent::Message(message) => return Some(message),
            ClientEvent::Closed { .. } => return None,
            _ => continue,
        }
    }
}
