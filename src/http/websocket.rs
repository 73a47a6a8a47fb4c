//! WebSocket port.
//!
//! # Responsibilities
//! - Accept upgrades and give each socket a connection ID
//! - Run the per-connection command loop: parse, validate, relay, dispatch
//! - Push multiplexer deliveries down the socket through a writer task
//! - Release every membership when the socket closes
//!
//! # Data Flow
//! ```text
//! client frame {subject, action, headers?}
//!     → parse (500 on failure)
//!     → merge headers (connection headers win) + nats-subject
//!     → validate (400 on failure)
//!     → relay authenticate / get_namespace (close 4000+code on rejection)
//!     → multiplexer subscribe / unsubscribe
//!
//! multiplexer delivery → on_handle → writer channel → socket
//! ```
//!
//! # Design Decisions
//! - Frames from one connection are handled one at a time, in arrival order
//! - The writer task is the only owner of the socket sink

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::backbone::Headers;
use crate::error::{GatewayError, GatewayResult, CODE_INTERNAL};
use crate::http::request::headers_from_http;
use crate::http::server::AppState;
use crate::multiplexer::{DeliveryError, MessageHandler};
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::protocol::{close_code_for, Action, RawWsRequest, WsResponse, SUBJECT_HEADER};

/// Close code sent when the server is shutting down.
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer gets to flush after the command loop ends.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// `GET <websocket.path>` handler.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>, headers: HeaderMap) -> Response {
    let connection_headers = headers_from_http(&headers);
    ws.on_upgrade(move |socket| serve(socket, state, connection_headers))
}

enum Flow {
    Continue,
    Close,
    Shutdown,
}

/// One accepted socket, bound to a connection ID for its whole lifetime.
struct Connection {
    id: ConnectionId,
    headers: Headers,
    tx: mpsc::UnboundedSender<Message>,
    on_handle: Arc<dyn MessageHandler>,
}

impl Connection {
    fn new(id: ConnectionId, headers: Headers, tx: mpsc::UnboundedSender<Message>) -> Self {
        let sink = tx.clone();
        let on_handle: Arc<dyn MessageHandler> =
            Arc::new(move |message: &WsResponse| -> Result<(), DeliveryError> {
                let text =
                    serde_json::to_string(message).map_err(|e| DeliveryError::Serialize(e.to_string()))?;
                sink.send(Message::Text(text.into()))
                    .map_err(|_| DeliveryError::Disconnected)
            });
        Self {
            id,
            headers,
            tx,
            on_handle,
        }
    }

    fn send(&self, response: &WsResponse) {
        if let Err(e) = self.on_handle.handle(response) {
            tracing::debug!(error = %e, "Dropping response for closed connection");
        }
    }

    fn close(&self, code: u16, reason: String) {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = self.tx.send(Message::Close(Some(frame)));
    }
}

async fn serve(socket: WebSocket, state: AppState, headers: Headers) {
    let guard = state.connections.track();
    let id = guard.id();
    let span = tracing::info_span!("ws", connection_id = %id);

    async move {
        metrics::ws_connection_opened();
        tracing::info!("WebSocket connected");

        let (ws_tx, ws_rx) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut writer: JoinHandle<()> = tokio::spawn(write_loop(ws_tx, rx));

        let connection = Connection::new(id, headers, tx);
        read_loop(&state, &connection, ws_rx).await;

        match state.multiplexer.unsubscribe_all_for_connection(id).await {
            Ok(removed) => tracing::debug!(removed, "Released subscriptions"),
            Err(e) => tracing::warn!(error = %e, "Failed to release subscriptions"),
        }

        // The writer ends once every sender clone is gone.
        drop(connection);
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }

        metrics::ws_connection_closed();
        tracing::info!("WebSocket disconnected");
        drop(guard);
    }
    .instrument(span)
    .await
}

async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if ws_tx.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

async fn read_loop(state: &AppState, connection: &Connection, mut ws_rx: SplitStream<WebSocket>) {
    let mut shutdown = state.shutdown.subscribe();
    if state.shutdown.is_triggered() {
        connection.close(CLOSE_GOING_AWAY, "server shutting down".to_string());
        return;
    }

    let keepalive_secs = state.config.websocket.keepalive_secs;
    let period = Duration::from_secs(keepalive_secs.max(1));
    let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.recv() => Event::Shutdown,
            frame = ws_rx.next() => Event::Frame(frame),
            _ = keepalive.tick(), if keepalive_secs > 0 => Event::Keepalive,
        };

        let flow = match event {
            Event::Shutdown => Flow::Shutdown,
            Event::Keepalive => match connection.tx.send(Message::Ping(Bytes::new())) {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            },
            Event::Frame(frame) => {
                // A relay hop can take up to the backbone timeout; shutdown must not wait for it.
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => Flow::Shutdown,
                    flow = handle_message(state, connection, frame) => flow,
                }
            }
        };

        match flow {
            Flow::Continue => {}
            Flow::Close => break,
            Flow::Shutdown => {
                connection.close(CLOSE_GOING_AWAY, "server shutting down".to_string());
                break;
            }
        }
    }
}

/// What woke the command loop.
enum Event {
    Shutdown,
    Frame(Option<Result<Message, axum::Error>>),
    Keepalive,
}

async fn handle_message(
    state: &AppState,
    connection: &Connection,
    frame: Option<Result<Message, axum::Error>>,
) -> Flow {
    match frame {
        Some(Ok(Message::Text(text))) => handle_frame(state, connection, text.as_str()).await,
        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
            Ok(text) => handle_frame(state, connection, text).await,
            Err(e) => {
                connection.send(&WsResponse::error(None, CODE_INTERNAL, Some(Value::String(e.to_string()))));
                Flow::Continue
            }
        },
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Flow::Continue,
        Some(Ok(Message::Close(frame))) => {
            tracing::debug!(close = ?frame, "Client closed the socket");
            Flow::Close
        }
        Some(Err(e)) => {
            tracing::debug!(error = %e, "WebSocket read failed");
            Flow::Close
        }
        None => Flow::Close,
    }
}

/// Handle one client frame. Never fails; problems become envelopes or a close.
async fn handle_frame(state: &AppState, connection: &Connection, text: &str) -> Flow {
    tracing::debug!(frame = %text, "Incoming frame");

    let raw = match parse_frame(text) {
        Ok(raw) => raw,
        Err(FrameError::Unparseable(e)) => {
            tracing::info!(error = %e, "Unparseable frame");
            connection.send(&WsResponse::error(None, CODE_INTERNAL, Some(Value::String(e.to_string()))));
            return Flow::Continue;
        }
        Err(FrameError::Invalid { subject, error }) => {
            tracing::info!(subject = subject.as_deref().unwrap_or("-"), error = %error, "Malformed command");
            connection.send(&WsResponse::error(subject.as_deref(), error.code(), error.body()));
            return Flow::Continue;
        }
    };
    let subject = raw.subject.clone();

    match dispatch(state, connection, raw).await {
        Ok(()) => Flow::Continue,
        Err(e) if e.closes_socket() => {
            let code = e.code();
            tracing::info!(subject = subject.as_deref().unwrap_or("-"), code, "Closing rejected connection");
            connection.close(close_code_for(code), json!({ "code": code }).to_string());
            Flow::Close
        }
        Err(e) => {
            let code = match e {
                GatewayError::Validation(_) => e.code(),
                _ => CODE_INTERNAL,
            };
            tracing::info!(subject = subject.as_deref().unwrap_or("-"), code, error = %e, "Command failed");
            connection.send(&WsResponse::error(subject.as_deref(), code, e.body()));
            Flow::Continue
        }
    }
}

#[derive(Debug)]
enum FrameError {
    /// Not JSON at all.
    Unparseable(serde_json::Error),
    /// JSON, but not a `{subject, action, headers}` object.
    Invalid {
        subject: Option<String>,
        error: GatewayError,
    },
}

/// Read `{subject?, action?, headers?}` out of a client frame.
///
/// Field types are checked by hand so a wrongly typed field is a validation
/// error; the subject is kept whenever it is a string.
fn parse_frame(text: &str) -> Result<RawWsRequest, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::Unparseable)?;
    let Value::Object(mut fields) = value else {
        return Err(invalid(None, "frame must be a JSON object"));
    };

    let subject = match fields.remove("subject") {
        None | Some(Value::Null) => None,
        Some(Value::String(subject)) => Some(subject),
        Some(_) => return Err(invalid(None, "subject must be a string")),
    };
    let action = match fields.remove("action") {
        None | Some(Value::Null) => None,
        Some(Value::String(action)) => Some(action),
        Some(_) => return Err(invalid(subject, "action must be a string")),
    };
    let headers = match fields.remove("headers") {
        None | Some(Value::Null) => None,
        Some(Value::Object(headers)) => Some(headers),
        Some(_) => return Err(invalid(subject, "headers must be an object")),
    };

    Ok(RawWsRequest {
        subject,
        action,
        headers,
    })
}

fn invalid(subject: Option<String>, message: &str) -> FrameError {
    FrameError::Invalid {
        subject,
        error: GatewayError::Validation(message.to_string()),
    }
}

async fn dispatch(state: &AppState, connection: &Connection, raw: RawWsRequest) -> GatewayResult<()> {
    let subject = raw
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::Validation("missing subject".to_string()))?
        .to_string();

    let action = match raw.action.as_deref() {
        Some(action) => Action::parse(action)
            .ok_or_else(|| GatewayError::Validation(format!("unsupported action '{}'", action)))?,
        None => return Err(GatewayError::Validation("missing action".to_string())),
    };

    let mut headers = raw.headers.unwrap_or_default();
    for (name, value) in &connection.headers {
        headers.insert(name.clone(), value.clone());
    }
    headers.insert(SUBJECT_HEADER.to_string(), Value::String(subject.clone()));

    let headers = state.relay.authenticate(&subject, headers).await?;
    let namespace = state.relay.get_namespace(&subject, &headers).await?;

    match action {
        Action::Subscribe => {
            let outcome = state
                .multiplexer
                .subscribe(connection.id, &subject, namespace.as_deref(), Arc::clone(&connection.on_handle))
                .await?;
            tracing::debug!(subject = %subject, namespace = ?namespace, outcome = ?outcome, "Subscribed");
        }
        Action::Unsubscribe => {
            let removed = state
                .multiplexer
                .unsubscribe(connection.id, &subject, namespace.as_deref())
                .await?;
            tracing::debug!(subject = %subject, namespace = ?namespace, removed, "Unsubscribed");
        }
    }
    Ok(())
}
