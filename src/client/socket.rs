//! Socket handle and its driver task.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::client::{ClientConfig, ClientError, ClientEvent, ClientResult, SocketState};
use crate::protocol::{is_authorization_close, WsRequest, WsResponse};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle onto a self-healing connection to the WebSocket port.
///
/// Dropping the handle stops the driver as if `close()` had been called.
pub struct ReconnectingSocket {
    url: Url,
    config: ClientConfig,
    state: watch::Receiver<SocketState>,
    outbound: mpsc::UnboundedSender<String>,
    quit: watch::Sender<bool>,
}

impl ReconnectingSocket {
    /// Start connecting to `url` in the background.
    ///
    /// Returns the handle and the stream of events for the consumer.
    pub fn connect(
        url: &str,
        config: ClientConfig,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let url = Url::parse(url).map_err(|_| ClientError::InvalidUrl(url.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl(url.to_string()));
        }

        let (state_tx, state) = watch::channel(SocketState::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (quit, quit_rx) = watch::channel(false);
        let (events_tx, events) = mpsc::unbounded_channel();

        let driver = Driver {
            url: url.clone(),
            config: config.clone(),
            state: state_tx,
            outbound: outbound_rx,
            quit: quit_rx,
            events: events_tx,
        };
        tokio::spawn(driver.run());

        let socket = Self {
            url,
            config,
            state,
            outbound,
            quit,
        };
        Ok((socket, events))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    /// Wait for `Open`, checking up to `ready_checks` times.
    pub async fn wait_until_open(&self) -> ClientResult<()> {
        for _ in 0..self.config.ready_checks {
            match self.state() {
                SocketState::Open => return Ok(()),
                SocketState::Closed => return Err(ClientError::Closed),
                _ => tokio::time::sleep(self.config.ready_check_interval).await,
            }
        }
        match self.state() {
            SocketState::Open => Ok(()),
            SocketState::Closed => Err(ClientError::Closed),
            _ => Err(ClientError::NotReady {
                checks: self.config.ready_checks,
            }),
        }
    }

    /// Send a command once the socket is open.
    pub async fn send(&self, request: &WsRequest) -> ClientResult<()> {
        self.wait_until_open().await?;
        let text = serde_json::to_string(request).map_err(|e| ClientError::Serialize(e.to_string()))?;
        self.outbound.send(text).map_err(|_| ClientError::Closed)
    }

    pub async fn subscribe(&self, subject: &str) -> ClientResult<()> {
        self.send(&WsRequest::subscribe(subject)).await
    }

    pub async fn unsubscribe(&self, subject: &str) -> ClientResult<()> {
        self.send(&WsRequest::unsubscribe(subject)).await
    }

    /// Close the socket for good. Idempotent.
    pub fn close(&self) {
        self.quit.send_replace(true);
    }

    /// Resolve once the socket has reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        loop {
            if *state.borrow_and_update() == SocketState::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for ReconnectingSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingSocket")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// How a connected session ended.
enum SessionEnd {
    Quit,
    Closed { code: Option<u16>, reason: String },
}

struct Driver {
    url: Url,
    config: ClientConfig,
    state: watch::Sender<SocketState>,
    outbound: mpsc::UnboundedReceiver<String>,
    quit: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Driver {
    async fn run(mut self) {
        let mut retries = 0u32;
        let mut reconnecting = false;

        loop {
            self.state.send_replace(if reconnecting {
                SocketState::Reconnecting
            } else {
                SocketState::Connecting
            });

            let attempt = tokio::select! {
                result = connect_async(self.url.as_str()) => Some(result),
                _ = quit_requested(&mut self.quit) => None,
            };

            let end = match attempt {
                None => SessionEnd::Quit,
                Some(Err(e)) => {
                    tracing::debug!(url = %self.url, error = %e, "WebSocket connect failed");
                    self.emit(ClientEvent::Error(e.to_string()));
                    SessionEnd::Closed {
                        code: None,
                        reason: e.to_string(),
                    }
                }
                Some(Ok((stream, _))) => {
                    retries = 0;
                    self.state.send_replace(SocketState::Open);
                    if reconnecting {
                        tracing::info!(url = %self.url, "WebSocket reconnected");
                        self.emit(ClientEvent::Reconnected);
                    } else {
                        tracing::info!(url = %self.url, "WebSocket opened");
                        self.emit(ClientEvent::Opened);
                    }
                    self.session(stream).await
                }
            };

            let (code, reason) = match end {
                SessionEnd::Quit => {
                    self.finish(Some(u16::from(CloseCode::Normal)), "closed by client".to_string());
                    return;
                }
                SessionEnd::Closed { code, reason } => (code, reason),
            };

            if code.is_some_and(is_authorization_close) {
                tracing::info!(url = %self.url, code = ?code, "WebSocket closed: not authorized");
                self.finish(code, reason);
                return;
            }

            retries += 1;
            if retries > self.config.max_retries {
                tracing::info!(url = %self.url, retries = self.config.max_retries, "WebSocket closed: retries exhausted");
                self.finish(code, reason);
                return;
            }

            tracing::info!(
                url = %self.url,
                attempt = retries,
                max = self.config.max_retries,
                delay = ?self.config.retry_interval,
                "WebSocket will reconnect"
            );
            self.state.send_replace(SocketState::Reconnecting);
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {}
                _ = quit_requested(&mut self.quit) => {
                    self.finish(code, "closed by client".to_string());
                    return;
                }
            }
            reconnecting = true;
        }
    }

    async fn session(&mut self, stream: WsStream) -> SessionEnd {
        let (mut write, mut read): (SplitSink<WsStream, Message>, SplitStream<WsStream>) = stream.split();

        loop {
            tokio::select! {
                _ = quit_requested(&mut self.quit) => {
                    self.state.send_replace(SocketState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Utf8Bytes::from_static(""),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.close().await;
                    return SessionEnd::Quit;
                }

                Some(text) = self.outbound.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        self.emit(ClientEvent::Error(e.to_string()));
                        return SessionEnd::Closed { code: None, reason: e.to_string() };
                    }
                }

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.deliver(text.as_bytes()),
                    Some(Ok(Message::Binary(data))) => self.deliver(&data),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                            None => (None, String::new()),
                        };
                        tracing::debug!(url = %self.url, code = ?code, reason = %reason, "Server closed the socket");
                        return SessionEnd::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.emit(ClientEvent::Error(e.to_string()));
                        return SessionEnd::Closed { code: None, reason: e.to_string() };
                    }
                    None => {
                        return SessionEnd::Closed { code: None, reason: "connection lost".to_string() };
                    }
                },
            }
        }
    }

    fn deliver(&self, payload: &[u8]) {
        match serde_json::from_slice::<WsResponse>(payload) {
            Ok(message) => self.emit(ClientEvent::Message(message)),
            Err(e) => self.emit(ClientEvent::Error(format!("unreadable frame: {}", e))),
        }
    }

    fn finish(&self, code: Option<u16>, reason: String) {
        self.state.send_replace(SocketState::Closed);
        self.emit(ClientEvent::Closed { code, reason });
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// Resolves when `close()` was called or the handle was dropped.
async fn quit_requested(quit: &mut watch::Receiver<bool>) {
    loop {
        if *quit.borrow_and_update() {
            return;
        }
        if quit.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast() -> ClientConfig {
        ClientConfig {
            max_retries: 2,
            retry_interval: Duration::from_millis(20),
            ready_checks: 3,
            ready_check_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let err = ReconnectingSocket::connect("http://localhost:8080", fast()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));

        let err = ReconnectingSocket::connect("not a url", fast()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_bound() {
        // Nothing listens on port 1.
        let (socket, mut events) = ReconnectingSocket::connect("ws://127.0.0.1:1/", fast()).unwrap();

        let mut errors = 0;
        let closed = loop {
            match events.recv().await {
                Some(ClientEvent::Error(_)) => errors += 1,
                Some(ClientEvent::Closed { code, .. }) => break code,
                Some(other) => panic!("unexpected event: {:?}", other),
                None => panic!("driver stopped without a Closed event"),
            }
        };

        // One initial attempt plus two retries.
        assert_eq!(errors, 3);
        assert_eq!(closed, None);
        socket.closed().await;
        assert_eq!(socket.state(), SocketState::Closed);
        assert!(matches!(socket.subscribe("topic").await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_close_during_retry_is_terminal() {
        let config = ClientConfig {
            retry_interval: Duration::from_secs(60),
            ..fast()
        };
        let (socket, mut events) = ReconnectingSocket::connect("ws://127.0.0.1:1/", config).unwrap();

        assert!(matches!(events.recv().await, Some(ClientEvent::Error(_))));
        socket.close();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(ClientEvent::Closed { .. })));
        assert_eq!(socket.state(), SocketState::Closed);
    }
}
