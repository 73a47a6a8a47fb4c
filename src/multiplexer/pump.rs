//! Per-entry message pump.
//!
//! One task per subscription entry. It owns the upstream subscription, reads
//! it until told to stop, decodes each payload once and hands the result to
//! every registered handler. Failures turn into a 500 notice for the whole
//! entry; the pump itself keeps running.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::backbone::{Codec, UpstreamSubscription, CODE_OK};
use crate::multiplexer::handler::{ConnectionHandler, DeliveryError};
use crate::observability::metrics;
use crate::protocol::WsResponse;

/// Code delivered to handlers when a message could not be decoded or delivered.
pub const PUMP_FAILURE_CODE: u16 = 500;

/// Handler list shared between the multiplexer queue (writer) and the pump (reader).
pub(crate) type HandlerList = Arc<RwLock<Vec<ConnectionHandler>>>;

pub(crate) struct Pump {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Pump {
    /// Start pumping `subscription` into `handlers`.
    ///
    /// `subject` is the subscriber-facing subject, without namespace suffix.
    pub(crate) fn spawn(
        subject: String,
        subscription: Box<dyn UpstreamSubscription>,
        handlers: HandlerList,
        codec: Codec,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(subject, subscription, handlers, codec, stop_rx));
        Self {
            stop: Some(stop_tx),
            task,
        }
    }

    /// The upstream stream ended on its own.
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the pump and wait until the upstream subscription is released.
    pub(crate) async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!(error = %e, "Message pump task failed");
        }
    }
}

async fn run(
    subject: String,
    mut subscription: Box<dyn UpstreamSubscription>,
    handlers: HandlerList,
    codec: Codec,
    mut stop: oneshot::Receiver<()>,
) {
    tracing::debug!(subject = %subject, upstream = %subscription.subject(), "Message pump started");

    loop {
        let payload = tokio::select! {
            biased;
            _ = &mut stop => break,
            next = subscription.next_message() => match next {
                Some(payload) => payload,
                None => {
                    tracing::warn!(upstream = %subscription.subject(), "Upstream subscription ended");
                    break;
                }
            },
        };

        if payload.is_empty() {
            continue;
        }
        deliver(&subject, &payload, &handlers, codec);
    }

    if let Err(e) = subscription.unsubscribe().await {
        tracing::warn!(upstream = %subscription.subject(), error = %e, "Failed to release upstream subscription");
    }
    tracing::debug!(subject = %subject, "Message pump stopped");
}

/// Decode `payload` once and fan it out to every handler.
pub(crate) fn deliver(subject: &str, payload: &[u8], handlers: &HandlerList, codec: Codec) {
    // Held for the whole fan-out: an unsubscribe that has returned never sees a later frame.
    let handlers = handlers.read().unwrap_or_else(PoisonError::into_inner);

    let message = match codec.decode(payload) {
        Ok(envelope) => WsResponse::message(subject, envelope.code.unwrap_or(CODE_OK), envelope.body),
        Err(e) => {
            tracing::warn!(subject = %subject, error = %e, "Dropping undecodable message");
            metrics::record_pump_failure("decode");
            notify_failure(subject, &handlers, Some(Value::String(e.to_string())));
            return;
        }
    };

    let mut delivered = 0usize;
    let mut failed = 0usize;
    for handler in handlers.iter() {
        match handler.on_handle.handle(&message) {
            Ok(()) => delivered += 1,
            // The socket is gone and its release is already queued.
            Err(DeliveryError::Disconnected) => {
                tracing::debug!(
                    subject = %subject,
                    connection_id = %handler.connection_id,
                    "Skipping closed connection"
                );
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(
                    subject = %subject,
                    connection_id = %handler.connection_id,
                    error = %e,
                    "Handler rejected message"
                );
            }
        }
    }
    metrics::record_pump_delivery(delivered);

    if failed > 0 {
        metrics::record_pump_failure("handler");
        notify_failure(subject, &handlers, None);
    }
}

fn notify_failure(subject: &str, handlers: &[ConnectionHandler], body: Option<Value>) {
    let notice = WsResponse::error(Some(subject), PUMP_FAILURE_CODE, body);
    for handler in handlers {
        let _ = handler.on_handle.handle(&notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::handler::MessageHandler;
    use crate::net::ConnectionId;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<WsResponse>>>, ConnectionHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_handle: Arc<dyn MessageHandler> =
            Arc::new(move |message: &WsResponse| -> Result<(), DeliveryError> {
                sink.lock().unwrap().push(message.clone());
                Ok(())
            });
        (
            seen,
            ConnectionHandler {
                connection_id: ConnectionId::new(),
                on_handle,
            },
        )
    }

    fn failing() -> ConnectionHandler {
        let on_handle: Arc<dyn MessageHandler> =
            Arc::new(|message: &WsResponse| -> Result<(), DeliveryError> {
                if message.code == PUMP_FAILURE_CODE {
                    Ok(())
                } else {
                    Err(DeliveryError::Serialize("unsupported body".to_string()))
                }
            });
        ConnectionHandler {
            connection_id: ConnectionId::new(),
            on_handle,
        }
    }

    #[test]
    fn test_deliver_decodes_once_for_all_handlers() {
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let handlers: HandlerList = Arc::new(RwLock::new(vec![first, second]));

        deliver("topic1", br#"{"code":200,"body":"x"}"#, &handlers, Codec::Json);

        let expected = WsResponse::message("topic1", 200, Some(Value::String("x".into())));
        assert_eq!(*first_seen.lock().unwrap(), vec![expected.clone()]);
        assert_eq!(*second_seen.lock().unwrap(), vec![expected]);
    }

    #[test]
    fn test_decode_failure_notifies_every_handler() {
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let handlers: HandlerList = Arc::new(RwLock::new(vec![first, second]));

        deliver("topic1", b"{broken", &handlers, Codec::Json);

        for seen in [first_seen, second_seen] {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].code, PUMP_FAILURE_CODE);
            assert_eq!(seen[0].subject.as_deref(), Some("topic1"));
        }
    }

    #[test]
    fn test_handler_failure_notifies_every_handler() {
        let (seen, healthy) = recorder();
        let handlers: HandlerList = Arc::new(RwLock::new(vec![failing(), healthy]));

        deliver("topic1", br#"{"code":200,"body":1}"#, &handlers, Codec::Json);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].code, 200);
        assert_eq!(seen[1].code, PUMP_FAILURE_CODE);
    }

    #[test]
    fn test_closed_connection_is_skipped_silently() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<WsResponse>();
        drop(rx);
        let on_handle: Arc<dyn MessageHandler> =
            Arc::new(move |message: &WsResponse| -> Result<(), DeliveryError> {
                tx.send(message.clone()).map_err(|_| DeliveryError::Disconnected)
            });
        let closed = ConnectionHandler {
            connection_id: ConnectionId::new(),
            on_handle,
        };
        let (seen, healthy) = recorder();
        let handlers: HandlerList = Arc::new(RwLock::new(vec![closed, healthy]));

        deliver("topic1", br#"{"code":200,"body":"x"}"#, &handlers, Codec::Json);

        let expected = WsResponse::message("topic1", 200, Some(Value::String("x".into())));
        assert_eq!(*seen.lock().unwrap(), vec![expected]);
    }
}
