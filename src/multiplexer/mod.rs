//! Subscription multiplexer.
//!
//! # Data Flow
//! ```text
//! WebSocket connections (many, concurrent)
//!     → Multiplexer handle (clone per connection)
//!     → FIFO command queue (mpsc, one consumer)
//!     → queue task: sole owner of key → SubscriptionEntry
//!         → first handler for a key: open upstream subscription, spawn pump
//!         → last handler gone: stop pump, release upstream subscription
//!
//! pump.rs (one per entry)
//!     upstream message → decode once → every handler of that entry
//! ```
//!
//! # Design Decisions
//! - Every mutation is a queued command; the queue task applies them one at
//!   a time in enqueue order, so two connections racing on a brand-new key
//!   can never open two upstream subscriptions
//! - Callers await the command's reply, so a returned `subscribe` means the
//!   handler is registered and a returned `unsubscribe` means no further
//!   frame reaches it
//! - Handler lists are shared with the pump read-only; only the queue task
//!   writes them

pub mod handler;
pub mod pump;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::backbone::{Backbone, BackboneError, Codec};
use crate::net::ConnectionId;
use crate::observability::metrics;

pub use handler::{ConnectionHandler, DeliveryError, MessageHandler, SubscriptionKey};
use pump::{HandlerList, Pump};

/// Errors surfaced by multiplexer operations.
#[derive(Debug, Clone, Error)]
pub enum MultiplexerError {
    /// Opening the upstream subscription failed.
    #[error(transparent)]
    Backbone(#[from] BackboneError),

    /// The queue task has shut down.
    #[error("subscription multiplexer is shut down")]
    Closed,
}

pub type MultiplexerResult<T> = Result<T, MultiplexerError>;

/// What a `subscribe` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// First handler for the key: a new upstream subscription was opened.
    Opened,
    /// Joined an existing entry.
    Joined,
    /// This connection was already subscribed to the key.
    AlreadySubscribed,
}

/// Snapshot of multiplexer state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Live entries, equal to open upstream subscriptions.
    pub entries: usize,
    /// Connection handlers across all entries.
    pub handlers: usize,
}

enum Command {
    Subscribe {
        connection_id: ConnectionId,
        subject: String,
        namespace: Option<String>,
        on_handle: Arc<dyn MessageHandler>,
        reply: oneshot::Sender<MultiplexerResult<SubscribeOutcome>>,
    },
    Unsubscribe {
        connection_id: ConnectionId,
        subject: String,
        namespace: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    UnsubscribeAll {
        connection_id: ConnectionId,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<MultiplexerStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle onto the multiplexer's queue.
#[derive(Clone)]
pub struct Multiplexer {
    tx: mpsc::UnboundedSender<Command>,
}

impl Multiplexer {
    /// Start the queue task on the current runtime.
    pub fn spawn(backbone: Arc<dyn Backbone>, codec: Codec) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Queue {
            backbone,
            codec,
            entries: HashMap::new(),
        };
        tokio::spawn(queue.run(rx));
        Self { tx }
    }

    /// Register `on_handle` for `(subject, namespace)` on behalf of `connection_id`.
    pub async fn subscribe(
        &self,
        connection_id: ConnectionId,
        subject: &str,
        namespace: Option<&str>,
        on_handle: Arc<dyn MessageHandler>,
    ) -> MultiplexerResult<SubscribeOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            connection_id,
            subject: subject.to_string(),
            namespace: namespace.map(str::to_string),
            on_handle,
            reply,
        })?;
        rx.await.map_err(|_| MultiplexerError::Closed)?
    }

    /// Remove `connection_id`'s handler for `(subject, namespace)`.
    ///
    /// Returns whether a handler was removed.
    pub async fn unsubscribe(
        &self,
        connection_id: ConnectionId,
        subject: &str,
        namespace: Option<&str>,
    ) -> MultiplexerResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unsubscribe {
            connection_id,
            subject: subject.to_string(),
            namespace: namespace.map(str::to_string),
            reply,
        })?;
        rx.await.map_err(|_| MultiplexerError::Closed)
    }

    /// Remove every handler owned by `connection_id`.
    ///
    /// Returns the number of memberships removed.
    pub async fn unsubscribe_all_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> MultiplexerResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UnsubscribeAll {
            connection_id,
            reply,
        })?;
        rx.await.map_err(|_| MultiplexerError::Closed)
    }

    pub async fn stats(&self) -> MultiplexerResult<MultiplexerStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| MultiplexerError::Closed)
    }

    /// Release every upstream subscription and stop the queue.
    ///
    /// Commands enqueued before this one still run; later ones fail with `Closed`.
    pub async fn shutdown(&self) -> MultiplexerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| MultiplexerError::Closed)
    }

    fn send(&self, command: Command) -> MultiplexerResult<()> {
        self.tx.send(command).map_err(|_| MultiplexerError::Closed)
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

struct SubscriptionEntry {
    subject: String,
    handlers: HandlerList,
    pump: Pump,
}

impl SubscriptionEntry {
    fn contains(&self, connection_id: ConnectionId) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|h| h.connection_id == connection_id)
    }

    fn handler_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Remove the connection's handler. Returns `(removed, now_empty)`.
    fn remove(&self, connection_id: ConnectionId) -> (bool, bool) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| h.connection_id != connection_id);
        (handlers.len() < before, handlers.is_empty())
    }
}

struct Queue {
    backbone: Arc<dyn Backbone>,
    codec: Codec,
    entries: HashMap<SubscriptionKey, SubscriptionEntry>,
}

impl Queue {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Subscription multiplexer started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Subscribe {
                    connection_id,
                    subject,
                    namespace,
                    on_handle,
                    reply,
                } => {
                    let key = SubscriptionKey::new(&subject, namespace.as_deref());
                    let handler = ConnectionHandler {
                        connection_id,
                        on_handle,
                    };
                    let result = self.subscribe(key, subject, handler).await;
                    let _ = reply.send(result);
                }
                Command::Unsubscribe {
                    connection_id,
                    subject,
                    namespace,
                    reply,
                } => {
                    let key = SubscriptionKey::new(&subject, namespace.as_deref());
                    let removed = self.unsubscribe(&key, connection_id).await;
                    let _ = reply.send(removed);
                }
                Command::UnsubscribeAll {
                    connection_id,
                    reply,
                } => {
                    let removed = self.unsubscribe_all(connection_id).await;
                    let _ = reply.send(removed);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown { reply } => {
                    self.drain().await;
                    rx.close();
                    let _ = reply.send(());
                }
            }
            metrics::set_upstream_subscriptions(self.entries.len());
        }

        tracing::debug!("Subscription multiplexer stopped");
    }

    async fn subscribe(
        &mut self,
        key: SubscriptionKey,
        subject: String,
        handler: ConnectionHandler,
    ) -> MultiplexerResult<SubscribeOutcome> {
        let connection_id = handler.connection_id;

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.contains(connection_id) {
                return Ok(SubscribeOutcome::AlreadySubscribed);
            }

            if entry.pump.is_finished() {
                tracing::info!(key = %key, "Re-opening ended upstream subscription");
                let subscription = self.backbone.subscribe(key.as_str()).await?;
                entry.pump = Pump::spawn(
                    entry.subject.clone(),
                    subscription,
                    Arc::clone(&entry.handlers),
                    self.codec,
                );
            }

            entry
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handler);
            tracing::debug!(key = %key, connection_id = %connection_id, "Joined subscription");
            return Ok(SubscribeOutcome::Joined);
        }

        let subscription = self.backbone.subscribe(key.as_str()).await?;
        let handlers: HandlerList = Arc::new(RwLock::new(vec![handler]));
        let pump = Pump::spawn(subject.clone(), subscription, Arc::clone(&handlers), self.codec);

        tracing::info!(key = %key, connection_id = %connection_id, "Opened upstream subscription");
        self.entries.insert(
            key,
            SubscriptionEntry {
                subject,
                handlers,
                pump,
            },
        );
        Ok(SubscribeOutcome::Opened)
    }

    async fn unsubscribe(&mut self, key: &SubscriptionKey, connection_id: ConnectionId) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return false;
        };

        let (removed, now_empty) = entry.remove(connection_id);
        if removed {
            tracing::debug!(key = %key, connection_id = %connection_id, "Left subscription");
        }

        if now_empty {
            if let Some(entry) = self.entries.remove(key) {
                entry.pump.stop().await;
                tracing::info!(key = %key, "Closed upstream subscription");
            }
        }
        removed
    }

    async fn unsubscribe_all(&mut self, connection_id: ConnectionId) -> usize {
        let mut keys: Vec<SubscriptionKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.contains(connection_id))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();

        let mut removed = 0;
        for key in keys {
            if self.unsubscribe(&key, connection_id).await {
                removed += 1;
            }
        }
        removed
    }

    fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            entries: self.entries.len(),
            handlers: self.entries.values().map(SubscriptionEntry::handler_count).sum(),
        }
    }

    async fn drain(&mut self) {
        let count = self.entries.len();
        for (key, entry) in self.entries.drain() {
            entry.pump.stop().await;
            tracing::debug!(key = %key, "Drained upstream subscription");
        }
        tracing::info!(subscriptions = count, "Subscription multiplexer drained");
    }
}
