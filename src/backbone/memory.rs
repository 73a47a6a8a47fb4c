//! In-process backbone.
//!
//! A tiny broker with exact-subject matching. Responders are registered per
//! subject, publishes fan out to every open subscription on that subject, and
//! counters record what the gateway did so callers can assert on it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::backbone::types::{BackboneError, BackboneResult};
use crate::backbone::{Backbone, UpstreamSubscription};

type Responder = Arc<dyn Fn(Bytes) -> BoxFuture<'static, BackboneResult<Bytes>> + Send + Sync>;
type SubscriberTable = DashMap<String, Vec<(u64, mpsc::UnboundedSender<Bytes>)>>;

#[derive(Default)]
pub struct MemoryBackbone {
    responders: DashMap<String, Responder>,
    subscribers: Arc<SubscriberTable>,
    next_subscription_id: AtomicU64,
    opened: DashMap<String, usize>,
    requests: DashMap<String, usize>,
}

impl MemoryBackbone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request on `subject` with `handler`.
    pub fn respond<F, Fut>(&self, subject: &str, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BackboneResult<Bytes>> + Send + 'static,
    {
        let responder: Responder =
            Arc::new(move |payload: Bytes| -> BoxFuture<'static, BackboneResult<Bytes>> {
                Box::pin(handler(payload))
            });
        self.responders.insert(subject.to_string(), responder);
    }

    /// Publish `payload` on `subject`. Returns how many subscriptions received it.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let Some(subscribers) = self.subscribers.get(subject) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|(_, tx)| tx.send(payload.clone()).is_ok())
            .count()
    }

    /// Total subscriptions ever opened on `subject`.
    pub fn subscriptions_opened(&self, subject: &str) -> usize {
        self.opened.get(subject).map(|n| *n).unwrap_or(0)
    }

    /// Subscriptions currently open on `subject`.
    pub fn active_subscriptions(&self, subject: &str) -> usize {
        self.subscribers.get(subject).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Requests received on `subject`, answered or not.
    pub fn request_count(&self, subject: &str) -> usize {
        self.requests.get(subject).map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl Backbone for MemoryBackbone {
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BackboneResult<Bytes> {
        *self.requests.entry(subject.to_string()).or_insert(0) += 1;

        let responder = self
            .responders
            .get(subject)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| BackboneError::NoResponders(subject.to_string()))?;

        match tokio::time::timeout(timeout, responder(payload)).await {
            Ok(reply) => reply,
            Err(_) => Err(BackboneError::Timeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn subscribe(&self, subject: &str) -> BackboneResult<Box<dyn UpstreamSubscription>> {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));
        *self.opened.entry(subject.to_string()).or_insert(0) += 1;

        Ok(Box::new(MemorySubscription {
            subject: subject.to_string(),
            id,
            rx,
            table: Arc::clone(&self.subscribers),
            released: false,
        }))
    }

    async fn close(&self) -> BackboneResult<()> {
        self.subscribers.clear();
        Ok(())
    }
}

struct MemorySubscription {
    subject: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Bytes>,
    table: Arc<SubscriberTable>,
    released: bool,
}

impl MemorySubscription {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.rx.close();

        let now_empty = match self.table.get_mut(&self.subject) {
            Some(mut subs) => {
                subs.retain(|(id, _)| *id != self.id);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.table.remove_if(&self.subject, |_, subs| subs.is_empty());
        }
    }
}

#[async_trait]
impl UpstreamSubscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next_message(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> BackboneResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}
