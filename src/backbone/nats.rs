//! NATS implementation of the backbone.
//!
//! # Responsibilities
//! - Establish one connection lazily and share it across all callers
//! - Map async-nats request failures onto `BackboneError`
//! - Expose core NATS subscriptions as `UpstreamSubscription`

use std::time::Duration;

use async_nats::{Client, ConnectOptions, RequestErrorKind, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::backbone::types::{BackboneError, BackboneResult};
use crate::backbone::{Backbone, UpstreamSubscription};
use crate::config::BackboneConfig;

/// Lazily-connected NATS client.
pub struct NatsBackbone {
    uri: String,
    user: Option<String>,
    pass: Option<String>,
    request_timeout: Duration,
    client: OnceCell<Client>,
}

impl NatsBackbone {
    pub fn new(config: &BackboneConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            user: config.user.clone(),
            pass: config.pass.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            client: OnceCell::new(),
        }
    }

    /// Return the shared client, connecting on first use.
    pub async fn connect(&self) -> BackboneResult<&Client> {
        self.client
            .get_or_try_init(|| async {
                let mut options = ConnectOptions::new()
                    .name("nats-port")
                    .request_timeout(Some(self.request_timeout));
                if let (Some(user), Some(pass)) = (&self.user, &self.pass) {
                    options = options.user_and_password(user.clone(), pass.clone());
                }

                tracing::info!(uri = %self.uri, "Connecting to NATS");
                let client = options.connect(self.uri.as_str()).await.map_err(|e| {
                    BackboneError::Connect {
                        uri: self.uri.clone(),
                        reason: e.to_string(),
                    }
                })?;
                tracing::info!(uri = %self.uri, "Connected to NATS");
                Ok::<_, BackboneError>(client)
            })
            .await
    }
}

#[async_trait]
impl Backbone for NatsBackbone {
    async fn request(&self, subject: &str, payload: Bytes, deadline: Duration) -> BackboneResult<Bytes> {
        let client = self.connect().await?;

        match timeout(deadline, client.request(subject.to_string(), payload)).await {
            Ok(Ok(message)) => Ok(message.payload),
            Ok(Err(e)) => Err(match e.kind() {
                RequestErrorKind::TimedOut => BackboneError::Timeout {
                    subject: subject.to_string(),
                    timeout: deadline,
                },
                RequestErrorKind::NoResponders => BackboneError::NoResponders(subject.to_string()),
                _ => BackboneError::Request {
                    subject: subject.to_string(),
                    reason: e.to_string(),
                },
            }),
            Err(_) => Err(BackboneError::Timeout {
                subject: subject.to_string(),
                timeout: deadline,
            }),
        }
    }

    async fn subscribe(&self, subject: &str) -> BackboneResult<Box<dyn UpstreamSubscription>> {
        let client = self.connect().await?;
        let inner = client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BackboneError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(subject = %subject, "Opened NATS subscription");
        Ok(Box::new(NatsSubscription {
            subject: subject.to_string(),
            inner,
        }))
    }

    async fn close(&self) -> BackboneResult<()> {
        if let Some(client) = self.client.get() {
            client
                .flush()
                .await
                .map_err(|e| BackboneError::Close(e.to_string()))?;
            tracing::info!(uri = %self.uri, "NATS connection flushed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for NatsBackbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBackbone")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("connected", &self.client.initialized())
            .finish()
    }
}

struct NatsSubscription {
    subject: String,
    inner: Subscriber,
}

#[async_trait]
impl UpstreamSubscription for NatsSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next_message(&mut self) -> Option<Bytes> {
        self.inner.next().await.map(|message| message.payload)
    }

    async fn unsubscribe(&mut self) -> BackboneResult<()> {
        self.inner
            .unsubscribe()
            .await
            .map_err(|e| BackboneError::Unsubscribe {
                subject: self.subject.clone(),
                reason: e.to_string(),
            })
    }
}
