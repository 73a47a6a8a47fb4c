//! Messaging backbone subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway operation
//!     → client.rs (envelope encode, bounded request-reply)
//!     → Backbone trait (one shared handle per process)
//!         → nats.rs   (async-nats, lazily connected)
//!         → memory.rs (in-process broker for tests and embedding)
//!     ← reply bytes → codec.rs (envelope decode)
//! ```
//!
//! # Design Decisions
//! - The backbone is an explicit `Arc<dyn Backbone>` built at startup and
//!   closed at shutdown; nothing reaches for a global connection
//! - Every request-reply call carries its own deadline
//! - Payloads are opaque bytes at this layer; envelopes live above it

pub mod client;
pub mod codec;
pub mod memory;
pub mod nats;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use client::EnvelopeClient;
pub use codec::Codec;
pub use memory::MemoryBackbone;
pub use nats::NatsBackbone;
pub use types::{BackboneError, BackboneResult, Envelope, Headers, CODE_OK};

/// Request-reply and subscribe primitives shared by every gateway component.
#[async_trait]
pub trait Backbone: Send + Sync + 'static {
    /// Send `payload` to `subject` and wait up to `timeout` for the first reply.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BackboneResult<Bytes>;

    /// Open a subscription on `subject`.
    async fn subscribe(&self, subject: &str) -> BackboneResult<Box<dyn UpstreamSubscription>>;

    /// Flush pending traffic before the process exits.
    async fn close(&self) -> BackboneResult<()>;
}

/// A live subscription on the backbone.
#[async_trait]
pub trait UpstreamSubscription: Send {
    /// Subject this subscription listens on.
    fn subject(&self) -> &str;

    /// Next message payload, or `None` once the subscription has ended.
    async fn next_message(&mut self) -> Option<Bytes>;

    /// Stop receiving messages and release the subscription upstream.
    async fn unsubscribe(&mut self) -> BackboneResult<()>;
}
