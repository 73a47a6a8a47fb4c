//! Envelope-level request-reply on top of the raw backbone.

use std::sync::Arc;
use std::time::Duration;

use crate::backbone::codec::Codec;
use crate::backbone::types::{BackboneResult, Envelope};
use crate::backbone::Backbone;

/// Encodes envelopes, sends them with a bounded deadline and decodes the reply.
#[derive(Clone)]
pub struct EnvelopeClient {
    backbone: Arc<dyn Backbone>,
    codec: Codec,
    timeout: Duration,
}

impl EnvelopeClient {
    pub fn new(backbone: Arc<dyn Backbone>, codec: Codec, timeout: Duration) -> Self {
        Self {
            backbone,
            codec,
            timeout,
        }
    }

    /// Send `envelope` to `subject` and decode the reply.
    pub async fn request(&self, subject: &str, envelope: &Envelope) -> BackboneResult<Envelope> {
        let payload = self.codec.encode(envelope)?;
        let reply = self.backbone.request(subject, payload, self.timeout).await?;
        self.codec.decode(&reply)
    }

    pub fn backbone(&self) -> &Arc<dyn Backbone> {
        &self.backbone
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for EnvelopeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeClient")
            .field("codec", &self.codec)
            .field("timeout", &self.timeout)
            .finish()
    }
}
