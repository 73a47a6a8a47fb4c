//! Authorization chain.

use crate::backbone::{Envelope, Headers};
use crate::error::{GatewayError, GatewayResult, CODE_INTERNAL};
use crate::observability::metrics;
use crate::relay::Relay;

impl Relay {
    /// Run `headers` through every configured authorization subject.
    ///
    /// Returns the last hop's headers, or the original headers when `subject`
    /// needs no authorization.
    pub async fn authenticate(&self, subject: &str, headers: Headers) -> GatewayResult<Headers> {
        if !self.config.requires_auth(subject) {
            return Ok(headers);
        }

        let mut current = headers;
        for hop in &self.config.subjects {
            tracing::debug!(subject = %subject, hop = %hop, "Sending authorization request");

            let reply = match self.client.request(hop, &Envelope::request(current.clone(), None)).await {
                Ok(reply) => reply,
                Err(e) => {
                    metrics::record_relay_hop("auth", "error");
                    tracing::warn!(subject = %subject, hop = %hop, error = %e, "Authorization hop failed");
                    return Err(e.into());
                }
            };

            let code = reply.code.unwrap_or(CODE_INTERNAL);
            if !reply.is_success() {
                metrics::record_relay_hop("auth", "rejected");
                tracing::info!(subject = %subject, hop = %hop, code, "Authorization rejected");
                return Err(GatewayError::Authorization {
                    code,
                    body: reply.body,
                });
            }

            metrics::record_relay_hop("auth", "ok");
            if let Some(next) = reply.headers {
                current = next;
            }
        }

        Ok(current)
    }
}
