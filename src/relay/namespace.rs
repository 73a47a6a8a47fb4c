//! Tenant namespace resolution.

use serde_json::{json, Value};

use crate::backbone::{Envelope, Headers, CODE_OK};
use crate::error::{GatewayError, GatewayResult, CODE_INTERNAL};
use crate::observability::metrics;
use crate::relay::Relay;

impl Relay {
    /// Resolve the namespace for `subject`.
    ///
    /// `Ok(None)` when `subject` is not namespace-scoped.
    pub async fn get_namespace(&self, subject: &str, headers: &Headers) -> GatewayResult<Option<String>> {
        if !self.config.is_namespaced(subject) {
            return Ok(None);
        }

        let Some(lookup) = self.config.namespace_subject.as_deref() else {
            return Err(GatewayError::Unexpected(format!(
                "no namespace subject configured for '{}'",
                subject
            )));
        };

        let request = Envelope::request(headers.clone(), Some(json!({ "subject": subject })));
        let reply = match self.client.request(lookup, &request).await {
            Ok(reply) => reply,
            Err(e) => {
                metrics::record_relay_hop("namespace", "error");
                tracing::warn!(subject = %subject, lookup = %lookup, error = %e, "Namespace lookup failed");
                return Err(e.into());
            }
        };

        let namespace = reply
            .is_success()
            .then(|| reply.body.as_ref().and_then(|b| b.get("namespace")).and_then(Value::as_str))
            .flatten()
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        match namespace {
            Some(namespace) => {
                metrics::record_relay_hop("namespace", "ok");
                tracing::debug!(subject = %subject, namespace = %namespace, "Namespace resolved");
                Ok(Some(namespace))
            }
            None => {
                metrics::record_relay_hop("namespace", "rejected");
                let code = match reply.code {
                    Some(CODE_OK) | None => CODE_INTERNAL,
                    Some(code) => code,
                };
                tracing::info!(subject = %subject, code, "Namespace resolution rejected");
                Err(GatewayError::NamespaceResolution {
                    code,
                    body: reply.body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use bytes::Bytes;

    use crate::backbone::{BackboneError, Envelope, Headers, MemoryBackbone};
    use crate::config::AuthConfig;
    use crate::error::GatewayError;
    use crate::relay::test_support::{answer, relay};

    fn scoped() -> AuthConfig {
        AuthConfig {
            namespace_subjects: vec!["orders".to_string()],
            namespace_subject: Some("tenant.lookup".to_string()),
            ..AuthConfig::default()
        }
    }

    #[tokio::test]
    async fn test_unscoped_subject_has_no_namespace() {
        let backbone = Arc::new(MemoryBackbone::new());
        let relay = relay(&backbone, scoped());

        assert_eq!(relay.get_namespace("prices", &Headers::new()).await.unwrap(), None);
        assert_eq!(backbone.request_count("tenant.lookup"), 0);
    }

    #[tokio::test]
    async fn test_lookup_sends_subject_and_headers() {
        let backbone = Arc::new(MemoryBackbone::new());
        backbone.respond("tenant.lookup", |payload| async move {
            let request: Envelope = serde_json::from_slice(&payload).unwrap_or_default();
            let tenant = request.header_values("tenant").join("");
            let subject = request.body.and_then(|b| b.get("subject").cloned());
            let reply = json!({"code": 200, "body": {"namespace": tenant, "subject": subject}});
            Ok::<_, BackboneError>(Bytes::from(serde_json::to_vec(&reply).unwrap_or_default()))
        });
        let relay = relay(&backbone, scoped());

        let mut headers = Headers::new();
        headers.insert("tenant".to_string(), json!("acme"));

        let namespace = relay.get_namespace("orders", &headers).await.unwrap();
        assert_eq!(namespace.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn test_empty_namespace_is_a_rejection() {
        let backbone = Arc::new(MemoryBackbone::new());
        answer(&backbone, "tenant.lookup", json!({"code": 200, "body": {"namespace": ""}}));
        let relay = relay(&backbone, scoped());

        let err = relay.get_namespace("orders", &Headers::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NamespaceResolution { code: 500, .. }));
    }

    #[tokio::test]
    async fn test_rejection_code_is_kept() {
        let backbone = Arc::new(MemoryBackbone::new());
        answer(&backbone, "tenant.lookup", json!({"code": 403}));
        let relay = relay(&backbone, scoped());

        let err = relay.get_namespace("orders", &Headers::new()).await.unwrap_err();
        assert_eq!(err.code(), 403);
        assert!(err.closes_socket());
    }
}
