//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backbone::Codec;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, shutdown grace).
    pub listener: ListenerConfig,

    /// Messaging backbone connection.
    pub backbone: BackboneConfig,

    /// HTTP request-reply endpoint.
    pub http: HttpConfig,

    /// WebSocket subscription endpoint.
    pub websocket: WebSocketConfig,

    /// Authorization chain and namespace resolution.
    pub auth: AuthConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// How long shutdown waits for open sockets to finish, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            shutdown_grace_secs: 10,
        }
    }
}

/// Backbone connection settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackboneConfig {
    /// Server URI (e.g., "nats://localhost:4222").
    pub uri: String,

    pub user: Option<String>,

    pub pass: Option<String>,

    /// Deadline for every request-reply call, in seconds.
    pub request_timeout_secs: u64,

    /// Payload codec for envelopes.
    pub codec: Codec,
}

impl BackboneConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            uri: "localhost:4222".to_string(),
            user: None,
            pass: None,
            request_timeout_secs: 60,
            codec: Codec::Json,
        }
    }
}

impl std::fmt::Debug for BackboneConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackboneConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("codec", &self.codec)
            .finish()
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Path accepting `POST` requests.
    pub path: String,

    /// Request-level deadline, in seconds. Answers 504 when exceeded.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body, in bytes.
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            request_timeout_secs: 65,
            max_body_size: 1024 * 1024,
        }
    }
}

/// WebSocket endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Path accepting upgrade requests.
    pub path: String,

    /// Interval between server pings, in seconds. Zero disables them.
    pub keepalive_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            keepalive_secs: 30,
        }
    }
}

/// Authorization chain and namespace resolution.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Authorization subjects, called in order.
    pub subjects: Vec<String>,

    /// Subjects that skip the authorization chain.
    pub non_authorized_subjects: Vec<String>,

    /// Subjects whose subscriptions are scoped by a resolved namespace.
    pub namespace_subjects: Vec<String>,

    /// Subject answering namespace lookups.
    pub namespace_subject: Option<String>,
}

impl AuthConfig {
    pub fn requires_auth(&self, subject: &str) -> bool {
        !self.subjects.is_empty() && !self.non_authorized_subjects.iter().any(|s| s == subject)
    }

    pub fn is_namespaced(&self, subject: &str) -> bool {
        self.namespace_subjects.iter().any(|s| s == subject)
    }
}

/// Cross-origin policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. `*` allows any origin.
    pub origins: Vec<String>,

    /// Allow credentialed requests.
    pub credentials: bool,
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.origins.iter().any(|o| o == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            credentials: false,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
