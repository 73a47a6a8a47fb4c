//! Authorization and namespace relay.
//!
//! # Data Flow
//! ```text
//! inbound headers (HTTP request or WS upgrade + command)
//!     → auth.rs (chain of authorization subjects, in order)
//!         hop 1 ← original headers
//!         hop N ← headers returned by hop N-1
//!         first non-200 reply stops the chain
//!     → namespace.rs (namespace-scoped subjects only)
//!         one lookup with the post-auth headers and `{subject}`
//!     → post-auth headers + optional namespace
//! ```
//!
//! # Design Decisions
//! - Hops are strictly sequential; each one waits on the previous reply
//! - A transport failure on a hop is an upstream error, never a rejection

mod auth;
mod namespace;

use crate::backbone::EnvelopeClient;
use crate::config::AuthConfig;

/// Runs the authorization chain and namespace lookups over the backbone.
#[derive(Debug, Clone)]
pub struct Relay {
    client: EnvelopeClient,
    config: AuthConfig,
}

impl Relay {
    pub fn new(client: EnvelopeClient, config: AuthConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}
