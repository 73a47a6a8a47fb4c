//! Connection bookkeeping.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade accepted
//!     → connection.rs (allocate ConnectionId, take a ConnectionGuard)
//!     → socket task runs, owning the guard
//!     → guard dropped when the socket task ends
//!
//! Connection States:
//!     Active → Draining (unsubscribing) → Closed
//! ```

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
