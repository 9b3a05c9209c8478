//! Client library for tracking journal-generation workflow runs.
//!
//! Connects to the backend's per-workflow WebSocket, normalizes its
//! heterogeneously-shaped frames into canonical events, and folds them
//! through the `journ-core` reducer into one consistent
//! [`journ_core::session::WorkflowSession`]. Snapshot polling and
//! resync keep the state correct when the push channel is unreliable.

pub mod backend;
pub mod config;
pub mod reconnect;
pub mod session;
pub mod wire;

pub use backend::{BackendError, HttpBackend, WorkflowBackend};
pub use config::ClientConfig;
pub use journ_core::session::{WorkflowSession, WorkflowStatus};
pub use session::{CancelOutcome, ConnectionState, SessionError, WorkflowSubscription};
