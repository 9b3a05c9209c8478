//! Core domain model for workflow progress tracking.
//!
//! Pure data structures and the reconciliation reducer that folds a
//! stream of canonical events into a single consistent
//! [`session::WorkflowSession`]. This crate has zero internal
//! dependencies and performs no I/O, so it can be used by the client,
//! tests, and any future tooling alike.

pub mod events;
pub mod progress;
pub mod reducer;
pub mod session;
pub mod snapshot;
pub mod types;
