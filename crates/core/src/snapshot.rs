//! Server-side snapshot of a workflow session.
//!
//! The shape returned by `GET /workflow-status/{workflow_id}`. The
//! session controller wraps one of these in a `Resync` event whenever
//! it needs to correct drift (initial fast-forward, reconnect, poll
//! fallback); the reducer then takes the server's fields as
//! authoritative.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::session::{AgentProgressRecord, Notification, Step, WorkflowStatus};
use crate::types::Timestamp;

/// Full point-in-time representation of a workflow as the server sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow_id: String,
    #[serde(default)]
    pub project_id: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub current_step: usize,
    /// Overall progress. Some backend builds emit `progress` instead.
    #[serde(default, alias = "progress")]
    pub progress_percentage: i64,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub agent_progress: HashMap<String, AgentProgressRecord>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub result_data: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}
