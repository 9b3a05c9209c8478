//! Workflow session state model.
//!
//! [`WorkflowSession`] is the aggregate the reducer folds events into:
//! one per workflow run, holding the ordered pipeline steps, per-agent
//! progress records, and the append-only notification feed. All types
//! serialize with snake_case field names matching the backend's JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Percent, Timestamp};

/// Maximum number of notifications retained per session.
///
/// When the feed grows past this cap the oldest entries are dropped,
/// never the newest.
pub const NOTIFICATION_RETENTION_CAP: usize = 200;

/// Upper bound on the number of pipeline steps a session will address.
///
/// Real pipelines have a handful of steps; an event naming an index at
/// or beyond this bound is hostile or corrupt and must not make the
/// session allocate placeholders up to it.
pub const MAX_STEPS: usize = 64;

/// Lifecycle status of a workflow session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal statuses absorb all further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of a single pipeline step. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    /// Ordering rank used to enforce forward-only transitions.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }
}

/// Severity of a session notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

/// One agent's slot in the ordered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub name: String,
    pub agent: String,
    pub status: StepStatus,
    pub progress_percentage: Percent,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    #[serde(default)]
    pub result_data: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Step {
    /// Create a pending step for a known agent slot.
    pub fn new(step_id: impl Into<String>, name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            agent: agent.into(),
            status: StepStatus::Pending,
            progress_percentage: 0,
            start_time: None,
            end_time: None,
            result_data: None,
            error_message: None,
        }
    }

    /// Placeholder created when an event references a step index the
    /// session has not seen yet.
    pub fn placeholder(index: usize) -> Self {
        Self::new(format!("step-{index}"), format!("Step {}", index + 1), "")
    }
}

/// Fine-grained progress reported by a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProgressRecord {
    pub agent_name: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub progress_percentage: Percent,
    pub completed_subtasks: u32,
    pub total_subtasks: u32,
    pub start_time: Timestamp,
    #[serde(default)]
    pub estimated_completion: Option<Timestamp>,
}

/// A human-visible line in the session's activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub subtask: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl Notification {
    /// Build a notification with just a kind and message.
    pub fn new(kind: NotificationKind, message: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
            agent_id: None,
            subtask: None,
            details: None,
        }
    }

    /// Attach the originating agent.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent_id = Some(agent.into());
        self
    }

    /// Attach the sub-task label.
    pub fn with_subtask(mut self, subtask: impl Into<String>) -> Self {
        self.subtask = Some(subtask.into());
        self
    }

    /// Attach free-form JSON details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Identity used for the append-only union during resync merges.
    pub fn identity(&self) -> (Timestamp, NotificationKind, &str) {
        (self.timestamp, self.kind, &self.message)
    }
}

/// Aggregate state for one workflow run.
///
/// Mutated exclusively by [`crate::reducer::apply`]; everything else
/// observes immutable clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub workflow_id: String,
    pub project_id: String,
    pub status: WorkflowStatus,
    pub overall_progress: Percent,
    /// Index of the step currently (or most recently) active.
    pub current_step: usize,
    pub steps: Vec<Step>,
    pub agent_progress: HashMap<String, AgentProgressRecord>,
    pub notifications: Vec<Notification>,
    pub start_time: Option<Timestamp>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl WorkflowSession {
    /// Create a fresh pending session with no steps.
    pub fn new(workflow_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            project_id: project_id.into(),
            status: WorkflowStatus::Pending,
            overall_progress: 0,
            current_step: 0,
            steps: Vec::new(),
            agent_progress: HashMap::new(),
            notifications: Vec::new(),
            start_time: None,
            result_data: None,
            error_message: None,
        }
    }

    /// Create a pending session with a known pipeline plan.
    pub fn with_steps(
        workflow_id: impl Into<String>,
        project_id: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            steps,
            ..Self::new(workflow_id, project_id)
        }
    }

    /// Grow `steps` with placeholders so `index` is addressable.
    pub(crate) fn ensure_step(&mut self, index: usize) {
        while self.steps.len() <= index {
            self.steps.push(Step::placeholder(self.steps.len()));
        }
    }

    /// Index of the step assigned to `agent`, if any.
    pub(crate) fn step_index_for_agent(&self, agent: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.agent == agent)
    }

    /// Append a notification, enforcing the retention cap.
    pub(crate) fn push_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
        if self.notifications.len() > NOTIFICATION_RETENTION_CAP {
            let excess = self.notifications.len() - NOTIFICATION_RETENTION_CAP;
            self.notifications.drain(..excess);
        }
    }
}
