//! Canonical workflow events.
//!
//! The closed set of events the reducer understands. The client
//! crate's normalizer maps every raw transport payload into exactly
//! one of these variants, so the reducer can match exhaustively and
//! never sees an unrecognized tag. `Resync` is never received from the
//! wire; the session controller synthesizes it from HTTP snapshots.

use crate::session::NotificationKind;
use crate::snapshot::WorkflowSnapshot;
use crate::types::Percent;

/// A normalized event describing one observation about a workflow run.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// The workflow has started executing on the server.
    WorkflowStart,

    /// An agent has taken over a pipeline step.
    AgentStart {
        agent: String,
        /// Explicit step index, when the payload carries one. Otherwise
        /// the reducer resolves the index by agent name.
        step_index: Option<usize>,
    },

    /// An agent is working but has produced no output yet.
    AgentThinking { agent: String },

    /// An agent produced intermediate or final output.
    AgentOutput {
        agent: String,
        output: serde_json::Value,
    },

    /// Authoritative progress report for one agent.
    AgentProgress {
        agent: String,
        current_step: u32,
        total_steps: u32,
        progress_percentage: Percent,
        completed_subtasks: u32,
        total_subtasks: u32,
        subtask: Option<String>,
    },

    /// An agent finished its step.
    AgentComplete {
        agent: String,
        result_summary: Option<String>,
    },

    /// Sub-task level chatter: a sub-task began.
    StepStart { agent: String, subtask: String },

    /// Sub-task level chatter: a sub-task finished.
    StepComplete { agent: String, subtask: String },

    /// Coarse sequence/stage update, optionally carrying overall progress.
    SequenceUpdate {
        label: String,
        progress_percentage: Option<Percent>,
    },

    /// Free-form message for the notification feed.
    SystemNotification {
        kind: NotificationKind,
        message: String,
        /// Set when the raw payload matched no known shape and was
        /// preserved verbatim for diagnostics.
        malformed: bool,
    },

    /// The workflow finished successfully.
    WorkflowComplete { result_data: serde_json::Value },

    /// The workflow failed on the server.
    WorkflowError { message: String },

    /// The workflow was cancelled on the server.
    WorkflowCancelled { reason: Option<String> },

    /// Synthetic event carrying a server snapshot (drift correction).
    Resync(WorkflowSnapshot),
}

impl WorkflowEvent {
    /// Short name for logging and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::AgentStart { .. } => "agent_start",
            Self::AgentThinking { .. } => "agent_thinking",
            Self::AgentOutput { .. } => "agent_output",
            Self::AgentProgress { .. } => "agent_progress",
            Self::AgentComplete { .. } => "agent_complete",
            Self::StepStart { .. } => "step_start",
            Self::StepComplete { .. } => "step_complete",
            Self::SequenceUpdate { .. } => "sequence_update",
            Self::SystemNotification { .. } => "system_notification",
            Self::WorkflowComplete { .. } => "workflow_complete",
            Self::WorkflowError { .. } => "workflow_error",
            Self::WorkflowCancelled { .. } => "workflow_cancelled",
            Self::Resync(_) => "resync",
        }
    }
}
