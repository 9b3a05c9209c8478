//! Raw frame normalization.
//!
//! The backend pushes JSON frames whose shape varies by emitter: some
//! carry a `"type"` tag, some are duck-typed, and field names drift
//! between builds (`progress` vs `progress_percentage`, `sequence` vs
//! `current_stage`, `agent` vs `agent_id` vs `current_agent`).
//!
//! [`normalize`] maps every JSON object into exactly one canonical
//! [`WorkflowEvent`], so the reducer can match exhaustively. A payload
//! matching no known shape becomes a `SystemNotification` carrying the
//! raw text with a `malformed` marker; only non-JSON input is reported
//! as an error, and it never reaches the reducer.

use journ_core::events::WorkflowEvent;
use journ_core::session::{NotificationKind, MAX_STEPS};
use journ_core::types::{clamp_percent, Percent};
use serde_json::Value;

/// Errors from the normalization layer.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame was not valid JSON.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A normalized frame: the canonical event plus the workflow ID the
/// frame names, when it names one. The session controller drops frames
/// addressed to a foreign workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
    pub workflow_id: Option<String>,
    pub event: WorkflowEvent,
}

/// Normalize a raw text frame.
pub fn normalize(text: &str) -> Result<NormalizedFrame, WireError> {
    let value: Value = serde_json::from_str(text)?;
    Ok(NormalizedFrame {
        workflow_id: string_field(&value, &["workflow_id"]),
        event: normalize_value(&value, text),
    })
}

/// Total mapping from a JSON value to a canonical event.
pub fn normalize_value(value: &Value, raw: &str) -> WorkflowEvent {
    if let Some(tag) = string_field(value, &["type"]) {
        // A tagged frame is matched by its tag alone. Letting an
        // unknown tag duck-type through the untagged shapes would let
        // stray telemetry carrying a `status` field terminate the
        // session.
        return normalize_tagged(&tag, value).unwrap_or_else(|| malformed(raw));
    }
    normalize_untagged(value).unwrap_or_else(|| malformed(raw))
}

/// Shapes carrying an explicit `"type"` tag.
fn normalize_tagged(tag: &str, value: &Value) -> Option<WorkflowEvent> {
    match tag {
        "workflow_start" => Some(WorkflowEvent::WorkflowStart),

        "agent_start" => Some(WorkflowEvent::AgentStart {
            agent: agent_field(value)?,
            step_index: step_index_field(value)?,
        }),

        "agent_progress" => Some(WorkflowEvent::AgentProgress {
            agent: agent_field(value)?,
            current_step: u32_field(value, &["current_step", "step"]).unwrap_or(0),
            total_steps: u32_field(value, &["total_steps"]).unwrap_or(0),
            progress_percentage: percent_field(value, &["progress_percentage", "progress"])
                .unwrap_or(0),
            completed_subtasks: u32_field(value, &["completed_subtasks"]).unwrap_or(0),
            total_subtasks: u32_field(value, &["total_subtasks"]).unwrap_or(0),
            subtask: string_field(value, &["subtask"]),
        }),

        "agent_complete" => Some(WorkflowEvent::AgentComplete {
            agent: agent_field(value)?,
            result_summary: string_field(value, &["result_summary", "summary", "message"]),
        }),

        "step_start" => Some(WorkflowEvent::StepStart {
            agent: agent_field(value).unwrap_or_default(),
            subtask: string_field(value, &["subtask", "message"]).unwrap_or_default(),
        }),

        "step_complete" => Some(WorkflowEvent::StepComplete {
            agent: agent_field(value).unwrap_or_default(),
            subtask: string_field(value, &["subtask", "message"]).unwrap_or_default(),
        }),

        "system_notification" => Some(WorkflowEvent::SystemNotification {
            kind: notification_kind(value),
            message: string_field(value, &["message"])?,
            malformed: false,
        }),

        "workflow_complete" => Some(WorkflowEvent::WorkflowComplete {
            result_data: json_field(value, "result_data").unwrap_or(Value::Null),
        }),

        "workflow_error" => Some(WorkflowEvent::WorkflowError {
            message: string_field(value, &["error_message", "message"])
                .unwrap_or_else(|| "Workflow failed".to_string()),
        }),

        "workflow_cancelled" => Some(WorkflowEvent::WorkflowCancelled {
            reason: string_field(value, &["reason", "message"]),
        }),

        _ => None,
    }
}

/// Duck-typed shapes without a tag, observed from older backend builds.
fn normalize_untagged(value: &Value) -> Option<WorkflowEvent> {
    let agent = agent_field(value);

    // `{agent, status}`: per-agent lifecycle chatter.
    if let (Some(agent), Some(status)) = (agent.clone(), string_field(value, &["status"])) {
        return match status.as_str() {
            "started" | "running" => Some(WorkflowEvent::AgentStart {
                agent,
                step_index: step_index_field(value)?,
            }),
            "thinking" => Some(WorkflowEvent::AgentThinking { agent }),
            "completed" | "complete" | "done" => Some(WorkflowEvent::AgentComplete {
                agent,
                result_summary: string_field(value, &["result_summary", "summary", "message"]),
            }),
            "failed" => Some(WorkflowEvent::SystemNotification {
                kind: NotificationKind::Error,
                message: string_field(value, &["error_message", "message"])
                    .unwrap_or_else(|| format!("{agent} failed")),
                malformed: false,
            }),
            _ => None,
        };
    }

    // `{status: "completed" | "failed" | "cancelled", ...}`: workflow terminal frames.
    if let Some(status) = string_field(value, &["status"]) {
        return match status.as_str() {
            "completed" => Some(WorkflowEvent::WorkflowComplete {
                result_data: json_field(value, "result_data").unwrap_or(Value::Null),
            }),
            "failed" => Some(WorkflowEvent::WorkflowError {
                message: string_field(value, &["error_message", "message"])
                    .unwrap_or_else(|| "Workflow failed".to_string()),
            }),
            "cancelled" => Some(WorkflowEvent::WorkflowCancelled {
                reason: string_field(value, &["reason", "message"]),
            }),
            _ => None,
        };
    }

    // `{thinking}`: the active agent is working.
    if value.get("thinking").is_some() {
        return Some(WorkflowEvent::AgentThinking {
            agent: agent.unwrap_or_default(),
        });
    }

    // `{output}`: the active agent produced output.
    if let Some(output) = json_field(value, "output") {
        return Some(WorkflowEvent::AgentOutput {
            agent: agent.unwrap_or_default(),
            output,
        });
    }

    // `{sequence | current_stage, message?, progress_percentage?}`.
    if let Some(stage) = label_field(value, &["sequence", "current_stage"]) {
        let label = string_field(value, &["message"]).unwrap_or(stage);
        return Some(WorkflowEvent::SequenceUpdate {
            label,
            progress_percentage: percent_field(value, &["progress_percentage", "progress"]),
        });
    }

    None
}

/// Fallback for payloads matching no known shape: preserve the raw
/// line so a human can still see it.
fn malformed(raw: &str) -> WorkflowEvent {
    WorkflowEvent::SystemNotification {
        kind: NotificationKind::Warning,
        message: raw.to_string(),
        malformed: true,
    }
}

// ---- field extraction helpers ----

/// Look up the first matching string field, checking the top level and
/// a nested `"data"` object (some emitters wrap their payload).
fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    for scope in [Some(value), value.get("data")].into_iter().flatten() {
        for name in names {
            if let Some(s) = scope.get(name).and_then(Value::as_str) {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn number_field(value: &Value, names: &[&str]) -> Option<f64> {
    for scope in [Some(value), value.get("data")].into_iter().flatten() {
        for name in names {
            if let Some(n) = scope.get(name).and_then(Value::as_f64) {
                return Some(n);
            }
        }
    }
    None
}

/// A field that is either a string label or a numeric stage index.
fn label_field(value: &Value, names: &[&str]) -> Option<String> {
    if let Some(s) = string_field(value, names) {
        return Some(s);
    }
    number_field(value, names).map(|n| format!("Stage {n}"))
}

fn percent_field(value: &Value, names: &[&str]) -> Option<Percent> {
    number_field(value, names).map(|n| clamp_percent(n.round() as i64))
}

fn u32_field(value: &Value, names: &[&str]) -> Option<u32> {
    number_field(value, names).map(|n| n.max(0.0) as u32)
}

fn usize_field(value: &Value, names: &[&str]) -> Option<usize> {
    number_field(value, names).map(|n| n.max(0.0) as usize)
}

fn json_field(value: &Value, name: &str) -> Option<Value> {
    for scope in [Some(value), value.get("data")].into_iter().flatten() {
        if let Some(v) = scope.get(name) {
            return Some(v.clone());
        }
    }
    None
}

fn agent_field(value: &Value) -> Option<String> {
    string_field(value, &["agent", "agent_id", "current_agent"])
}

/// Step index, when present and sane. The outer `None` rejects the
/// whole frame: an index at or past `MAX_STEPS` would make the session
/// allocate placeholder steps up to it.
fn step_index_field(value: &Value) -> Option<Option<usize>> {
    match usize_field(value, &["step_index", "step"]) {
        Some(index) if index >= MAX_STEPS => None,
        other => Some(other),
    }
}

fn notification_kind(value: &Value) -> NotificationKind {
    match string_field(value, &["level", "kind"]).as_deref() {
        Some("success") => NotificationKind::Success,
        Some("warning") => NotificationKind::Warning,
        Some("error") => NotificationKind::Error,
        _ => NotificationKind::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn event(text: &str) -> WorkflowEvent {
        normalize(text).unwrap().event
    }

    // -----------------------------------------------------------------------
    // Tagged shapes
    // -----------------------------------------------------------------------

    #[test]
    fn tagged_workflow_start() {
        assert_matches!(
            event(r#"{"type":"workflow_start","workflow_id":"wf-1"}"#),
            WorkflowEvent::WorkflowStart
        );
    }

    #[test]
    fn tagged_agent_start_with_step_index() {
        assert_matches!(
            event(r#"{"type":"agent_start","agent":"Research Agent","step_index":2}"#),
            WorkflowEvent::AgentStart { agent, step_index: Some(2) } if agent == "Research Agent"
        );
    }

    #[test]
    fn tagged_agent_start_without_index() {
        assert_matches!(
            event(r#"{"type":"agent_start","agent_id":"Draft Agent"}"#),
            WorkflowEvent::AgentStart { agent, step_index: None } if agent == "Draft Agent"
        );
    }

    #[test]
    fn tagged_agent_progress_full() {
        let e = event(
            r#"{"type":"agent_progress","agent":"Draft Agent","current_step":2,"total_steps":5,
                "progress_percentage":42,"completed_subtasks":3,"total_subtasks":7,"subtask":"outline"}"#,
        );
        assert_matches!(
            e,
            WorkflowEvent::AgentProgress {
                progress_percentage: 42,
                current_step: 2,
                total_steps: 5,
                completed_subtasks: 3,
                total_subtasks: 7,
                ..
            }
        );
    }

    #[test]
    fn agent_progress_accepts_progress_alias() {
        assert_matches!(
            event(r#"{"type":"agent_progress","agent":"a","progress":66}"#),
            WorkflowEvent::AgentProgress { progress_percentage: 66, .. }
        );
    }

    #[test]
    fn agent_progress_clamps_out_of_range() {
        assert_matches!(
            event(r#"{"type":"agent_progress","agent":"a","progress":250}"#),
            WorkflowEvent::AgentProgress { progress_percentage: 100, .. }
        );
    }

    #[test]
    fn tagged_agent_complete() {
        assert_matches!(
            event(r#"{"type":"agent_complete","agent":"a","result_summary":"5 pages"}"#),
            WorkflowEvent::AgentComplete { result_summary: Some(s), .. } if s == "5 pages"
        );
    }

    #[test]
    fn tagged_step_chatter() {
        assert_matches!(
            event(r#"{"type":"step_start","agent":"a","subtask":"gather"}"#),
            WorkflowEvent::StepStart { subtask, .. } if subtask == "gather"
        );
        assert_matches!(
            event(r#"{"type":"step_complete","agent":"a","subtask":"gather"}"#),
            WorkflowEvent::StepComplete { subtask, .. } if subtask == "gather"
        );
    }

    #[test]
    fn tagged_system_notification() {
        assert_matches!(
            event(r#"{"type":"system_notification","message":"queue is busy","level":"warning"}"#),
            WorkflowEvent::SystemNotification {
                kind: NotificationKind::Warning,
                malformed: false,
                ..
            }
        );
    }

    #[test]
    fn tagged_workflow_complete_carries_result() {
        assert_matches!(
            event(r#"{"type":"workflow_complete","result_data":{"pages":5}}"#),
            WorkflowEvent::WorkflowComplete { result_data } if result_data["pages"] == 5
        );
    }

    #[test]
    fn tagged_fields_nested_under_data() {
        // Some emitters wrap the payload in a "data" object.
        assert_matches!(
            event(r#"{"type":"agent_start","data":{"agent":"a","step_index":1}}"#),
            WorkflowEvent::AgentStart { step_index: Some(1), .. }
        );
    }

    // -----------------------------------------------------------------------
    // Untagged duck-typed shapes
    // -----------------------------------------------------------------------

    #[test]
    fn untagged_agent_status_started() {
        assert_matches!(
            event(r#"{"agent":"Research Agent","status":"started"}"#),
            WorkflowEvent::AgentStart { step_index: None, .. }
        );
    }

    #[test]
    fn untagged_agent_status_thinking() {
        assert_matches!(
            event(r#"{"current_agent":"Research Agent","status":"thinking"}"#),
            WorkflowEvent::AgentThinking { agent } if agent == "Research Agent"
        );
    }

    #[test]
    fn untagged_agent_status_completed() {
        assert_matches!(
            event(r#"{"agent":"Research Agent","status":"completed"}"#),
            WorkflowEvent::AgentComplete { .. }
        );
    }

    #[test]
    fn untagged_workflow_completed() {
        assert_matches!(
            event(r#"{"status":"completed","result_data":{"pages":5}}"#),
            WorkflowEvent::WorkflowComplete { result_data } if result_data["pages"] == 5
        );
    }

    #[test]
    fn untagged_workflow_failed() {
        assert_matches!(
            event(r#"{"status":"failed","error_message":"out of tokens"}"#),
            WorkflowEvent::WorkflowError { message } if message == "out of tokens"
        );
    }

    #[test]
    fn untagged_workflow_cancelled() {
        assert_matches!(
            event(r#"{"status":"cancelled","reason":"user request"}"#),
            WorkflowEvent::WorkflowCancelled { reason: Some(r) } if r == "user request"
        );
    }

    #[test]
    fn untagged_thinking() {
        assert_matches!(
            event(r#"{"thinking":"considering tone...","agent":"Draft Agent"}"#),
            WorkflowEvent::AgentThinking { agent } if agent == "Draft Agent"
        );
    }

    #[test]
    fn untagged_output() {
        assert_matches!(
            event(r#"{"output":{"section":"intro"},"agent_id":"Draft Agent"}"#),
            WorkflowEvent::AgentOutput { output, .. } if output["section"] == "intro"
        );
    }

    #[test]
    fn untagged_sequence_with_progress() {
        assert_matches!(
            event(r#"{"sequence":"Compiling journal","progress_percentage":60}"#),
            WorkflowEvent::SequenceUpdate { label, progress_percentage: Some(60) }
                if label == "Compiling journal"
        );
    }

    #[test]
    fn untagged_current_stage_alias() {
        assert_matches!(
            event(r#"{"current_stage":3,"message":"Rendering pages"}"#),
            WorkflowEvent::SequenceUpdate { label, progress_percentage: None }
                if label == "Rendering pages"
        );
    }

    // -----------------------------------------------------------------------
    // Totality
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_shape_becomes_malformed_notification() {
        let raw = r#"{"something":"else"}"#;
        assert_matches!(
            event(raw),
            WorkflowEvent::SystemNotification { malformed: true, message, .. } if message == raw
        );
    }

    #[test]
    fn unknown_tag_becomes_malformed_notification() {
        assert_matches!(
            event(r#"{"type":"telemetry_blob","payload":1}"#),
            WorkflowEvent::SystemNotification { malformed: true, .. }
        );
    }

    #[test]
    fn tagged_frame_missing_agent_is_malformed() {
        assert_matches!(
            event(r#"{"type":"agent_start"}"#),
            WorkflowEvent::SystemNotification { malformed: true, .. }
        );
    }

    #[test]
    fn absurd_step_index_is_malformed() {
        assert_matches!(
            event(r#"{"type":"agent_start","agent":"a","step_index":5000000}"#),
            WorkflowEvent::SystemNotification { malformed: true, .. }
        );
        assert_matches!(
            event(r#"{"agent":"a","status":"started","step_index":5000000}"#),
            WorkflowEvent::SystemNotification { malformed: true, .. }
        );
    }

    #[test]
    fn unknown_tag_never_duck_types() {
        // A `status` field on a frame with an unrecognized tag must not
        // be read as a workflow terminal event.
        assert_matches!(
            event(r#"{"type":"telemetry","status":"completed"}"#),
            WorkflowEvent::SystemNotification { malformed: true, .. }
        );
    }

    #[test]
    fn invalid_json_is_a_wire_error() {
        assert_matches!(normalize("not json at all"), Err(WireError::Malformed(_)));
    }

    #[test]
    fn workflow_id_is_extracted() {
        let frame = normalize(r#"{"type":"workflow_start","workflow_id":"wf-9"}"#).unwrap();
        assert_eq!(frame.workflow_id.as_deref(), Some("wf-9"));
    }

    #[test]
    fn missing_workflow_id_is_none() {
        let frame = normalize(r#"{"type":"workflow_start"}"#).unwrap();
        assert_eq!(frame.workflow_id, None);
    }
}
