//! The reconciliation reducer.
//!
//! [`apply`] folds one canonical event into a [`WorkflowSession`] and
//! is the only place session state is mutated. Merge rules:
//!
//! * inferred signals (`AgentStart`, `AgentThinking`, `AgentOutput`)
//!   only raise a step's progress to a floor, never lower it;
//! * `AgentProgress` is authoritative and overwrites directly;
//! * overall progress is `max(explicit signal, derived heuristic)` and
//!   never regresses while the session is running;
//! * terminal statuses are absorbing.
//!
//! The clock is passed in by the caller so the function stays
//! deterministic under test.

use crate::events::WorkflowEvent;
use crate::progress::derived_overall;
use crate::session::{
    AgentProgressRecord, Notification, NotificationKind, StepStatus, WorkflowSession,
    WorkflowStatus, MAX_STEPS, NOTIFICATION_RETENTION_CAP,
};
use crate::snapshot::WorkflowSnapshot;
use crate::types::{clamp_percent, Percent, Timestamp};

/// Progress floor applied when an agent's step starts.
pub const FLOOR_AGENT_START: Percent = 10;

/// Progress floor applied while an agent is thinking.
pub const FLOOR_AGENT_THINKING: Percent = 50;

/// Progress floor applied when an agent produces output.
pub const FLOOR_AGENT_OUTPUT: Percent = 75;

/// Fold `event` into `session`.
pub fn apply(session: &mut WorkflowSession, event: &WorkflowEvent, now: Timestamp) {
    if session.status.is_terminal() {
        absorb_late_event(session, event, now);
        return;
    }

    if session.start_time.is_none() {
        session.start_time = Some(now);
    }

    match event {
        WorkflowEvent::WorkflowStart => {
            if session.status == WorkflowStatus::Pending {
                session.status = WorkflowStatus::Running;
            }
            session.push_notification(Notification::new(
                NotificationKind::Info,
                "Workflow started",
                now,
            ));
        }

        WorkflowEvent::AgentStart { agent, step_index } => {
            apply_agent_start(session, agent, *step_index, now);
        }

        WorkflowEvent::AgentThinking { agent } => {
            if let Some(index) = session.step_index_for_agent(agent) {
                let step = &mut session.steps[index];
                if step.status == StepStatus::Running
                    && step.progress_percentage < FLOOR_AGENT_THINKING
                {
                    step.progress_percentage = FLOOR_AGENT_THINKING;
                }
            }
        }

        WorkflowEvent::AgentOutput { agent, output } => {
            if let Some(index) = session.step_index_for_agent(agent) {
                let step = &mut session.steps[index];
                // Last output wins.
                step.result_data = Some(output.clone());
                if step.status == StepStatus::Running
                    && step.progress_percentage < FLOOR_AGENT_OUTPUT
                {
                    step.progress_percentage = FLOOR_AGENT_OUTPUT;
                }
            }
            session.push_notification(
                Notification::new(NotificationKind::Info, format!("{agent} produced output"), now)
                    .with_agent(agent.clone()),
            );
        }

        WorkflowEvent::AgentProgress {
            agent,
            current_step,
            total_steps,
            progress_percentage,
            completed_subtasks,
            total_subtasks,
            subtask,
        } => {
            // Server-reported progress is ground truth: overwrite the
            // record wholesale and set the step value directly.
            let start_time = session
                .agent_progress
                .get(agent)
                .map(|r| r.start_time)
                .unwrap_or(now);
            session.agent_progress.insert(
                agent.clone(),
                AgentProgressRecord {
                    agent_name: agent.clone(),
                    current_step: *current_step,
                    total_steps: *total_steps,
                    progress_percentage: *progress_percentage,
                    completed_subtasks: *completed_subtasks,
                    total_subtasks: *total_subtasks,
                    start_time,
                    estimated_completion: None,
                },
            );
            if let Some(index) = session.step_index_for_agent(agent) {
                session.steps[index].progress_percentage = *progress_percentage;
            }
            if let Some(subtask) = subtask {
                session.push_notification(
                    Notification::new(
                        NotificationKind::Info,
                        format!("{agent}: {subtask}"),
                        now,
                    )
                    .with_agent(agent.clone())
                    .with_subtask(subtask.clone()),
                );
            }
        }

        WorkflowEvent::AgentComplete {
            agent,
            result_summary,
        } => {
            if let Some(index) = session.step_index_for_agent(agent) {
                let step = &mut session.steps[index];
                if step.status.rank() < StepStatus::Completed.rank() {
                    step.status = StepStatus::Completed;
                }
                step.progress_percentage = 100;
                if step.end_time.is_none() {
                    step.end_time = Some(now);
                }
            }
            if let Some(record) = session.agent_progress.get_mut(agent) {
                record.progress_percentage = 100;
            }
            let message = match result_summary {
                Some(summary) => format!("{agent} completed: {summary}"),
                None => format!("{agent} completed"),
            };
            session.push_notification(
                Notification::new(NotificationKind::Success, message, now)
                    .with_agent(agent.clone()),
            );
        }

        WorkflowEvent::StepStart { agent, subtask } => {
            session.push_notification(
                Notification::new(NotificationKind::Info, format!("{agent}: {subtask}"), now)
                    .with_agent(agent.clone())
                    .with_subtask(subtask.clone()),
            );
        }

        WorkflowEvent::StepComplete { agent, subtask } => {
            session.push_notification(
                Notification::new(
                    NotificationKind::Success,
                    format!("{agent}: {subtask} done"),
                    now,
                )
                .with_agent(agent.clone())
                .with_subtask(subtask.clone()),
            );
        }

        WorkflowEvent::SequenceUpdate {
            label,
            progress_percentage,
        } => {
            if let Some(percent) = progress_percentage {
                session.overall_progress = session.overall_progress.max(*percent);
            }
            if !label.is_empty() {
                session.push_notification(Notification::new(
                    NotificationKind::Info,
                    label.clone(),
                    now,
                ));
            }
        }

        WorkflowEvent::SystemNotification {
            kind,
            message,
            malformed,
        } => {
            let mut notification = Notification::new(*kind, message.clone(), now);
            if *malformed {
                notification = notification
                    .with_details(serde_json::json!({ "malformed": true }));
            }
            session.push_notification(notification);
        }

        WorkflowEvent::WorkflowComplete { result_data } => {
            session.status = WorkflowStatus::Completed;
            session.overall_progress = 100;
            for step in &mut session.steps {
                if step.status != StepStatus::Completed {
                    step.status = StepStatus::Completed;
                    step.progress_percentage = 100;
                }
                if step.end_time.is_none() {
                    step.end_time = Some(now);
                }
            }
            session.result_data = Some(result_data.clone());
            session.push_notification(Notification::new(
                NotificationKind::Success,
                "Workflow completed",
                now,
            ));
        }

        WorkflowEvent::WorkflowError { message } => {
            // Steps are left as-is: partial completion is informative.
            session.status = WorkflowStatus::Failed;
            session.error_message = Some(message.clone());
            session.push_notification(Notification::new(
                NotificationKind::Error,
                message.clone(),
                now,
            ));
        }

        WorkflowEvent::WorkflowCancelled { reason } => {
            session.status = WorkflowStatus::Cancelled;
            let message = match reason {
                Some(reason) => format!("Workflow cancelled: {reason}"),
                None => "Workflow cancelled".to_string(),
            };
            session.push_notification(Notification::new(
                NotificationKind::Warning,
                message,
                now,
            ));
        }

        WorkflowEvent::Resync(snapshot) => {
            apply_resync(session, snapshot);
        }
    }

    refresh_overall(session);
}

/// Handle `AgentStart`: resolve the step index, infer completion of all
/// earlier steps, and mark the target step running.
fn apply_agent_start(
    session: &mut WorkflowSession,
    agent: &str,
    step_index: Option<usize>,
    now: Timestamp,
) {
    let index = step_index
        .or_else(|| session.step_index_for_agent(agent))
        .unwrap_or(session.steps.len());
    // A hostile or corrupt index must not grow the step vector to it.
    if index >= MAX_STEPS {
        session.push_notification(Notification::new(
            NotificationKind::Warning,
            format!("Ignored start of {agent}: step index {index} exceeds the pipeline limit"),
            now,
        ));
        return;
    }
    session.ensure_step(index);

    // Inferred completion: the pipeline is strictly ordered, so an
    // agent starting step N means everything before N is done.
    for step in &mut session.steps[..index] {
        if step.status != StepStatus::Completed {
            step.status = StepStatus::Completed;
            step.progress_percentage = 100;
        }
        if step.end_time.is_none() {
            step.end_time = Some(now);
        }
    }

    let step = &mut session.steps[index];
    if step.agent.is_empty() {
        step.agent = agent.to_string();
        step.name = agent.to_string();
    }
    if step.status == StepStatus::Pending {
        step.status = StepStatus::Running;
    }
    if step.start_time.is_none() {
        step.start_time = Some(now);
    }
    if step.progress_percentage < FLOOR_AGENT_START {
        step.progress_percentage = FLOOR_AGENT_START;
    }

    session.current_step = index;
    // An agent starting implies the workflow itself is running.
    if session.status == WorkflowStatus::Pending {
        session.status = WorkflowStatus::Running;
    }

    let total_steps = session.steps.len() as u32;
    session
        .agent_progress
        .entry(agent.to_string())
        .or_insert_with(|| AgentProgressRecord {
            agent_name: agent.to_string(),
            current_step: index as u32,
            total_steps,
            progress_percentage: 0,
            completed_subtasks: 0,
            total_subtasks: 0,
            start_time: now,
            estimated_completion: None,
        });
}

/// Merge a server snapshot into local state.
///
/// Status, overall progress, steps, and agent progress take the
/// server's values; notifications are merged by append-only union so
/// local-only entries accumulated between polls survive.
fn apply_resync(session: &mut WorkflowSession, snapshot: &WorkflowSnapshot) {
    if snapshot.workflow_id != session.workflow_id {
        // Foreign snapshot; the controller logs this before enqueueing,
        // the reducer just refuses to merge it.
        return;
    }

    session.status = snapshot.status;
    session.overall_progress = clamp_percent(snapshot.progress_percentage);
    session.current_step = snapshot.current_step;
    // A server that has not materialized its step list yet must not
    // erase locally grown steps.
    if !snapshot.steps.is_empty() {
        session.steps = snapshot.steps.clone();
    }
    if !snapshot.agent_progress.is_empty() {
        session.agent_progress = snapshot.agent_progress.clone();
    }
    if snapshot.start_time.is_some() {
        session.start_time = snapshot.start_time;
    }
    if snapshot.status.is_terminal() {
        if snapshot.result_data.is_some() {
            session.result_data = snapshot.result_data.clone();
        }
        if snapshot.error_message.is_some() {
            session.error_message = snapshot.error_message.clone();
        }
    }

    // Once the feed has filled to the retention cap, entries older than
    // the oldest retained one have been evicted; re-appending them at
    // the tail would reorder the feed and churn the cap forever.
    let horizon = if session.notifications.len() >= NOTIFICATION_RETENTION_CAP {
        session.notifications.first().map(|n| n.timestamp)
    } else {
        None
    };
    for incoming in &snapshot.notifications {
        if horizon.is_some_and(|h| incoming.timestamp < h) {
            continue;
        }
        let seen = session
            .notifications
            .iter()
            .any(|n| n.identity() == incoming.identity());
        if !seen {
            session.push_notification(incoming.clone());
        }
    }
}

/// Absorb an event that arrived after the session reached a terminal
/// status. Redundant terminal confirmations are pure no-ops so that
/// duplicate delivery stays idempotent; anything else leaves a
/// diagnostic notification.
fn absorb_late_event(session: &mut WorkflowSession, event: &WorkflowEvent, now: Timestamp) {
    let redundant = matches!(
        (event, session.status),
        (WorkflowEvent::WorkflowComplete { .. }, WorkflowStatus::Completed)
            | (WorkflowEvent::WorkflowError { .. }, WorkflowStatus::Failed)
            | (WorkflowEvent::WorkflowCancelled { .. }, WorkflowStatus::Cancelled)
    );
    if redundant {
        return;
    }
    session.push_notification(Notification::new(
        NotificationKind::Info,
        format!("Ignored late event after terminal status: {}", event.name()),
        now,
    ));
}

/// Recompute overall progress from step statuses and merge it with the
/// explicit value via `max`. Only applies while running; terminal
/// handlers set their own final values.
fn refresh_overall(session: &mut WorkflowSession) {
    if session.status == WorkflowStatus::Running {
        session.overall_progress = session
            .overall_progress
            .max(derived_overall(&session.steps));
    }
}
