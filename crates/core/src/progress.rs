//! Overall-progress derivation.
//!
//! Two progress signals exist for a workflow: explicit percentages sent
//! by the server and a heuristic derived from step statuses. The
//! reducer reconciles them by taking the maximum, so overall progress
//! never regresses while a workflow is running.

use crate::session::{Step, StepStatus};
use crate::types::Percent;

/// Derive overall progress from step statuses.
///
/// Completed steps count fully, running steps count half. Returns 0
/// for an empty pipeline.
pub fn derived_overall(steps: &[Step]) -> Percent {
    if steps.is_empty() {
        return 0;
    }
    let completed = steps.iter().filter(|s| s.status == StepStatus::Completed).count();
    let running = steps.iter().filter(|s| s.status == StepStatus::Running).count();
    let ratio = (completed as f64 + 0.5 * running as f64) / steps.len() as f64;
    (ratio * 100.0).round() as Percent
}
