//! The four points at which a run honours a pause request.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Checkpoint {
    /// Before asking the planner for the next step.
    BeforePlanning,
    /// Plan received, nothing started yet.
    BeforeDispatch,
    /// Actions dispatched, results not yet folded into the trajectory.
    BeforeFold,
    /// Results folded and reported, before the next turn.
    AfterFold,
}

/// True when the run must stop here.
pub(super) fn reached(
    cancellation: &CancellationToken,
    checkpoint: Checkpoint,
    turn: usize,
) -> bool {
    let paused = cancellation.is_cancelled();
    if paused {
        tracing::info!(turn, %checkpoint, "pause observed");
    }
    paused
}
