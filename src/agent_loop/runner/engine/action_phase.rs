use crate::types::{IterationPhase, IterationRecord, ObservationResult, Step};

use super::super::super::types::RunOutcome;
use super::super::checkpoint::{self, Checkpoint};
use super::plan_phase::ChosenStep;
use super::RunState;

/// Record the agent step, run its calls and fold the results back.
///
/// Returns `Some` when the run ends here.
pub(super) async fn run_action_phase(
    state: &mut RunState<'_>,
    chosen: ChosenStep,
    turn: usize,
) -> Option<RunOutcome> {
    let ChosenStep {
        calls,
        message,
        thought,
        usage: plan_usage,
        raw_continuation,
    } = chosen;

    if let Err(err) =
        state.push(Step::agent(message, calls.clone()).with_continuation(raw_continuation))
    {
        return Some(RunOutcome::Failed(err));
    }
    state.emit(
        &IterationRecord::new(turn, IterationPhase::Dispatching)
            .with_calls(calls.clone())
            .with_thought(thought.clone()),
    );

    if checkpoint::reached(&state.cancellation, Checkpoint::BeforeDispatch, turn) {
        let results: Vec<ObservationResult> = calls
            .iter()
            .map(|call| ObservationResult::interrupted(&call.id))
            .collect();
        if let Err(err) = fold(state, turn, &calls, results.clone(), thought, plan_usage) {
            return Some(err);
        }
        return Some(state.paused(turn, calls, Some(results)));
    }

    let outcome = state
        .scheduler
        .dispatcher
        .dispatch(&calls, &state.dispatch)
        .await;
    state.usage = state.usage.merge(&outcome.usage);
    let turn_usage = plan_usage.merge(&outcome.usage);

    // In-flight calls were abandoned; their results already carry the sentinel.
    let paused = checkpoint::reached(&state.cancellation, Checkpoint::BeforeFold, turn);
    let results = outcome.results;
    if let Err(err) = fold(state, turn, &calls, results.clone(), thought, turn_usage) {
        return Some(err);
    }
    if paused {
        return Some(state.paused(turn, calls, Some(results)));
    }

    if checkpoint::reached(&state.cancellation, Checkpoint::AfterFold, turn) {
        return Some(state.paused(turn, Vec::new(), None));
    }
    None
}

fn fold(
    state: &mut RunState<'_>,
    turn: usize,
    calls: &[crate::types::ActionCall],
    results: Vec<ObservationResult>,
    thought: Option<String>,
    usage: crate::types::UsageTotals,
) -> Result<(), RunOutcome> {
    state
        .push(Step::observations(results.clone()))
        .map_err(RunOutcome::Failed)?;
    state.emit(
        &IterationRecord::new(turn, IterationPhase::Resolved)
            .with_calls(calls.to_vec())
            .with_results(results)
            .with_thought(thought)
            .with_usage(usage),
    );
    Ok(())
}
