use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dispatch::DispatchContext;
use crate::error::ForemanError;
use crate::types::{
    ActionCall, IterationPhase, IterationRecord, ObservationResult, Step, Trajectory, UsageTotals,
};

use super::super::events::RunEventEmitter;
use super::super::types::{RunId, RunOutcome, RunReport};
use super::checkpoint::{self, Checkpoint};
use super::limits::IterationBudget;
use super::{IterationScheduler, RunRequest};

mod action_phase;
mod plan_phase;

use action_phase::run_action_phase;
use plan_phase::{run_plan_phase, PlanPhaseOutcome};

/// Mutable state of one run.
struct RunState<'a> {
    scheduler: &'a IterationScheduler,
    run_id: RunId,
    conversation_id: String,
    trajectory: Trajectory,
    usage: UsageTotals,
    cancellation: CancellationToken,
    dispatch: DispatchContext,
    emitter: Arc<RunEventEmitter>,
}

impl RunState<'_> {
    fn emit(&self, record: &IterationRecord) {
        tracing::debug!(
            run_id = %self.run_id,
            turn = record.turn,
            phase = %record.phase,
            calls = record.action_calls.len(),
            "iteration record"
        );
        self.emitter.emit_record(record);
    }

    fn push(&mut self, step: Step) -> Result<(), ForemanError> {
        self.trajectory.push(step)
    }

    /// Emit the paused record and produce the paused outcome.
    fn paused(
        &self,
        turn: usize,
        calls: Vec<ActionCall>,
        results: Option<Vec<ObservationResult>>,
    ) -> RunOutcome {
        let mut record = IterationRecord::new(turn, IterationPhase::Paused).with_calls(calls);
        if let Some(results) = results {
            record = record.with_results(results);
        }
        self.emit(&record);
        RunOutcome::Paused
    }

    fn finish(self, outcome: RunOutcome, turns: usize) -> RunReport {
        match &outcome {
            RunOutcome::Failed(err) => tracing::error!(
                run_id = %self.run_id,
                conversation_id = %self.conversation_id,
                turns,
                error = %err,
                "run failed"
            ),
            _ => tracing::info!(
                run_id = %self.run_id,
                conversation_id = %self.conversation_id,
                turns,
                status = %outcome.status(),
                total_tokens = self.usage.total_tokens(),
                "run finished"
            ),
        }
        RunReport {
            run_id: self.run_id,
            outcome,
            trajectory: self.trajectory,
            usage: self.usage,
            turns,
        }
    }
}

pub(super) async fn run_loop(scheduler: &IterationScheduler, request: RunRequest) -> RunReport {
    let RunRequest {
        run_id,
        conversation_id,
        trajectory,
        max_iterations,
        cancellation,
        confirmations,
        event_sink,
    } = request;

    let mut budget = IterationBudget::new(
        max_iterations.unwrap_or(scheduler.config.max_iterations),
        scheduler.config.warning_ratio,
    );
    let emitter = RunEventEmitter::new(conversation_id.clone(), run_id, event_sink);
    // Confirmations raised during this run share its event sequence.
    let _watch = emitter
        .is_active()
        .then(|| confirmations.watch(&conversation_id, emitter.message_sink()));
    let descriptors = scheduler.dispatcher.registry().descriptors();

    let mut state = RunState {
        scheduler,
        run_id,
        dispatch: DispatchContext::new(
            conversation_id.clone(),
            cancellation.clone(),
            confirmations,
        ),
        conversation_id,
        trajectory,
        usage: UsageTotals::default(),
        cancellation,
        emitter,
    };
    tracing::info!(
        run_id = %run_id,
        conversation_id = %state.conversation_id,
        max_iterations = budget.max_iterations(),
        "run started"
    );

    let mut turn = 0;
    while turn < budget.max_iterations() {
        turn += 1;
        if checkpoint::reached(&state.cancellation, Checkpoint::BeforePlanning, turn) {
            let outcome = state.paused(turn, Vec::new(), None);
            return state.finish(outcome, turn);
        }

        match run_plan_phase(&mut state, &mut budget, &descriptors, turn).await {
            PlanPhaseOutcome::Skip => continue,
            PlanPhaseOutcome::Done(outcome) => return state.finish(outcome, turn),
            PlanPhaseOutcome::Act(chosen) => {
                if let Some(outcome) = run_action_phase(&mut state, chosen, turn).await {
                    return state.finish(outcome, turn);
                }
            }
        }
    }

    let warning = format!(
        "Reached the iteration limit ({}) without a final answer",
        budget.max_iterations()
    );
    tracing::warn!(run_id = %run_id, turn, "{warning}");
    state.emit(&IterationRecord::new(turn, IterationPhase::Final).with_warning(warning));
    state.finish(
        RunOutcome::Completed {
            final_message: None,
            limit_reached: true,
        },
        turn,
    )
}
