use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ForemanError;
use crate::planner::{ActionMode, PlanRequest, PlanResponse};
use crate::skills::Skill;
use crate::tools::ActionDescriptor;
use crate::types::{ActionCall, IterationPhase, IterationRecord, Step, UsageTotals};

use super::super::super::types::RunOutcome;
use super::super::dedup;
use super::super::limits::IterationBudget;
use super::RunState;

/// Calls that survived dedup, ready to run.
pub(super) struct ChosenStep {
    pub(super) calls: Vec<ActionCall>,
    pub(super) message: Option<String>,
    pub(super) thought: Option<String>,
    pub(super) usage: UsageTotals,
    pub(super) raw_continuation: Option<serde_json::Value>,
}

pub(super) enum PlanPhaseOutcome {
    Act(ChosenStep),
    /// Warning reported; the next turn gets another try.
    Skip,
    Done(RunOutcome),
}

pub(super) async fn run_plan_phase(
    state: &mut RunState<'_>,
    budget: &mut IterationBudget,
    descriptors: &[ActionDescriptor],
    turn: usize,
) -> PlanPhaseOutcome {
    let mode = if budget.is_final_turn(turn) {
        ActionMode::None
    } else {
        ActionMode::Auto
    };
    let warning = budget.warning(turn, state.trajectory.len());
    let skills: Arc<[Skill]> = match &state.scheduler.skills {
        Some(cache) => cache.get().await,
        None => Arc::from(Vec::new()),
    };

    let response = {
        let view = state
            .trajectory
            .planner_view(warning.as_ref().map(|(anchor, text)| (*anchor, text.as_str())));
        let request = PlanRequest {
            conversation_id: &state.conversation_id,
            turn,
            trajectory: &view,
            actions: descriptors,
            mode,
            skills: &skills,
            continuation: state.trajectory.last_continuation(),
        };
        state.scheduler.planner.plan_next_step(request).await
    };

    let plan = match response {
        Ok(plan) => plan,
        Err(err) if err.is_billing() => return PlanPhaseOutcome::Done(RunOutcome::Failed(err)),
        Err(err) => {
            tracing::warn!(run_id = %state.run_id, turn, error = %err, "planning failed");
            let warning = format!("{}: {err}", ForemanError::PlanningFailed);
            state.emit(&IterationRecord::new(turn, IterationPhase::Planned).with_warning(warning));
            return PlanPhaseOutcome::Skip;
        }
    };

    let plan_usage = plan.usage.unwrap_or_default();
    state.usage = state.usage.merge(&plan_usage);

    if plan.is_empty() {
        tracing::warn!(run_id = %state.run_id, turn, "planner returned nothing usable");
        state.emit(
            &IterationRecord::new(turn, IterationPhase::Planned)
                .with_thought(plan.thought)
                .with_usage(plan_usage)
                .with_warning(ForemanError::PlanningFailed.to_string()),
        );
        return PlanPhaseOutcome::Skip;
    }

    if mode == ActionMode::None && !plan.action_calls.is_empty() {
        return finish_at_limit(state, plan, plan_usage, budget.max_iterations(), turn);
    }

    let PlanResponse {
        action_calls,
        message,
        thought,
        raw_continuation,
        ..
    } = plan;
    let message = message.filter(|text| !text.trim().is_empty());
    let split = dedup::partition(state.trajectory.current_turn_calls(), action_calls);

    if split.fresh.is_empty() {
        if let Some(message) = message {
            return finish_with_message(
                state,
                message,
                thought,
                plan_usage,
                raw_continuation,
                turn,
            );
        }
        return report_repeated(state, split.repeated, thought, plan_usage, turn);
    }

    if !split.repeated.is_empty() {
        tracing::debug!(
            run_id = %state.run_id,
            turn,
            skipped = split.repeated.len(),
            "dropped repeated calls from a mixed batch"
        );
    }
    state.emit(
        &IterationRecord::new(turn, IterationPhase::Planned)
            .with_calls(split.fresh.clone())
            .with_thought(thought.clone())
            .with_usage(plan_usage),
    );
    PlanPhaseOutcome::Act(ChosenStep {
        calls: split.fresh,
        message,
        thought,
        usage: plan_usage,
        raw_continuation,
    })
}

fn finish_with_message(
    state: &mut RunState<'_>,
    message: String,
    thought: Option<String>,
    usage: UsageTotals,
    raw_continuation: Option<serde_json::Value>,
    turn: usize,
) -> PlanPhaseOutcome {
    let step = Step::agent(Some(message.clone()), Vec::new()).with_continuation(raw_continuation);
    if let Err(err) = state.push(step) {
        return PlanPhaseOutcome::Done(RunOutcome::Failed(err));
    }
    state.emit(
        &IterationRecord::new(turn, IterationPhase::Final)
            .with_thought(thought)
            .with_final_message(Some(message.clone()))
            .with_usage(usage),
    );
    PlanPhaseOutcome::Done(RunOutcome::Completed {
        final_message: Some(message),
        limit_reached: false,
    })
}

/// Final turn: the planner asked for actions anyway. They are not run.
fn finish_at_limit(
    state: &mut RunState<'_>,
    plan: PlanResponse,
    usage: UsageTotals,
    max_iterations: usize,
    turn: usize,
) -> PlanPhaseOutcome {
    let message = plan.message_text().map(str::to_string);
    let skipped = plan.action_calls.len();
    tracing::warn!(
        run_id = %state.run_id,
        turn,
        skipped,
        "iteration limit reached with actions pending"
    );
    if let Some(text) = &message {
        if let Err(err) = state.push(
            Step::agent(Some(text.clone()), Vec::new()).with_continuation(plan.raw_continuation),
        ) {
            return PlanPhaseOutcome::Done(RunOutcome::Failed(err));
        }
    }
    state.emit(
        &IterationRecord::new(turn, IterationPhase::Final)
            .with_thought(plan.thought)
            .with_final_message(message.clone())
            .with_usage(usage)
            .with_warning(format!(
                "Reached the iteration limit ({max_iterations}); \
                 {skipped} requested action(s) were not run"
            )),
    );
    PlanPhaseOutcome::Done(RunOutcome::Completed {
        final_message: message,
        limit_reached: true,
    })
}

/// Every call was already issued this user turn: warn and let the planner retry.
fn report_repeated(
    state: &mut RunState<'_>,
    repeated: Vec<ActionCall>,
    thought: Option<String>,
    usage: UsageTotals,
    turn: usize,
) -> PlanPhaseOutcome {
    let mut seen = HashSet::new();
    let names: Vec<&str> = repeated
        .iter()
        .map(|call| call.action_name.as_str())
        .filter(|name| seen.insert(*name))
        .collect();
    let warning = format!(
        "Repeated action: {} was already called with the same arguments since the last user \
         message. Use the earlier result or try a different approach.",
        names.join(", ")
    );
    tracing::warn!(run_id = %state.run_id, turn, actions = %names.join(","), "repeated action");
    if let Err(err) = state.push(Step::system(warning.clone())) {
        return PlanPhaseOutcome::Done(RunOutcome::Failed(err));
    }
    state.emit(
        &IterationRecord::new(turn, IterationPhase::Planned)
            .with_calls(repeated)
            .with_thought(thought)
            .with_usage(usage)
            .with_warning(warning),
    );
    PlanPhaseOutcome::Skip
}
