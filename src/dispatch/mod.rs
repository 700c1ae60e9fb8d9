//! Concurrent action dispatch.
//!
//! Every call in a batch runs at once and is raced against the run's
//! cancellation token. Results come back in call order whatever the
//! completion order, one per call, each passed through the output bounder.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::confirmation::{ConfirmationGate, ConfirmationRequest, ConfirmationResponse};
use crate::error::{ForemanError, Result};
use crate::output::OutputBounder;
use crate::tools::{
    validate_arguments, Action, ActionArguments, ActionContext, ActionRegistry, RiskDecision,
    RiskPolicy,
};
use crate::types::{ActionCall, ObservationResult, UsageTotals};
use crate::util::canonical::decode_arguments;
use crate::util::usage::UsageSink;

/// Per-batch inputs shared by every call.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub conversation_id: String,
    pub cancellation: CancellationToken,
    pub confirmations: ConfirmationGate,
}

impl DispatchContext {
    pub fn new(
        conversation_id: impl Into<String>,
        cancellation: CancellationToken,
        confirmations: ConfirmationGate,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            cancellation,
            confirmations,
        }
    }
}

/// What a batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// One result per call, in call order.
    pub results: Vec<ObservationResult>,
    /// Usage reported by actions that call a model themselves.
    pub usage: UsageTotals,
    /// True when at least one call was cut short by cancellation.
    pub interrupted: bool,
}

#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ActionRegistry>,
    policy: Arc<RiskPolicy>,
    bounder: OutputBounder,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ActionRegistry>, policy: RiskPolicy, bounder: OutputBounder) -> Self {
        Self {
            registry,
            policy: Arc::new(policy),
            bounder,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Run a batch of calls concurrently.
    pub async fn dispatch(&self, calls: &[ActionCall], ctx: &DispatchContext) -> DispatchOutcome {
        let usage = UsageSink::new();
        let pending = calls.iter().map(|call| self.race(call, ctx, &usage));
        let results: Vec<ObservationResult> = join_all(pending).await;
        let interrupted = results.iter().any(ObservationResult::is_interrupted);
        DispatchOutcome {
            results,
            usage: usage.total(),
            interrupted,
        }
    }

    async fn race(
        &self,
        call: &ActionCall,
        ctx: &DispatchContext,
        usage: &UsageSink,
    ) -> ObservationResult {
        let cancellation = ctx.cancellation.child_token();
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                tracing::debug!(
                    conversation_id = %ctx.conversation_id,
                    call_id = %call.id,
                    action = %call.action_name,
                    "action interrupted"
                );
                return ObservationResult::interrupted(&call.id);
            }
            result = self.execute(call, ctx, cancellation.clone(), usage) => result,
        };
        self.bounder.bound_result(result)
    }

    async fn execute(
        &self,
        call: &ActionCall,
        ctx: &DispatchContext,
        cancellation: CancellationToken,
        usage: &UsageSink,
    ) -> ObservationResult {
        let Some(action) = self.registry.get(&call.action_name) else {
            let err = ForemanError::UnknownAction(call.action_name.clone());
            tracing::warn!(call_id = %call.id, action = %call.action_name, "unknown action");
            return error_result(call, &err);
        };

        let arguments = decode_arguments(&call.arguments).into_owned();
        if let Err(err) =
            validate_arguments(&call.action_name, &arguments, &action.parameters().schema)
        {
            tracing::warn!(
                call_id = %call.id,
                action = %call.action_name,
                error = %err,
                "invalid arguments"
            );
            return error_result(call, &err);
        }
        let args = ActionArguments::new(arguments);
        let action_ctx = ActionContext {
            conversation_id: ctx.conversation_id.clone(),
            call_id: call.id.clone(),
            action_name: call.action_name.clone(),
            cancellation,
            confirmations: ctx.confirmations.clone(),
            usage: usage.clone(),
        };

        match self.policy.decide(action.as_ref(), &args) {
            RiskDecision::Proceed => {}
            RiskDecision::Decline => {
                tracing::info!(
                    call_id = %call.id,
                    action = %call.action_name,
                    "declined by approval policy"
                );
                return ObservationResult::error(
                    &call.id,
                    format!(
                        "Declined: '{}' is not permitted by the approval policy",
                        call.action_name
                    ),
                );
            }
            RiskDecision::Ask => {
                if let Err(result) =
                    self.confirm(call, action.as_ref(), &args, &action_ctx).await
                {
                    return result;
                }
            }
        }

        tracing::debug!(
            conversation_id = %ctx.conversation_id,
            call_id = %call.id,
            action = %call.action_name,
            "executing action"
        );
        let outcome = AssertUnwindSafe(action.execute(&args, &action_ctx))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(content)) => ObservationResult::ok(&call.id, content),
            Ok(Err(err)) => {
                tracing::warn!(
                    call_id = %call.id,
                    action = %call.action_name,
                    error = %err,
                    "action failed"
                );
                error_result(call, &ForemanError::action(&call.action_name, err.to_string()))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(
                    call_id = %call.id,
                    action = %call.action_name,
                    %message,
                    "action panicked"
                );
                error_result(call, &ForemanError::action(&call.action_name, message))
            }
        }
    }

    /// Route a risky call through the gate. `Err` carries the declined result.
    async fn confirm(
        &self,
        call: &ActionCall,
        action: &dyn Action,
        args: &ActionArguments,
        ctx: &ActionContext,
    ) -> std::result::Result<(), ObservationResult> {
        let category = action
            .risk()
            .map(|risk| risk.category.as_str())
            .unwrap_or("risky");
        let request = ConfirmationRequest::approval(&call.action_name, category, args.raw());
        let response: Result<ConfirmationResponse> = ctx
            .confirmations
            .request(&ctx.conversation_id, request)
            .await;
        match response {
            Ok(response) if response.is_approved() => Ok(()),
            Ok(response) => {
                tracing::info!(
                    call_id = %call.id,
                    action = %call.action_name,
                    "confirmation declined"
                );
                Err(declined_result(call, &response))
            }
            Err(err) => Err(error_result(call, &err)),
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("bounder", &self.bounder)
            .finish()
    }
}

fn error_result(call: &ActionCall, err: &ForemanError) -> ObservationResult {
    ObservationResult::error(&call.id, format!("Error: {err}"))
}

/// Guidance is returned verbatim so the planner can follow it instead.
fn declined_result(call: &ActionCall, response: &ConfirmationResponse) -> ObservationResult {
    match response.guidance() {
        Some(guidance) => ObservationResult::error(
            &call.id,
            format!(
                "The user declined '{}' and replied instead: {guidance}",
                call.action_name
            ),
        ),
        None => error_result(
            call,
            &ForemanError::ConfirmationDeclined(call.action_name.clone()),
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
