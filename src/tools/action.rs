//! Action trait, execution context and closure/typed wrappers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::arguments::ActionArguments;
use super::types::{ActionParameters, RiskProfile};
use crate::confirmation::{ConfirmationGate, ConfirmationRequest, ConfirmationResponse};
use crate::error::{ForemanError, Result};
use crate::types::{ObservationContent, UsageTotals};
use crate::util::usage::UsageSink;

/// Context available during action execution.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub conversation_id: String,
    /// Call id assigned by the planner.
    pub call_id: String,
    pub action_name: String,
    /// Child of the run's token; cancelled when the run is paused.
    pub cancellation: CancellationToken,
    pub confirmations: ConfirmationGate,
    /// Where actions that call a model themselves report that usage.
    pub usage: UsageSink,
}

impl ActionContext {
    /// A detached context for running an action outside a scheduler run.
    pub fn detached(action_name: impl Into<String>) -> Self {
        Self {
            conversation_id: "detached".to_string(),
            call_id: uuid::Uuid::new_v4().to_string(),
            action_name: action_name.into(),
            cancellation: CancellationToken::new(),
            confirmations: ConfirmationGate::new(),
            usage: UsageSink::new(),
        }
    }

    /// Ask the human before a risky side effect.
    ///
    /// Suspends until answered. Fails with `InvalidState` if the run is paused
    /// while waiting, and with `ConfirmationAbandoned` if the conversation's
    /// queue is torn down.
    pub async fn confirm(&self, request: ConfirmationRequest) -> Result<ConfirmationResponse> {
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(ForemanError::InvalidState(
                "run paused while awaiting confirmation".to_string(),
            )),
            response = self.confirmations.request(&self.conversation_id, request) => response,
        }
    }

    pub fn record_usage(&self, usage: &UsageTotals) {
        self.usage.record(usage);
    }
}

/// Core action trait. Implement it to expose an operation to the planner.
#[async_trait]
pub trait Action: Send + Sync {
    /// Action name (must match what the planner calls).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &ActionParameters;

    /// `Some` when the action needs confirmation unless pre-approved.
    fn risk(&self) -> Option<&RiskProfile> {
        None
    }

    /// Execute the action with validated arguments.
    async fn execute(
        &self,
        args: &ActionArguments,
        ctx: &ActionContext,
    ) -> Result<ObservationContent>;
}

/// An action whose arguments are a fixed record type.
///
/// Register through [`Typed`]; malformed arguments fail at the dispatch
/// boundary before `run` is called.
#[async_trait]
pub trait TypedAction: Send + Sync + 'static {
    type Args: serde::de::DeserializeOwned + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &ActionParameters;

    fn risk(&self) -> Option<&RiskProfile> {
        None
    }

    async fn run(&self, args: Self::Args, ctx: &ActionContext) -> Result<ObservationContent>;
}

/// Adapter exposing a [`TypedAction`] through [`Action`].
pub struct Typed<T>(pub T);

#[async_trait]
impl<T: TypedAction> Action for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters(&self) -> &ActionParameters {
        self.0.parameters()
    }

    fn risk(&self) -> Option<&RiskProfile> {
        self.0.risk()
    }

    async fn execute(
        &self,
        args: &ActionArguments,
        ctx: &ActionContext,
    ) -> Result<ObservationContent> {
        let parsed = args.deserialize::<T::Args>()?;
        self.0.run(parsed, ctx).await
    }
}

type ActionHandler = dyn Fn(
        ActionArguments,
        ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ObservationContent>> + Send>>
    + Send
    + Sync;

/// Closure-based action for quick registration.
pub struct FnAction {
    name: String,
    description: String,
    parameters: ActionParameters,
    risk: Option<RiskProfile>,
    handler: Arc<ActionHandler>,
}

impl FnAction {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ActionParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ActionArguments, ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ObservationContent>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            risk: None,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Flag the action as risky under `category`.
    pub fn risky(mut self, category: impl Into<String>) -> Self {
        self.risk = Some(RiskProfile::new(category));
        self
    }
}

#[async_trait]
impl Action for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ActionParameters {
        &self.parameters
    }

    fn risk(&self) -> Option<&RiskProfile> {
        self.risk.as_ref()
    }

    async fn execute(
        &self,
        args: &ActionArguments,
        ctx: &ActionContext,
    ) -> Result<ObservationContent> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction")
            .field("name", &self.name)
            .field("risk", &self.risk)
            .finish()
    }
}
