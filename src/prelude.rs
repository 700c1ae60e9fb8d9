//! Convenience re-exports for common use.

pub use crate::agent_loop::{
    IterationScheduler, RunEvent, RunHandle, RunOutcome, RunReport, RunRequest, StreamMessage,
};
pub use crate::config::ForemanConfig;
pub use crate::confirmation::{
    ConfirmationDecision, ConfirmationGate, ConfirmationRequest, ConfirmationResponse,
    ResponseTarget,
};
pub use crate::error::{ForemanError, Result};
pub use crate::planner::{ActionMode, PlanRequest, PlanResponse, Planner};
pub use crate::tools::{
    Action, ActionArguments, ActionContext, ActionParameters, ActionRegistry, FnAction,
    TypedAction,
};
pub use crate::types::{
    ActionCall, IterationPhase, IterationRecord, ObservationContent, ObservationResult, Step,
    Trajectory, UsageTotals,
};
pub use crate::CancellationToken;
