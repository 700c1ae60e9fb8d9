//! Actions the planner can invoke.

pub mod action;
pub mod arguments;
pub mod policy;
pub mod registry;
pub mod types;
pub mod validation;

pub use action::{Action, ActionContext, FnAction, Typed, TypedAction};
pub use arguments::ActionArguments;
pub use policy::{ApprovalPolicy, RiskDecision, RiskPolicy};
pub use registry::ActionRegistry;
pub use types::{ActionDescriptor, ActionParameters, ParameterBuilder, RiskProfile};
pub use validation::validate_arguments;
