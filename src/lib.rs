//! Foreman: the orchestration core of an autonomous agent.
//!
//! An [`IterationScheduler`](agent_loop::IterationScheduler) asks a
//! [`Planner`](planner::Planner) for the next step, runs the requested actions
//! concurrently through the [`ToolDispatcher`](dispatch::ToolDispatcher),
//! routes risky ones through the [`ConfirmationGate`](confirmation::ConfirmationGate)
//! and feeds the results back until the planner answers or the iteration
//! limit is hit. A run can be paused at any time by cancelling its token.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use foreman::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Planner for Echo {
//!     async fn plan_next_step(&self, _request: PlanRequest<'_>) -> Result<PlanResponse> {
//!         Ok(PlanResponse::final_message("done"))
//!     }
//! }
//!
//! # async fn example() -> foreman::error::Result<()> {
//! let scheduler = IterationScheduler::new(
//!     Arc::new(Echo),
//!     ActionRegistry::new(),
//!     ForemanConfig::from_env()?,
//! )?;
//! let mut trajectory = Trajectory::new();
//! trajectory.push(Step::user("hello"))?;
//! let report = scheduler.run(RunRequest::new("conversation-1", trajectory)).await;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod confirmation;
pub mod dispatch;
pub mod error;
pub mod output;
pub mod planner;
pub mod prelude;
pub mod skills;
pub mod tools;
pub mod types;
pub mod util;

pub use tokio_util::sync::CancellationToken;
