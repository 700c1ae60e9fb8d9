//! Core run types for the scheduler.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ForemanError;
use crate::types::{Trajectory, UsageTotals};

/// Unique run identifier.
pub type RunId = Uuid;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Paused,
    Failed,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The planner produced a final message, or the iteration limit was hit.
    Completed {
        final_message: Option<String>,
        limit_reached: bool,
    },
    /// Cancellation was observed at a checkpoint.
    Paused,
    /// Billing or quota failure from the planner.
    Failed(ForemanError),
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed { .. } => RunStatus::Completed,
            Self::Paused => RunStatus::Paused,
            Self::Failed(_) => RunStatus::Failed,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

/// Everything a finished run hands back.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// Durable steps only; resume by passing this back with a fresh token.
    pub trajectory: Trajectory,
    pub usage: UsageTotals,
    /// Turns started, 1-based count.
    pub turns: usize,
}
