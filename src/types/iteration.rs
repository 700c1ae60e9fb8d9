//! Per-phase iteration records yielded by the scheduler.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::trajectory::{ActionCall, ObservationResult};
use super::usage::UsageTotals;

/// Scheduler phase a record was produced in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IterationPhase {
    Planned,
    Dispatching,
    Resolved,
    Final,
    Paused,
}

/// Immutable snapshot of one scheduler phase transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationRecord {
    /// 1-based turn index.
    pub turn: usize,
    pub phase: IterationPhase,
    #[serde(default)]
    pub action_calls: Vec<ActionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_results: Option<Vec<ObservationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageTotals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl IterationRecord {
    pub fn new(turn: usize, phase: IterationPhase) -> Self {
        Self {
            turn,
            phase,
            action_calls: Vec::new(),
            action_results: None,
            thought: None,
            final_message: None,
            usage: None,
            warning: None,
        }
    }

    pub fn with_calls(mut self, calls: Vec<ActionCall>) -> Self {
        self.action_calls = calls;
        self
    }

    pub fn with_results(mut self, results: Vec<ObservationResult>) -> Self {
        self.action_results = Some(results);
        self
    }

    pub fn with_thought(mut self, thought: Option<String>) -> Self {
        self.thought = thought;
        self
    }

    pub fn with_final_message(mut self, message: Option<String>) -> Self {
        self.final_message = message;
        self
    }

    pub fn with_usage(mut self, usage: UsageTotals) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn is_warning(&self) -> bool {
        self.warning.is_some()
    }
}
