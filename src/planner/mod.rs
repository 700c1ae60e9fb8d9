//! The planner contract: given the trajectory so far, choose the next step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Result;
use crate::skills::Skill;
use crate::tools::ActionDescriptor;
use crate::types::{ActionCall, Step, UsageTotals};

/// Whether the planner may request actions this turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionMode {
    #[default]
    Auto,
    /// Final turn: the planner must answer without actions.
    None,
}

/// Everything the planner sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub conversation_id: &'a str,
    pub turn: usize,
    /// Durable steps plus any ephemeral iteration-limit warning.
    pub trajectory: &'a [Step],
    pub actions: &'a [ActionDescriptor],
    pub mode: ActionMode,
    pub skills: &'a [Skill],
    /// Opaque state the planner returned on an earlier turn.
    pub continuation: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanResponse {
    #[serde(default)]
    pub action_calls: Vec<ActionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageTotals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_continuation: Option<serde_json::Value>,
}

impl PlanResponse {
    pub fn final_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn actions(calls: Vec<ActionCall>) -> Self {
        Self {
            action_calls: calls,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: UsageTotals) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    /// A non-blank message.
    pub fn message_text(&self) -> Option<&str> {
        self.message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
    }

    /// Neither actions nor a message: nothing to act on.
    pub fn is_empty(&self) -> bool {
        self.action_calls.is_empty() && self.message_text().is_none()
    }
}

/// Language-model backed step selection.
///
/// Quota and billing failures should be returned as
/// [`ForemanError::QuotaExceeded`](crate::error::ForemanError::QuotaExceeded)
/// or `BillingFailure`; they end the run. Any other error only costs the turn.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan_next_step(&self, request: PlanRequest<'_>) -> Result<PlanResponse>;
}
