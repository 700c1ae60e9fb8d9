//! Confirmation request and response types.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Option id approving a dispatcher-raised confirmation.
pub const ALLOW_OPTION: &str = "allow";
/// Option id declining a dispatcher-raised confirmation.
pub const DENY_OPTION: &str = "deny";

/// One choice offered to the human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConfirmationOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn allow() -> Self {
        Self::new(ALLOW_OPTION, "Allow")
    }

    pub fn deny() -> Self {
        Self::new(DENY_OPTION, "Deny")
    }
}

/// How the client should collect the answer.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputKind {
    #[default]
    Choice,
    Text,
}

/// A question put to the human before a risky side effect.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationRequest {
    #[builder(default = uuid::Uuid::new_v4().to_string(), into)]
    pub request_id: String,
    /// Action type plus risk sub-category, e.g. `write_file:file_write`.
    #[builder(into)]
    pub slot: Option<String>,
    #[builder(into)]
    pub title: String,
    #[builder(into)]
    pub message: String,
    #[builder(default)]
    #[serde(default)]
    pub options: Vec<ConfirmationOption>,
    #[builder(default)]
    #[serde(default)]
    pub input_kind: InputKind,
    #[builder(default)]
    #[serde(default)]
    pub context: serde_json::Value,
    /// Advisory only. The gate never expires a request on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ConfirmationRequest {
    /// The allow/deny request the dispatcher raises for a risky call.
    pub fn approval(
        action_name: &str,
        category: &str,
        arguments: &serde_json::Value,
    ) -> Self {
        Self::builder()
            .slot(format!("{action_name}:{category}"))
            .title(format!("Allow {action_name}?"))
            .message(format!(
                "The agent wants to run '{action_name}' ({category}) with arguments {arguments}"
            ))
            .options(vec![ConfirmationOption::allow(), ConfirmationOption::deny()])
            .context(serde_json::json!({
                "action": action_name,
                "risk_category": category,
                "arguments": arguments,
            }))
            .build()
    }

    pub fn offers(&self, option_id: &str) -> bool {
        self.options.iter().any(|option| option.id == option_id)
    }
}

/// What the human answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfirmationDecision {
    Selected { option_id: String },
    /// Free text that declines the action and redirects the agent.
    Guidance { text: String },
}

impl ConfirmationDecision {
    pub fn select(option_id: impl Into<String>) -> Self {
        Self::Selected {
            option_id: option_id.into(),
        }
    }

    pub fn guidance(text: impl Into<String>) -> Self {
        Self::Guidance { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationResponse {
    pub request_id: String,
    pub decision: ConfirmationDecision,
    pub timestamp: DateTime<Utc>,
}

impl ConfirmationResponse {
    /// True only when the allow option was selected.
    pub fn is_approved(&self) -> bool {
        matches!(
            &self.decision,
            ConfirmationDecision::Selected { option_id } if option_id == ALLOW_OPTION
        )
    }

    pub fn selected_option(&self) -> Option<&str> {
        match &self.decision {
            ConfirmationDecision::Selected { option_id } => Some(option_id),
            ConfirmationDecision::Guidance { .. } => None,
        }
    }

    pub fn guidance(&self) -> Option<&str> {
        match &self.decision {
            ConfirmationDecision::Guidance { text } => Some(text),
            ConfirmationDecision::Selected { .. } => None,
        }
    }
}

/// Which pending request a response is meant for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseTarget {
    Request(String),
    /// Head of the conversation's queue.
    First,
}

impl From<&str> for ResponseTarget {
    fn from(request_id: &str) -> Self {
        Self::Request(request_id.to_string())
    }
}
