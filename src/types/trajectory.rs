//! Trajectory types: steps, action calls and their observations.

use std::borrow::Cow;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForemanError, Result};

/// Content recorded for a call whose outcome was abandoned on cancellation.
pub const INTERRUPTED_SENTINEL: &str = "[interrupted]";

/// Who authored a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepSource {
    User,
    Agent,
    System,
}

/// One invocation requested by the planner in a single turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionCall {
    pub id: String,
    #[serde(rename = "name")]
    pub action_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ActionCall {
    pub fn new(
        id: impl Into<String>,
        action_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            action_name: action_name.into(),
            arguments,
        }
    }

    /// Order-independent identity of name + arguments, ignoring the call id.
    pub fn fingerprint(&self) -> String {
        crate::util::canonical::fingerprint(&self.action_name, &self.arguments)
    }
}

/// A typed segment of structured observation content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    Text {
        text: String,
    },
    Media {
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

/// The payload of an observation: plain text or ordered typed segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ObservationContent {
    Text(String),
    Segments(Vec<ContentSegment>),
}

impl ObservationContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Concatenated text of every text part; media is skipped.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text.as_str()),
            Self::Segments(segments) => Cow::Owned(
                segments
                    .iter()
                    .filter_map(|segment| match segment {
                        ContentSegment::Text { text } => Some(text.as_str()),
                        ContentSegment::Media { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            ),
        }
    }
}

impl From<String> for ObservationContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ObservationContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// The outcome of exactly one dispatched action call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationResult {
    pub source_call_id: String,
    pub content: ObservationContent,
    #[serde(default)]
    pub is_error: bool,
}

impl ObservationResult {
    pub fn ok(source_call_id: impl Into<String>, content: ObservationContent) -> Self {
        Self {
            source_call_id: source_call_id.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(source_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_call_id: source_call_id.into(),
            content: ObservationContent::Text(message.into()),
            is_error: true,
        }
    }

    pub fn interrupted(source_call_id: impl Into<String>) -> Self {
        Self {
            source_call_id: source_call_id.into(),
            content: ObservationContent::Text(INTERRUPTED_SENTINEL.to_string()),
            is_error: true,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(&self.content, ObservationContent::Text(text) if text == INTERRUPTED_SENTINEL)
    }
}

/// One entry of a trajectory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub source: StepSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_calls: Vec<ActionCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<ObservationResult>,
    /// Opaque planner state carried across turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_continuation: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Set on in-memory warning steps that must never be persisted.
    #[serde(skip)]
    pub ephemeral: bool,
}

impl Step {
    fn base(source: StepSource) -> Self {
        Self {
            source,
            message: None,
            action_calls: Vec::new(),
            observations: Vec::new(),
            raw_continuation: None,
            timestamp: Some(Utc::now()),
            ephemeral: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::base(StepSource::User)
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Self::base(StepSource::System)
        }
    }

    pub fn agent(message: Option<String>, action_calls: Vec<ActionCall>) -> Self {
        Self {
            message,
            action_calls,
            ..Self::base(StepSource::Agent)
        }
    }

    /// Observations answering the calls of the preceding agent step.
    pub fn observations(observations: Vec<ObservationResult>) -> Self {
        Self {
            observations,
            ..Self::base(StepSource::System)
        }
    }

    pub fn with_continuation(mut self, raw: Option<serde_json::Value>) -> Self {
        self.raw_continuation = raw;
        self
    }

    pub(crate) fn ephemeral_warning(text: impl Into<String>) -> Self {
        Self {
            ephemeral: true,
            timestamp: None,
            ..Self::system(text)
        }
    }
}

/// Ordered, append-only record of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Trajectory {
    steps: Vec<Step>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from recorded history, validating observation ownership.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self> {
        let mut trajectory = Self::new();
        for step in steps {
            trajectory.push(step)?;
        }
        Ok(trajectory)
    }

    /// Append a step.
    ///
    /// Every observation must answer a call of the immediately preceding agent
    /// step.
    pub fn push(&mut self, step: Step) -> Result<()> {
        if !step.observations.is_empty() {
            let previous = self
                .steps
                .last()
                .filter(|previous| previous.source == StepSource::Agent)
                .ok_or_else(|| {
                    ForemanError::InvalidState(
                        "observations must follow an agent step".to_string(),
                    )
                })?;
            for observation in &step.observations {
                let owned = previous
                    .action_calls
                    .iter()
                    .any(|call| call.id == observation.source_call_id);
                if !owned {
                    return Err(ForemanError::InvalidState(format!(
                        "observation for unknown call '{}'",
                        observation.source_call_id
                    )));
                }
            }
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps safe to write to durable storage.
    pub fn durable_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|step| !step.ephemeral)
            .cloned()
            .collect()
    }

    /// Action calls issued since the most recent user step.
    ///
    /// Calls whose result is the interrupted sentinel are left out: they never
    /// produced an outcome, so a resumed run may issue them again.
    pub fn current_turn_calls(&self) -> impl Iterator<Item = &ActionCall> {
        let start = self
            .steps
            .iter()
            .rposition(|step| step.source == StepSource::User)
            .map(|index| index + 1)
            .unwrap_or(0);
        let window = &self.steps[start..];
        window
            .iter()
            .enumerate()
            .filter(|(_, step)| step.source == StepSource::Agent)
            .flat_map(move |(index, step)| {
                let answers: &[ObservationResult] = window
                    .get(index + 1)
                    .map(|next| next.observations.as_slice())
                    .unwrap_or_default();
                step.action_calls.iter().filter(move |call| {
                    !answers
                        .iter()
                        .any(|result| result.source_call_id == call.id && result.is_interrupted())
                })
            })
    }

    /// Most recent planner continuation blob, if any.
    pub fn last_continuation(&self) -> Option<&serde_json::Value> {
        self.steps
            .iter()
            .rev()
            .find_map(|step| step.raw_continuation.as_ref())
    }

    /// The steps as the planner should see them, with an ephemeral warning
    /// inserted at `anchor` (clamped to the current length).
    pub fn planner_view(&self, warning: Option<(usize, &str)>) -> Cow<'_, [Step]> {
        match warning {
            None => Cow::Borrowed(self.steps.as_slice()),
            Some((anchor, text)) => {
                let mut steps = self.steps.clone();
                let at = anchor.min(steps.len());
                steps.insert(at, Step::ephemeral_warning(text));
                Cow::Owned(steps)
            }
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Encode raw bytes the way media segments are serialized.
pub fn encode_media(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
