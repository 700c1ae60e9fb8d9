//! Run event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confirmation::{ConfirmationRequest, ConfirmationResponse};
use crate::types::{IterationPhase, IterationRecord};

use super::types::RunId;

/// Callback used for streaming run events.
pub type RunEventSink = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// Callback receiving bare messages; the caller wraps them in an envelope.
pub type MessageSink = Arc<dyn Fn(StreamMessage) + Send + Sync>;

/// One message per scheduler phase transition, plus out-of-band
/// confirmation traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Planned { record: IterationRecord },
    Dispatching { record: IterationRecord },
    Resolved { record: IterationRecord },
    Final { record: IterationRecord },
    Paused { record: IterationRecord },
    ConfirmationRequest { request: ConfirmationRequest },
    ConfirmationResponse { response: ConfirmationResponse },
}

impl StreamMessage {
    /// Wrap a record in the message matching its phase.
    pub fn from_record(record: IterationRecord) -> Self {
        match record.phase {
            IterationPhase::Planned => Self::Planned { record },
            IterationPhase::Dispatching => Self::Dispatching { record },
            IterationPhase::Resolved => Self::Resolved { record },
            IterationPhase::Final => Self::Final { record },
            IterationPhase::Paused => Self::Paused { record },
        }
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Planned { .. } => "planned",
            Self::Dispatching { .. } => "dispatching",
            Self::Resolved { .. } => "resolved",
            Self::Final { .. } => "final",
            Self::Paused { .. } => "paused",
            Self::ConfirmationRequest { .. } => "confirmation_request",
            Self::ConfirmationResponse { .. } => "confirmation_response",
        }
    }

    pub fn record(&self) -> Option<&IterationRecord> {
        match self {
            Self::Planned { record }
            | Self::Dispatching { record }
            | Self::Resolved { record }
            | Self::Final { record }
            | Self::Paused { record } => Some(record),
            Self::ConfirmationRequest { .. } | Self::ConfirmationResponse { .. } => None,
        }
    }
}

/// Envelope for streaming run events.
///
/// `conversation_id` lets a multiplexing transport route concurrent
/// conversations; `run_id` is absent for confirmation traffic emitted outside
/// a scheduler run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub message: StreamMessage,
}

impl RunEvent {
    pub fn new(
        conversation_id: impl Into<String>,
        run_id: Option<RunId>,
        seq: u64,
        message: StreamMessage,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            run_id,
            seq,
            timestamp: Utc::now(),
            message,
        }
    }
}

/// Stamps messages of one run with its ids and a gap-free sequence number.
pub(crate) struct RunEventEmitter {
    conversation_id: String,
    run_id: RunId,
    seq: AtomicU64,
    sink: Option<RunEventSink>,
}

impl RunEventEmitter {
    pub(crate) fn new(
        conversation_id: impl Into<String>,
        run_id: RunId,
        sink: Option<RunEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conversation_id: conversation_id.into(),
            run_id,
            seq: AtomicU64::new(1),
            sink,
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn emit(&self, message: StreamMessage) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(RunEvent::new(
            self.conversation_id.clone(),
            Some(self.run_id),
            seq,
            message,
        ));
    }

    pub(crate) fn emit_record(&self, record: &IterationRecord) {
        if self.is_active() {
            self.emit(StreamMessage::from_record(record.clone()));
        }
    }

    /// A bare-message sink feeding this emitter, for the confirmation gate.
    pub(crate) fn message_sink(self: &Arc<Self>) -> MessageSink {
        let emitter = Arc::clone(self);
        Arc::new(move |message| emitter.emit(message))
    }
}
