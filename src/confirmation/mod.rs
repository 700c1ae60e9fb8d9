//! Human confirmation gate.
//!
//! Risky actions park a [`ConfirmationRequest`] here and suspend until the
//! human-facing layer answers it through [`ConfirmationGate::respond`].
//! Requests queue per conversation in arrival order; the head of the queue is
//! the "active" one for simple clients, but every pending entry can be
//! answered directly by id.

pub mod types;

pub use types::{
    ConfirmationDecision, ConfirmationOption, ConfirmationRequest, ConfirmationResponse,
    InputKind, ResponseTarget, ALLOW_OPTION, DENY_OPTION,
};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::oneshot;

use crate::agent_loop::events::{MessageSink, RunEvent, RunEventSink, StreamMessage};
use crate::error::{ForemanError, Result};
use crate::util::lock;

struct Pending {
    request: ConfirmationRequest,
    reply: oneshot::Sender<ConfirmationResponse>,
}

#[derive(Default)]
struct GateInner {
    queues: Mutex<HashMap<String, VecDeque<Pending>>>,
    watchers: Mutex<HashMap<String, MessageSink>>,
    sink: Option<RunEventSink>,
    seq: AtomicU64,
}

/// Per-conversation FIFO of pending confirmations. Cheap to clone.
#[derive(Clone, Default)]
pub struct ConfirmationGate {
    inner: Arc<GateInner>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that reports requests and responses of unwatched conversations
    /// to `sink`.
    pub fn with_event_sink(sink: RunEventSink) -> Self {
        Self {
            inner: Arc::new(GateInner {
                sink: Some(sink),
                ..GateInner::default()
            }),
        }
    }

    /// Route one conversation's confirmation messages to `sink` until the
    /// returned guard is dropped.
    ///
    /// A later watcher of the same conversation replaces this one; dropping
    /// the earlier guard then leaves the later watcher in place.
    pub fn watch(&self, conversation_id: &str, sink: MessageSink) -> WatchGuard {
        lock(&self.inner.watchers).insert(conversation_id.to_string(), sink.clone());
        WatchGuard {
            gate: self.clone(),
            conversation_id: conversation_id.to_string(),
            sink,
        }
    }

    /// Queue a request and wait for its answer.
    ///
    /// No timeout is applied here. If the returned future is dropped the entry
    /// is removed from the queue. Fails with `ConfirmationAbandoned` when the
    /// conversation is cleared while waiting.
    pub async fn request(
        &self,
        conversation_id: &str,
        request: ConfirmationRequest,
    ) -> Result<ConfirmationResponse> {
        let request_id = request.request_id.clone();
        let (reply, answer) = oneshot::channel();
        {
            let mut queues = lock(&self.inner.queues);
            let queue = queues.entry(conversation_id.to_string()).or_default();
            if queue.iter().any(|p| p.request.request_id == request_id) {
                return Err(ForemanError::InvalidState(format!(
                    "confirmation '{request_id}' is already pending"
                )));
            }
            queue.push_back(Pending {
                request: request.clone(),
                reply,
            });
        }
        tracing::debug!(
            conversation_id,
            request_id = %request_id,
            slot = request.slot.as_deref().unwrap_or(""),
            "confirmation requested"
        );
        self.emit(conversation_id, StreamMessage::ConfirmationRequest { request });

        let _guard = PendingGuard {
            gate: self,
            conversation_id,
            request_id: &request_id,
        };
        answer
            .await
            .map_err(|_| ForemanError::ConfirmationAbandoned(request_id.clone()))
    }

    /// Answer a pending request.
    ///
    /// Returns `Ok(None)` when nothing matches: late or duplicate answers are
    /// ignored. Selecting an option the request does not offer is rejected
    /// and leaves the request pending.
    pub fn respond(
        &self,
        conversation_id: &str,
        target: impl Into<ResponseTarget>,
        decision: ConfirmationDecision,
    ) -> Result<Option<ConfirmationResponse>> {
        let target = target.into();
        let pending = {
            let mut queues = lock(&self.inner.queues);
            let Some(queue) = queues.get_mut(conversation_id) else {
                return Ok(None);
            };
            let index = match &target {
                ResponseTarget::First => (!queue.is_empty()).then_some(0),
                ResponseTarget::Request(id) => {
                    queue.iter().position(|p| &p.request.request_id == id)
                }
            };
            let Some(index) = index else {
                return Ok(None);
            };
            if let ConfirmationDecision::Selected { option_id } = &decision {
                let request = &queue[index].request;
                if !request.options.is_empty() && !request.offers(option_id) {
                    return Err(ForemanError::InvalidArgument(format!(
                        "option '{option_id}' is not offered by confirmation '{}'",
                        request.request_id
                    )));
                }
            }
            let pending = queue.remove(index);
            if queue.is_empty() {
                queues.remove(conversation_id);
            }
            pending
        };
        let Some(pending) = pending else {
            return Ok(None);
        };

        let response = ConfirmationResponse {
            request_id: pending.request.request_id,
            decision,
            timestamp: Utc::now(),
        };
        tracing::debug!(
            conversation_id,
            request_id = %response.request_id,
            approved = response.is_approved(),
            "confirmation answered"
        );
        // The waiter may already be gone; the answer is still reported.
        let _ = pending.reply.send(response.clone());
        self.emit(
            conversation_id,
            StreamMessage::ConfirmationResponse {
                response: response.clone(),
            },
        );
        Ok(Some(response))
    }

    /// Pending requests of a conversation, oldest first.
    pub fn pending(&self, conversation_id: &str) -> Vec<ConfirmationRequest> {
        lock(&self.inner.queues)
            .get(conversation_id)
            .map(|queue| queue.iter().map(|p| p.request.clone()).collect())
            .unwrap_or_default()
    }

    /// Head of the conversation's queue.
    pub fn active(&self, conversation_id: &str) -> Option<ConfirmationRequest> {
        lock(&self.inner.queues)
            .get(conversation_id)
            .and_then(|queue| queue.front())
            .map(|p| p.request.clone())
    }

    /// Tear down a conversation's queue. Every waiter fails with
    /// `ConfirmationAbandoned`. Returns how many requests were dropped.
    pub fn clear_conversation(&self, conversation_id: &str) -> usize {
        let dropped = lock(&self.inner.queues)
            .remove(conversation_id)
            .map(|queue| queue.len())
            .unwrap_or(0);
        if dropped > 0 {
            tracing::info!(conversation_id, dropped, "confirmation queue cleared");
        }
        dropped
    }

    fn remove(&self, conversation_id: &str, request_id: &str) {
        let mut queues = lock(&self.inner.queues);
        if let Some(queue) = queues.get_mut(conversation_id) {
            queue.retain(|p| p.request.request_id != request_id);
            if queue.is_empty() {
                queues.remove(conversation_id);
            }
        }
    }

    fn emit(&self, conversation_id: &str, message: StreamMessage) {
        let watcher = lock(&self.inner.watchers).get(conversation_id).cloned();
        if let Some(watcher) = watcher {
            watcher(message);
        } else if let Some(sink) = &self.inner.sink {
            sink(RunEvent::new(
                conversation_id,
                None,
                self.inner.seq.fetch_add(1, Ordering::Relaxed),
                message,
            ));
        }
    }
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = lock(&self.inner.queues);
        f.debug_struct("ConfirmationGate")
            .field("conversations", &queues.len())
            .field(
                "pending",
                &queues.values().map(VecDeque::len).sum::<usize>(),
            )
            .finish()
    }
}

/// Removes a request whose waiter went away before it was answered.
struct PendingGuard<'a> {
    gate: &'a ConfirmationGate,
    conversation_id: &'a str,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.gate.remove(self.conversation_id, self.request_id);
    }
}

/// Keeps a conversation watcher installed; see [`ConfirmationGate::watch`].
pub struct WatchGuard {
    gate: ConfirmationGate,
    conversation_id: String,
    sink: MessageSink,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let mut watchers = lock(&self.gate.inner.watchers);
        let owned = watchers
            .get(&self.conversation_id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.sink));
        if owned {
            watchers.remove(&self.conversation_id);
        }
    }
}
