//! Iteration scheduler: the plan, act, observe loop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ForemanConfig;
use crate::confirmation::ConfirmationGate;
use crate::dispatch::ToolDispatcher;
use crate::error::{ForemanError, Result};
use crate::planner::Planner;
use crate::skills::SkillCache;
use crate::tools::ActionRegistry;
use crate::types::Trajectory;

use super::events::{RunEvent, RunEventSink};
use super::types::{RunId, RunReport};

mod checkpoint;
mod dedup;
mod engine;
mod limits;

#[cfg(test)]
mod tests;

pub use checkpoint::Checkpoint;

/// Request payload to start a run.
#[derive(Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub conversation_id: String,
    /// Durable history to continue from. On resume, reload it and pass a
    /// fresh cancellation token.
    pub trajectory: Trajectory,
    /// Overrides the configured limit for this run.
    pub max_iterations: Option<usize>,
    pub cancellation: CancellationToken,
    pub confirmations: ConfirmationGate,
    pub event_sink: Option<RunEventSink>,
}

impl RunRequest {
    pub fn new(conversation_id: impl Into<String>, trajectory: Trajectory) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            trajectory,
            max_iterations: None,
            cancellation: CancellationToken::new(),
            confirmations: ConfirmationGate::new(),
            event_sink: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_confirmations(mut self, confirmations: ConfirmationGate) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_event_sink(mut self, sink: RunEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("run_id", &self.run_id)
            .field("conversation_id", &self.conversation_id)
            .field("steps", &self.trajectory.len())
            .field("max_iterations", &self.max_iterations)
            .field("event_sink", &self.event_sink.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Handle for an in-flight run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancellation: CancellationToken,
    events: Option<mpsc::UnboundedReceiver<RunEvent>>,
    result_rx: oneshot::Receiver<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stream of this run's events. Available once.
    pub fn events(&mut self) -> Option<UnboundedReceiverStream<RunEvent>> {
        self.events.take().map(UnboundedReceiverStream::new)
    }

    /// Request a pause; the run stops at its next checkpoint.
    pub fn pause(&self) {
        self.cancellation.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub async fn wait(self) -> Result<RunReport> {
        self.result_rx.await.map_err(|_| {
            ForemanError::InvalidState("run task ended without a report".to_string())
        })
    }
}

/// Drives runs against one planner and action set.
#[derive(Clone)]
pub struct IterationScheduler {
    planner: Arc<dyn Planner>,
    dispatcher: ToolDispatcher,
    config: ForemanConfig,
    skills: Option<SkillCache>,
}

impl IterationScheduler {
    pub fn new(
        planner: Arc<dyn Planner>,
        registry: ActionRegistry,
        config: ForemanConfig,
    ) -> Result<Self> {
        config.validate()?;
        let dispatcher = ToolDispatcher::new(
            Arc::new(registry),
            config.risk_policy()?,
            config.output_bounder(),
        );
        Ok(Self {
            planner,
            dispatcher,
            config,
            skills: None,
        })
    }

    /// Skills handed to the planner on every turn.
    pub fn with_skills(mut self, skills: SkillCache) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Run to completion on the current task.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        engine::run_loop(self, request).await
    }

    /// Spawn the run and return a handle for its events and result.
    pub fn start(&self, request: RunRequest) -> RunHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let run_id = request.run_id;
        let cancellation = request.cancellation.clone();

        let downstream = request.event_sink.clone();
        let sink: RunEventSink = Arc::new(move |event: RunEvent| {
            if let Some(downstream) = &downstream {
                downstream(event.clone());
            }
            let _ = event_tx.send(event);
        });
        let request = request.with_event_sink(sink);

        let scheduler = self.clone();
        tokio::spawn(async move {
            let report = scheduler.run(request).await;
            let _ = result_tx.send(report);
        });

        RunHandle {
            run_id,
            cancellation,
            events: Some(event_rx),
            result_rx,
        }
    }
}

impl std::fmt::Debug for IterationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationScheduler")
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .field("skills", &self.skills)
            .finish()
    }
}
