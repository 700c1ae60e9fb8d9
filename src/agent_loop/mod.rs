//! Agent loop primitives (scheduler, runs, events).

pub mod events;
pub mod runner;
pub mod types;

pub use events::{MessageSink, RunEvent, RunEventSink, StreamMessage};
pub use runner::{Checkpoint, IterationScheduler, RunHandle, RunRequest};
pub use types::*;
