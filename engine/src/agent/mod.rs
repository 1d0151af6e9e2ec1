//! OODA decision loop
//!
//! One [`DecisionEngine`] drives a task from its text to a single reported
//! answer. Per-task state (memory, scratch, call history, transcript) lives in
//! the submodules and is owned by the worker thread running the task.

pub mod advisor;
pub mod context;
pub mod core;
pub mod memory;
pub mod prompt;
pub mod working_memory;

pub use context::{CallHistory, CallRecord, IdLedger, LoopGuard, TaskContext};
pub use self::core::{DecisionEngine, RunResult, INVALID_JSON_NOTICE};
pub use memory::{Memory, Scratch};
pub use working_memory::Transcript;
