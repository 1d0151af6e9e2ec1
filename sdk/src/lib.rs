//! OODA agent SDK
//!
//! Shared types for the agent engine: the decision schema the model fills in,
//! the closed set of task API actions, terminal outcomes, and the engine error
//! taxonomy.

/// Error types and handling
pub mod errors;

/// Decision, action and response types
pub mod types;

// Re-export commonly used types
pub use errors::{AgentErrorExt, EngineError};
pub use types::{
    Action, AgentResponse, Completion, EntityKind, EntityLink, Outcome, StepDecision, PAGE_LIMIT,
};
