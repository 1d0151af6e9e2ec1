//! OODA Engine Library
//!
//! Observe-Orient-Decide-Act agent for business-API benchmark tasks. Used by
//! the `ooda` binary and by the integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Telemetry and Observability
pub mod telemetry;

/// Decision model abstraction and the OpenAI-compatible client
pub mod llm;

/// Business task API and benchmark platform clients
pub mod task_api;

/// Input gates and proposal checks
pub mod guardrails;

/// Failure text classification and escalation
pub mod error_classifier;

/// Rate limiting module
pub mod rate_limiter;

/// OODA decision loop
pub mod agent;

/// Batch execution over a worker pool
pub mod runner;

/// Per-task traces and session reports
pub mod trace;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

/// In-memory model and task API doubles for tests
pub mod fakes;
