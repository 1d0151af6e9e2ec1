//! Error types and handling
//!
//! This module provides the error types used throughout the OODA engine.
//! All errors implement the `AgentErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages never carry API keys or bearer tokens. Text coming back from
//! remote services is scrubbed by the engine before it is wrapped here.

use thiserror::Error;

/// Trait for agent error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information. All engine errors implement this trait.
pub trait AgentErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to print on the console and does not contain secrets
    /// or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around by the next decision
    /// step. Non-recoverable errors end the run.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: invalid or missing configuration, unknown models
/// - **Model**: inference endpoint failures and malformed decisions
/// - **Task API**: business API and benchmark platform failures
/// - **Secrets**: keychain and environment lookups
/// - **Runner**: worker failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{AgentErrorExt, EngineError};
///
/// let error = EngineError::SchemaViolation("missing action".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::ModelNotAllowed("gpt-2".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model not allowed: {0}")]
    ModelNotAllowed(String),

    // Model errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("Decision violates schema: {0}")]
    SchemaViolation(String),

    // Task API errors
    #[error("Task API error: {0}")]
    TaskApi(String),

    #[error("Platform error: {0}")]
    Platform(String),

    // Secret errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    #[error("Missing secret: {0}")]
    MissingSecret(String),

    // Runner errors
    #[error("Worker panicked while running task {0}")]
    WorkerPanicked(String),

    // Trace output errors
    #[error("Trace error: {0}")]
    Trace(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::ModelNotAllowed(_) => "Pick one of the models listed under [llm] in config.toml",

            // Model errors
            Self::LLMProvider(_) => "Model endpoint unavailable. Check your API key and network",
            Self::SchemaViolation(_) => "The model returned an invalid decision; it will be asked again",

            // Task API errors
            Self::TaskApi(_) => "Task API call failed",
            Self::Platform(_) => "Benchmark platform unavailable. Check the platform URL and key",

            // Secret errors
            Self::KeyringError(_) => "Could not read the OS keychain",
            Self::MissingSecret(_) => "Set the API key in the environment or a .env file",

            // Runner errors
            Self::WorkerPanicked(_) => "A task crashed; other tasks were not affected",

            // Trace output errors
            Self::Trace(_) => "Could not write trace files. Check trace_dir permissions",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::ModelNotAllowed(_)
            | Self::MissingSecret(_)
            | Self::WorkerPanicked(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
