//! Task API boundary
//!
//! Two seams: [`TaskEnvironment`] hands out tasks and scores them, and
//! [`TaskApi`] is the per-task business API the agent acts on. The HTTP
//! implementations live in [`http`]; tests use the in-memory ones from
//! `crate::fakes`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sdk::{Action, AgentResponse};

pub mod http;

pub use http::{HttpPlatform, HttpTaskApi, SessionInfo};

/// One benchmark task as handed out by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub spec_id: String,
    pub task_text: String,
}

impl TaskInfo {
    pub fn new(
        task_id: impl Into<String>,
        spec_id: impl Into<String>,
        task_text: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            spec_id: spec_id.into(),
            task_text: task_text.into(),
        }
    }
}

/// Identity of the user the task runs on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoAmI {
    /// Employee id; absent for guests
    #[serde(default)]
    pub current_user: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    /// Platform date, `YYYY-MM-DD`
    #[serde(default)]
    pub today: String,
}

impl WhoAmI {
    pub fn user(id: impl Into<String>, today: impl Into<String>) -> Self {
        Self {
            current_user: Some(id.into()),
            is_public: false,
            today: today.into(),
        }
    }

    pub fn guest(today: impl Into<String>) -> Self {
        Self {
            current_user: None,
            is_public: true,
            today: today.into(),
        }
    }
}

/// Token usage reported back to the platform after each model call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Platform verdict for a completed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvaluation {
    pub score: f64,
    #[serde(default)]
    pub logs: String,
}

impl TaskEvaluation {
    pub fn passed(&self) -> bool {
        self.score >= 1.0
    }
}

/// Failure reported by the task API or the platform
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The server answered with an error status
    #[error("{message} (HTTP {status}{})", status_hint(.status))]
    Rejected { status: u16, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Status class appended to rejections, so bare error bodies still classify
fn status_hint(status: &u16) -> &'static str {
    match status {
        401 | 403 => " unauthorized",
        404 => " not found",
        408 | 504 => " timeout",
        500..=599 => " service unavailable",
        _ => "",
    }
}

impl ApiError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

/// Business API scoped to one running task.
pub trait TaskApi: Send {
    fn who_am_i(&self) -> Result<WhoAmI, ApiError>;

    /// Execute one operation and return its JSON result
    fn dispatch(&self, action: &Action) -> Result<Value, ApiError>;

    /// Report the final answer; called exactly once per task
    fn respond(&self, response: &AgentResponse) -> Result<(), ApiError>;

    fn record_llm_usage(&self, _usage: &LlmUsage) -> Result<(), ApiError> {
        Ok(())
    }
}

impl<T: TaskApi + Sync + ?Sized> TaskApi for std::sync::Arc<T> {
    fn who_am_i(&self) -> Result<WhoAmI, ApiError> {
        (**self).who_am_i()
    }

    fn dispatch(&self, action: &Action) -> Result<Value, ApiError> {
        (**self).dispatch(action)
    }

    fn respond(&self, response: &AgentResponse) -> Result<(), ApiError> {
        (**self).respond(response)
    }

    fn record_llm_usage(&self, usage: &LlmUsage) -> Result<(), ApiError> {
        (**self).record_llm_usage(usage)
    }
}

/// Source of tasks: opens a task API per task and scores it afterwards.
pub trait TaskEnvironment: Send + Sync {
    fn start_task(&self, task: &TaskInfo) -> Result<Box<dyn TaskApi>, ApiError>;

    fn complete_task(&self, task: &TaskInfo) -> Result<Option<TaskEvaluation>, ApiError>;
}

/// Request body for an action: its parameters without the `tool` tag.
pub fn action_body(action: &Action) -> Result<Value, ApiError> {
    let mut body = serde_json::to_value(action).map_err(|e| ApiError::Decode(e.to_string()))?;
    if let Value::Object(map) = &mut body {
        map.remove("tool");
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::GetById;

    #[test]
    fn test_action_body_drops_tag() {
        let action = Action::GetProject(GetById {
            id: "proj_acme_line3".to_string(),
        });
        let body = action_body(&action).unwrap();
        assert_eq!(body, serde_json::json!({"id": "proj_acme_line3"}));
    }

    #[test]
    fn test_rejected_display_keeps_server_text() {
        let err = ApiError::rejected(403, "Only lead can change status");
        assert_eq!(
            err.to_string(),
            "Only lead can change status (HTTP 403 unauthorized)"
        );

        let err = ApiError::rejected(400, "hours must be positive");
        assert_eq!(err.to_string(), "hours must be positive (HTTP 400)");
    }

    #[test]
    fn test_bare_status_classifies() {
        use crate::error_classifier::{classify, ErrorCategory};

        let category = |status| classify(&ApiError::rejected(status, "").to_string());
        assert_eq!(category(401), ErrorCategory::Permission);
        assert_eq!(category(403), ErrorCategory::Permission);
        assert_eq!(category(404), ErrorCategory::NotFound);
        assert_eq!(category(504), ErrorCategory::System);
        assert_eq!(category(502), ErrorCategory::System);
        assert_eq!(category(422), ErrorCategory::Other);
        assert_eq!(
            classify(&ApiError::Timeout("operation timed out".into()).to_string()),
            ErrorCategory::System
        );
    }

    #[test]
    fn test_whoami_guest_shape() {
        let who: WhoAmI =
            serde_json::from_str(r#"{"is_public":true,"today":"2025-04-01"}"#).unwrap();
        assert_eq!(who, WhoAmI::guest("2025-04-01"));
    }

    #[test]
    fn test_evaluation_passed() {
        assert!(TaskEvaluation { score: 1.0, logs: String::new() }.passed());
        assert!(!TaskEvaluation { score: 0.5, logs: String::new() }.passed());
    }
}
