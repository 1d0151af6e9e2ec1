//! Blocking HTTP clients for the benchmark platform and the per-task API.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    action_body, ApiError, LlmUsage, TaskApi, TaskEnvironment, TaskEvaluation, TaskInfo, WhoAmI,
};
use crate::config::PlatformConfig;
use crate::secrets::{scrub, SecretString};
use sdk::{Action, AgentResponse};

/// JSON-over-POST transport shared by both clients
#[derive(Clone)]
struct JsonClient {
    base_url: String,
    api_key: SecretString,
    client: reqwest::blocking::Client,
}

impl JsonClient {
    fn new(base_url: &str, api_key: SecretString, timeout_secs: u64) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.unsecure()))
            .json(body)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().map_err(transport_error)?;

        if !status.is_success() {
            return Err(ApiError::rejected(status.as_u16(), error_text(&text)));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn post_as<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let value = self.post(path, body)?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    let text = scrub(&e.to_string());
    if e.is_timeout() {
        ApiError::Timeout(text)
    } else {
        ApiError::Transport(text)
    }
}

/// Pull the human-readable message out of an error body.
fn error_text(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["error", "message", "detail"]
            .iter()
            .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
    });
    scrub(message.as_deref().unwrap_or(body).trim())
}

/// Business API for a single task: `POST {base}/tasks/{task_id}{path}`
pub struct HttpTaskApi {
    task_id: String,
    http: JsonClient,
}

impl HttpTaskApi {
    fn task_path(&self, path: &str) -> String {
        format!("/tasks/{}{}", self.task_id, path)
    }
}

impl TaskApi for HttpTaskApi {
    fn who_am_i(&self) -> Result<WhoAmI, ApiError> {
        self.http.post_as(&self.task_path("/whoami"), &json!({}))
    }

    fn dispatch(&self, action: &Action) -> Result<Value, ApiError> {
        let body = action_body(action)?;
        self.http.post(&self.task_path(action.path()), &body)
    }

    fn respond(&self, response: &AgentResponse) -> Result<(), ApiError> {
        let body = serde_json::to_value(response).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.http.post(&self.task_path("/respond"), &body).map(|_| ())
    }

    fn record_llm_usage(&self, usage: &LlmUsage) -> Result<(), ApiError> {
        let body = serde_json::to_value(usage).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.http.post(&self.task_path("/llm_usage"), &body).map(|_| ())
    }
}

/// An open benchmark session and its tasks
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(default)]
    pub tasks: Vec<TaskInfo>,
}

#[derive(Deserialize)]
struct CompleteResponse {
    #[serde(default)]
    eval: Option<TaskEvaluation>,
}

/// Benchmark platform client
pub struct HttpPlatform {
    workspace: String,
    http: JsonClient,
}

impl HttpPlatform {
    pub fn new(config: &PlatformConfig, api_key: SecretString) -> Result<Self, ApiError> {
        Ok(Self {
            workspace: config.workspace.clone(),
            http: JsonClient::new(&config.base_url, api_key, config.timeout_secs)?,
        })
    }

    pub fn start_session(
        &self,
        benchmark: &str,
        name: &str,
        architecture: &str,
    ) -> Result<SessionInfo, ApiError> {
        let body = json!({
            "benchmark": benchmark,
            "workspace": self.workspace,
            "name": name,
            "architecture": architecture,
            "flags": ["compete_local"],
        });
        self.http.post_as("/sessions/start", &body)
    }

    /// Session status including the task list
    pub fn session_status(&self, session_id: &str) -> Result<SessionInfo, ApiError> {
        self.http
            .post_as("/sessions/status", &json!({ "session_id": session_id }))
    }

    pub fn submit_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.http
            .post("/sessions/submit", &json!({ "session_id": session_id }))
            .map(|_| ())
    }
}

impl TaskEnvironment for HttpPlatform {
    fn start_task(&self, task: &TaskInfo) -> Result<Box<dyn TaskApi>, ApiError> {
        self.http
            .post("/tasks/start", &json!({ "task_id": task.task_id }))?;
        Ok(Box::new(HttpTaskApi {
            task_id: task.task_id.clone(),
            http: self.http.clone(),
        }))
    }

    fn complete_task(&self, task: &TaskInfo) -> Result<Option<TaskEvaluation>, ApiError> {
        let response: CompleteResponse = self
            .http
            .post_as("/tasks/complete", &json!({ "task_id": task.task_id }))?;
        Ok(response.eval)
    }
}
