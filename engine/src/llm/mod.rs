//! Language-model abstraction
//!
//! The decision loop talks to the model through [`DecisionModel`]: a list of
//! chat messages goes in, raw completion text comes out. Turning that text
//! into a [`StepDecision`] happens here, in [`parse_decision`], so every
//! backend (and the scripted test model) goes through the same validation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use sdk::{Action, StepDecision};

pub mod openrouter;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,

    /// Operation name for tool result messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Token accounting reported by the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Raw completion returned by a model backend
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub content: String,
    pub usage: TokenUsage,
}

/// A model that can be asked for the next step.
///
/// Implementations are blocking and shared between worker threads.
pub trait DecisionModel: Send + Sync {
    /// Model identifier reported in usage logs
    fn name(&self) -> &str;

    /// Send the conversation and return the raw completion text
    fn complete(&self, messages: &[Message]) -> Result<ModelOutput>;
}

/// Strip chat prefixes and markdown fences and cut out the first balanced
/// JSON object.
///
/// Falls back to the trimmed text when no object is found, which then fails
/// to parse with a useful error.
pub fn extract_json(raw: &str) -> &str {
    let mut text = raw.trim();
    for prefix in ["Assistant:", "```json", "```"] {
        if text.len() >= prefix.len()
            && text.is_char_boundary(prefix.len())
            && text[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            text = text[prefix.len()..].trim();
        }
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped.trim();
    }

    match text.find('{') {
        Some(start) => extract_balanced_json(&text[start..]).unwrap_or(&text[start..]),
        None => text,
    }
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse and validate a raw completion into a decision.
pub fn parse_decision(raw: &str) -> Result<StepDecision> {
    let payload = extract_json(raw);
    let decision: StepDecision =
        serde_json::from_str(payload).map_err(|e| LLMError::ParseError(e.to_string()))?;
    decision
        .validate()
        .map_err(|e| LLMError::InvalidDecision(e.to_string()))?;
    Ok(decision)
}

/// JSON schema declared to the endpoint for structured output
pub fn step_decision_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "think": { "type": "string", "description": "Brief reasoning (1-2 sentences)" },
            "scratch": { "type": "string", "description": "Working notes: entities, search variants tried" },
            "memory": { "type": "string", "description": "Confirmed facts separated by |" },
            "actions_done": { "type": "array", "items": { "type": "string" } },
            "plan": { "type": "array", "items": { "type": "string" } },
            "action": {
                "type": "object",
                "description": "Next task API call; omit when completing",
                "properties": {
                    "tool": { "type": "string", "enum": Action::NAMES }
                },
                "required": ["tool"],
                "additionalProperties": true
            },
            "completion": {
                "type": "object",
                "description": "Final answer; omit while work remains",
                "properties": {
                    "outcome": {
                        "type": "string",
                        "enum": [
                            "ok_answer",
                            "ok_not_found",
                            "denied_security",
                            "none_clarification_needed",
                            "none_unsupported",
                            "error_internal"
                        ]
                    },
                    "message": { "type": "string" },
                    "links": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "kind": { "type": "string", "enum": ["project", "employee", "customer"] },
                                "id": { "type": "string" }
                            },
                            "required": ["kind", "id"]
                        }
                    }
                },
                "required": ["outcome", "message"]
            }
        },
        "required": ["think"]
    })
}
