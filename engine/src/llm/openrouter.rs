use super::{
    step_decision_schema, DecisionModel, LLMError, Message, MessageRole, ModelOutput, TokenUsage,
};
use crate::config::{LLMConfig, ResolvedModel};
use crate::secrets::{scrub, SecretString};
use serde_json::{json, Value};
use std::time::Duration;

/// OpenAI-compatible chat completion client pointed at OpenRouter.
pub struct OpenRouterModel {
    base_url: String,
    model: ResolvedModel,
    api_key: SecretString,
    max_tokens: u32,
    client: reqwest::blocking::Client,
}

impl OpenRouterModel {
    pub fn new(
        config: &LLMConfig,
        model: ResolvedModel,
        api_key: SecretString,
        max_tokens: u32,
    ) -> super::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LLMError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            max_tokens,
            client,
        })
    }

    fn payload(&self, messages: &[Message]) -> Value {
        let api_messages: Vec<Value> = messages.iter().map(wire_message).collect();

        let mut payload = json!({
            "model": self.model.id,
            "messages": api_messages,
            "max_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "step_decision",
                    "strict": false,
                    "schema": step_decision_schema(),
                }
            }
        });

        if let Some(provider) = &self.model.provider {
            payload["provider"] = json!({
                "order": provider.order,
                "allow_fallbacks": provider.allow_fallbacks,
            });
        }
        payload
    }
}

/// The endpoint only accepts tool messages paired with tool calls, so tool
/// results travel as user messages tagged with the operation name.
fn wire_message(msg: &Message) -> Value {
    match msg.role {
        MessageRole::Tool => {
            let op = msg.tool_call_id.as_deref().unwrap_or("tool");
            json!({
                "role": "user",
                "content": format!("[{} result]\n{}", op, msg.content),
            })
        }
        role => json!({
            "role": role.to_string(),
            "content": msg.content,
        }),
    }
}

impl DecisionModel for OpenRouterModel {
    fn name(&self) -> &str {
        &self.model.id
    }

    fn complete(&self, messages: &[Message]) -> super::Result<ModelOutput> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.unsecure()))
            .header("Content-Type", "application/json")
            .json(&self.payload(messages))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(scrub(&e.to_string()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = scrub(&response.text().unwrap_or_default());
            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                _ => LLMError::InvalidRequest(format!("HTTP {}: {}", status.as_u16(), text)),
            });
        }

        let data: Value = response
            .json()
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))?;

        let usage = data
            .get("usage")
            .map(|u| TokenUsage {
                prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                completion_tokens: u
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(ModelOutput {
            content: content.to_string(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderPreference;

    fn model(provider: Option<ProviderPreference>) -> OpenRouterModel {
        let config = LLMConfig {
            base_url: "http://localhost:9/api/v1/".to_string(),
            ..LLMConfig::default()
        };
        OpenRouterModel::new(
            &config,
            ResolvedModel {
                id: "qwen/qwen3-235b-a22b-2507".to_string(),
                provider,
            },
            SecretString::new("sk-or-test"),
            512,
        )
        .unwrap()
    }

    #[test]
    fn test_payload_shape() {
        let payload = model(None).payload(&[Message::system("rules"), Message::user("task")]);
        assert_eq!(payload["model"], "qwen/qwen3-235b-a22b-2507");
        assert_eq!(payload["max_tokens"], 512);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["response_format"]["type"], "json_schema");
        assert!(payload.get("provider").is_none());
    }

    #[test]
    fn test_payload_provider_preference() {
        let payload = model(Some(ProviderPreference {
            order: vec!["Cerebras".to_string()],
            allow_fallbacks: false,
        }))
        .payload(&[]);
        assert_eq!(payload["provider"]["order"][0], "Cerebras");
        assert_eq!(payload["provider"]["allow_fallbacks"], false);
    }

    #[test]
    fn test_tool_messages_become_user_messages() {
        let wire = wire_message(&Message::tool_result("{\"id\":1}", "get_project"));
        assert_eq!(wire["role"], "user");
        assert!(wire["content"]
            .as_str()
            .unwrap()
            .starts_with("[get_project result]"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(model(None).base_url, "http://localhost:9/api/v1");
    }
}
