//! Configuration management
//!
//! This module handles loading, validation, and management of the agent
//! configuration. Configuration is stored in TOML format at ~/.ooda/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level, trace output directory
//! - **agent**: step ceiling, guardrail thresholds, memory sizing
//! - **runner**: worker count and request rate
//! - **llm**: inference endpoint and the allow-list of models
//! - **platform**: benchmark platform endpoint and session labels
//!
//! # Environment Overrides
//!
//! A handful of numeric knobs can be overridden without touching the file:
//! `OODA_MAX_STEPS`, `OODA_MAX_WORKERS`, `OODA_RATE_LIMIT_RPS` and
//! `OODA_MAX_COMPLETION_TOKENS`.
//!
//! # Examples
//!
//! ```no_run
//! use ooda_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! let model = config.resolve_model(Some("grok-fast"))?;
//! println!("Model: {} | Workers: {}", model.id, config.runner.workers);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Decision loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Task runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Inference endpoint configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Benchmark platform configuration
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for per-task JSONL traces and session reports (supports ~ expansion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<PathBuf>,
}

/// Decision loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Step ceiling per task
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Completion token budget per model call
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,

    /// Page size ceiling for list/search operations
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Consecutive `system` failures before the task is aborted
    #[serde(default = "default_threshold")]
    pub system_failure_threshold: u32,

    /// Consecutive model failures before the task is aborted
    #[serde(default = "default_threshold")]
    pub model_failure_threshold: u32,

    /// Refused completions before the corrective message escalates
    #[serde(default = "default_threshold")]
    pub block_escalation_threshold: u32,

    /// Identical consecutive proposals dispatched before the loop guard steps in
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,

    /// Most recent memory entries scanned on compression
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,

    /// Important memory entries retained on compression
    #[serde(default = "default_memory_retain")]
    pub memory_retain: usize,

    /// Scratch buffer cap in characters
    #[serde(default = "default_scratch_cap")]
    pub scratch_cap: usize,
}

/// Task runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker threads in concurrent mode
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Requests per second granted to each worker (0 disables throttling)
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
}

/// Routing preference forwarded verbatim to the inference endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPreference {
    pub order: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_fallbacks: bool,
}

/// One entry of the model allow-list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOption {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderPreference>,
}

/// Inference endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Environment variable (or keychain entry) holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Allowed models; the first one is the default
    #[serde(default = "default_models")]
    pub models: Vec<ModelOption>,

    /// Short names mapped to model ids
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
}

/// Benchmark platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform base URL
    #[serde(default = "default_platform_base_url")]
    pub base_url: String,

    /// Environment variable (or keychain entry) holding the platform key
    #[serde(default = "default_platform_api_key_env")]
    pub api_key_env: String,

    /// Workspace the session is registered under
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Architecture label reported with every session
    #[serde(default = "default_architecture")]
    pub architecture: String,

    /// Request timeout in seconds
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
}

/// A model picked from the allow-list
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub id: String,
    pub provider: Option<ProviderPreference>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_steps() -> usize {
    30
}

fn default_max_completion_tokens() -> u32 {
    4096
}

fn default_page_limit() -> u32 {
    sdk::PAGE_LIMIT
}

fn default_threshold() -> u32 {
    3
}

fn default_loop_threshold() -> usize {
    2
}

fn default_memory_window() -> usize {
    20
}

fn default_memory_retain() -> usize {
    12
}

fn default_scratch_cap() -> usize {
    500
}

fn default_workers() -> usize {
    5
}

fn default_rate_limit_rps() -> f64 {
    3.0
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_models() -> Vec<ModelOption> {
    vec![
        ModelOption {
            id: "qwen/qwen3-235b-a22b-2507".to_string(),
            provider: Some(ProviderPreference {
                order: vec!["Cerebras".to_string()],
                allow_fallbacks: false,
            }),
        },
        ModelOption {
            id: "x-ai/grok-4.1-fast".to_string(),
            provider: None,
        },
        ModelOption {
            id: "x-ai/grok-4.1".to_string(),
            provider: None,
        },
        ModelOption {
            id: "openai/gpt-4.1".to_string(),
            provider: None,
        },
    ]
}

fn default_aliases() -> BTreeMap<String, String> {
    [
        ("qwen", "qwen/qwen3-235b-a22b-2507"),
        ("grok-fast", "x-ai/grok-4.1-fast"),
        ("grok-4.1-fast", "x-ai/grok-4.1-fast"),
        ("grok", "x-ai/grok-4.1"),
        ("grok-4.1", "x-ai/grok-4.1"),
        ("gpt", "openai/gpt-4.1"),
        ("gpt-4.1", "openai/gpt-4.1"),
    ]
    .into_iter()
    .map(|(alias, id)| (alias.to_string(), id.to_string()))
    .collect()
}

fn default_platform_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_platform_api_key_env() -> String {
    "ERC3_API_KEY".to_string()
}

fn default_workspace() -> String {
    "my".to_string()
}

fn default_architecture() -> String {
    "OODA Loop Agent (direct)".to_string()
}

fn default_platform_timeout() -> u64 {
    60
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            trace_dir: Some(PathBuf::from("~/.ooda/traces")),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_completion_tokens: default_max_completion_tokens(),
            page_limit: default_page_limit(),
            system_failure_threshold: default_threshold(),
            model_failure_threshold: default_threshold(),
            block_escalation_threshold: default_threshold(),
            loop_threshold: default_loop_threshold(),
            memory_window: default_memory_window(),
            memory_retain: default_memory_retain(),
            scratch_cap: default_scratch_cap(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            rate_limit_rps: default_rate_limit_rps(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
            timeout_secs: default_llm_timeout(),
            models: default_models(),
            aliases: default_aliases(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_base_url(),
            api_key_env: default_platform_api_key_env(),
            workspace: default_workspace(),
            architecture: default_architecture(),
            timeout_secs: default_platform_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    /// Load configuration from the default location (~/.ooda/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Environment overrides are applied before validation.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // The file keeps the pristine defaults; overrides only affect this process
        let toml_string = toml::to_string_pretty(&Self::default_config())
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = Self::default_config();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.ooda/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".ooda").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            agent: AgentConfig::default(),
            runner: RunnerConfig::default(),
            llm: LLMConfig::default(),
            platform: PlatformConfig::default(),
        }
    }

    /// Apply `OODA_*` overrides supplied by `lookup`.
    ///
    /// Unset variables leave the value untouched; unparseable values are errors.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, "OODA_MAX_STEPS")? {
            self.agent.max_steps = v;
        }
        if let Some(v) = parse_override(&lookup, "OODA_MAX_WORKERS")? {
            self.runner.workers = v;
        }
        if let Some(v) = parse_override(&lookup, "OODA_RATE_LIMIT_RPS")? {
            self.runner.rate_limit_rps = v;
        }
        if let Some(v) = parse_override(&lookup, "OODA_MAX_COMPLETION_TOKENS")? {
            self.agent.max_completion_tokens = v;
        }
        Ok(())
    }

    /// Map a model alias or id onto the allow-list.
    ///
    /// `None` selects the first allowed model.
    pub fn resolve_model(&self, choice: Option<&str>) -> Result<ResolvedModel, EngineError> {
        let wanted = match choice.map(str::trim).filter(|c| !c.is_empty()) {
            None => {
                let first = self.llm.models.first().ok_or_else(|| {
                    EngineError::Config("No models configured under [llm]".to_string())
                })?;
                return Ok(ResolvedModel {
                    id: first.id.clone(),
                    provider: first.provider.clone(),
                });
            }
            Some(c) => c,
        };

        let id = self
            .llm
            .aliases
            .get(&wanted.to_lowercase())
            .map(String::as_str)
            .unwrap_or(wanted);

        self.llm
            .models
            .iter()
            .find(|m| m.id == id)
            .map(|m| ResolvedModel {
                id: m.id.clone(),
                provider: m.provider.clone(),
            })
            .ok_or_else(|| {
                let allowed: Vec<&str> = self.llm.models.iter().map(|m| m.id.as_str()).collect();
                EngineError::ModelNotAllowed(format!(
                    "'{}' is not one of: {}",
                    wanted,
                    allowed.join(", ")
                ))
            })
    }

    /// Validate and process configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log level is unknown
    /// - Memory retention is not smaller than the scan window
    /// - Step ceiling, worker count or page limit is zero
    /// - The request rate is negative
    /// - The model allow-list is empty or an alias points outside it
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.agent.max_steps == 0 {
            return Err(EngineError::Config("max_steps must be at least 1".to_string()));
        }
        if self.agent.page_limit == 0 {
            return Err(EngineError::Config("page_limit must be at least 1".to_string()));
        }
        if self.agent.memory_retain == 0 || self.agent.memory_retain >= self.agent.memory_window {
            return Err(EngineError::Config(format!(
                "memory_retain ({}) must be between 1 and memory_window ({}) exclusive",
                self.agent.memory_retain, self.agent.memory_window
            )));
        }

        if self.runner.workers == 0 {
            return Err(EngineError::Config("workers must be at least 1".to_string()));
        }
        if !self.runner.rate_limit_rps.is_finite() || self.runner.rate_limit_rps < 0.0 {
            return Err(EngineError::Config(
                "rate_limit_rps must be a non-negative number".to_string(),
            ));
        }

        if self.llm.models.is_empty() {
            return Err(EngineError::Config(
                "At least one model must be listed under [llm]".to_string(),
            ));
        }
        for (alias, id) in &self.llm.aliases {
            if !self.llm.models.iter().any(|m| &m.id == id) {
                return Err(EngineError::Config(format!(
                    "Alias '{}' points to '{}', which is not an allowed model",
                    alias, id
                )));
            }
        }

        if let Some(dir) = self.core.trace_dir.take() {
            self.core.trace_dir = Some(expand_path(&dir)?);
        }

        Ok(())
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>, EngineError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("Invalid value for {}: '{}'", key, raw))),
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.agent.max_steps, 30);
        assert_eq!(config.agent.page_limit, 5);
        assert_eq!(config.agent.memory_window, 20);
        assert_eq!(config.agent.memory_retain, 12);
        assert_eq!(config.runner.workers, 5);
        assert_eq!(config.runner.rate_limit_rps, 3.0);
        assert_eq!(config.platform.architecture, "OODA Loop Agent (direct)");
    }

    #[test]
    fn test_resolve_model_default_is_first() {
        let config = Config::default_config();
        let model = config.resolve_model(None).unwrap();
        assert_eq!(model.id, "qwen/qwen3-235b-a22b-2507");
        let provider = model.provider.unwrap();
        assert_eq!(provider.order, vec!["Cerebras".to_string()]);
        assert!(!provider.allow_fallbacks);
    }

    #[test]
    fn test_resolve_model_alias_and_id() {
        let config = Config::default_config();
        assert_eq!(
            config.resolve_model(Some("grok-fast")).unwrap().id,
            "x-ai/grok-4.1-fast"
        );
        assert_eq!(
            config.resolve_model(Some("GPT")).unwrap().id,
            "openai/gpt-4.1"
        );
        assert_eq!(
            config.resolve_model(Some("x-ai/grok-4.1")).unwrap().id,
            "x-ai/grok-4.1"
        );
        assert!(config.resolve_model(Some("grok")).unwrap().provider.is_none());
    }

    #[test]
    fn test_resolve_model_rejects_unknown() {
        let config = Config::default_config();
        let err = config.resolve_model(Some("meta/llama-2")).unwrap_err();
        assert!(matches!(err, EngineError::ModelNotAllowed(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("OODA_MAX_STEPS", "12"), ("OODA_RATE_LIMIT_RPS", "0.5")]
            .into_iter()
            .collect();
        let mut config = Config::default_config();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.agent.max_steps, 12);
        assert_eq!(config.runner.rate_limit_rps, 0.5);
        assert_eq!(config.runner.workers, 5);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default_config();
        let result = config.apply_overrides(|key| {
            (key == "OODA_MAX_WORKERS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_retain_not_below_window() {
        let mut config = Config::default_config();
        config.agent.memory_retain = 20;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_validation_rejects_dangling_alias() {
        let mut config = Config::default_config();
        config
            .llm
            .aliases
            .insert("claude".to_string(), "anthropic/claude".to_string());
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.llm.models, deserialized.llm.models);
        assert_eq!(config.llm.aliases, deserialized.llm.aliases);
    }
}
