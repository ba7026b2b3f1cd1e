use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{CrewForgeError, Result};

/// Top-level CrewForge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default shared model used by agents without an override.
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub bedrock: BedrockConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub email: Option<EmailConfig>,
    /// Extra request-time injection rules keyed by tool display name.
    #[serde(default)]
    pub injection: BTreeMap<String, Vec<InjectionRuleConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Only used by the Bedrock provider.
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            aws_region: None,
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Settings for agents whose model override routes to Bedrock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockConfig {
    #[serde(default = "default_bedrock_region")]
    pub region: String,
    /// Bedrock API key (bearer token). Falls back to `AWS_BEARER_TOKEN_BEDROCK`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            region: default_bedrock_region(),
            api_key: None,
            base_url: None,
        }
    }
}

impl BedrockConfig {
    pub fn api_key(&self) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| env_var("AWS_BEARER_TOKEN_BEDROCK"))
    }
}

fn default_bedrock_region() -> String { "us-east-1".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Database path with a leading `~/` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

fn default_db_path() -> String { "~/.crewforge/crewforge.db".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Iteration budget for agents that do not set a valid one.
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: usize,
    /// Per-task deadline. Unset means tasks may run indefinitely.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Tool output is truncated to this many characters before reaching the model.
    #[serde(default = "default_max_tool_output_chars")]
    pub max_tool_output_chars: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: default_max_iterations(),
            task_timeout_secs: None,
            tool_timeout_secs: default_tool_timeout(),
            max_tool_output_chars: default_max_tool_output_chars(),
        }
    }
}

pub const DEFAULT_MAX_ITERATIONS: usize = 25;

fn default_max_iterations() -> usize { DEFAULT_MAX_ITERATIONS }
fn default_tool_timeout() -> u64 { 60 }
fn default_max_tool_output_chars() -> usize { 8_000 }

/// API keys for external tool services. Each falls back to its
/// conventional environment variable when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub serper_api_key: Option<String>,
    #[serde(default)]
    pub tavily_api_key: Option<String>,
    #[serde(default)]
    pub github_token: Option<String>,
}

impl CredentialsConfig {
    pub fn serper(&self) -> Option<String> {
        non_empty(self.serper_api_key.clone()).or_else(|| env_var("SERPER_API_KEY"))
    }

    pub fn tavily(&self) -> Option<String> {
        non_empty(self.tavily_api_key.clone()).or_else(|| env_var("TAVILY_API_KEY"))
    }

    pub fn github(&self) -> Option<String> {
        non_empty(self.github_token.clone()).or_else(|| env_var("GITHUB_TOKEN"))
    }
}

/// Outbound mail goes through an HTTP mail API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub from_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InjectionRuleConfig {
    /// Payload field: `prompt`, `file_path`, `file_name`, or `vector_search_engine`.
    pub field: String,
    /// Key written into the tool node's `tool_inputs`.
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
            api_keys: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub role: ApiKeyRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyRole {
    /// List and inspect workflows and tools
    Viewer,
    /// Create, update, delete, and run workflows
    #[default]
    Operator,
    /// Full access
    Admin,
}

fn default_bind() -> String { "127.0.0.1:8000".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CrewForgeError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| CrewForgeError::Config(e.to_string()))
    }

    /// API key for the default model, falling back to `OPENAI_API_KEY`.
    pub fn model_api_key(&self) -> Option<String> {
        non_empty(self.model.api_key.clone()).or_else(|| env_var("OPENAI_API_KEY"))
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("valid env var pattern"))
}

/// Expand `${ENV_VAR}` references; unset variables are kept verbatim.
fn expand_env_vars(input: &str) -> String {
    env_var_pattern()
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && !v.starts_with("${"))
}

fn env_var(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CREWFORGE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CREWFORGE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CREWFORGE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CREWFORGE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CREWFORGE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.model.model_id, "gpt-4o-mini");
        assert_eq!(config.runner.default_max_iterations, 25);
        assert!(config.runner.task_timeout_secs.is_none());
        assert_eq!(config.gateway.bind, "127.0.0.1:8000");
        assert_eq!(config.bedrock.region, "us-east-1");
        assert!(config.injection.is_empty());
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[model]
provider = "openai"
model_id = "gpt-4o"
api_key = "sk-test"

[runner]
task_timeout_secs = 120
default_max_iterations = 10

[gateway]
bind = "0.0.0.0:8000"
token = "my-token"

[[gateway.api_keys]]
name = "web-ui"
key = "ck_abc123"
role = "viewer"

[credentials]
serper_api_key = "serper-key"

[email]
api_url = "https://mail.example.com/send"
from_address = "bot@example.com"

[[injection."Custom Search"]]
field = "prompt"
input = "q"
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.model.model_id, "gpt-4o");
        assert_eq!(config.runner.task_timeout_secs, Some(120));
        assert_eq!(config.runner.default_max_iterations, 10);
        assert_eq!(config.gateway.api_keys[0].role, ApiKeyRole::Viewer);
        assert_eq!(config.credentials.serper().as_deref(), Some("serper-key"));
        assert_eq!(config.email.unwrap().from_address, "bot@example.com");
        assert_eq!(
            config.injection["Custom Search"],
            vec![InjectionRuleConfig {
                field: "prompt".into(),
                input: "q".into()
            }]
        );
    }

    #[test]
    fn test_unexpanded_placeholder_counts_as_unset() {
        assert_eq!(non_empty(Some("${MISSING}".into())), None);
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("k".into())).as_deref(), Some("k"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::from_toml("[runner\n").unwrap_err();
        assert!(matches!(err, CrewForgeError::Config(_)));
    }
}
