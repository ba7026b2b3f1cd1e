use std::sync::Arc;

use tracing::debug;

use crewforge_core::config::{AppConfig, BedrockConfig, ModelConfig};
use crewforge_core::error::BuildError;
use crewforge_core::traits::LlmClient;

use crate::create_client;
use crate::providers::{BedrockClient, ChatCompletionsClient};

/// Vendor prefixes of Bedrock model ids (`anthropic.claude-3-...`) and of
/// cross-region inference profiles (`us.anthropic...`).
const BEDROCK_VENDOR_PREFIXES: &[&str] = &[
    "anthropic.", "amazon.", "meta.", "mistral.", "cohere.", "ai21.", "us.", "eu.", "apac.",
];

/// Which backend a model binding talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Default,
    ChatCompletions,
    Bedrock,
}

/// Client plus the model settings an agent sends with every request.
#[derive(Clone)]
pub struct ModelBinding {
    pub client: Arc<dyn LlmClient>,
    pub config: ModelConfig,
    pub backend: Backend,
}

impl std::fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBinding")
            .field("model", &self.config.model_id)
            .field("backend", &self.backend)
            .finish()
    }
}

/// Whether a model name should be served by Bedrock.
pub fn is_bedrock_model(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("bedrock/") || BEDROCK_VENDOR_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Picks an LLM client per agent from its optional model override.
///
/// Agents without an override share the default client built from `[model]`.
pub struct ModelRouter {
    default_client: Arc<dyn LlmClient>,
    default_config: ModelConfig,
    chat_client: Arc<dyn LlmClient>,
    bedrock_client: Arc<dyn LlmClient>,
    bedrock: BedrockConfig,
}

impl ModelRouter {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut default_config = config.model.clone();
        if default_config.api_key.is_none() && default_config.provider != "bedrock" {
            default_config.api_key = config.model_api_key();
        }
        Self {
            default_client: create_client(&default_config),
            default_config,
            chat_client: Arc::new(ChatCompletionsClient::new()),
            bedrock_client: Arc::new(BedrockClient::new()),
            bedrock: config.bedrock.clone(),
        }
    }

    /// Route every backend to caller-supplied clients.
    pub fn with_clients(
        default_config: ModelConfig,
        default_client: Arc<dyn LlmClient>,
        chat_client: Arc<dyn LlmClient>,
        bedrock_client: Arc<dyn LlmClient>,
        bedrock: BedrockConfig,
    ) -> Self {
        Self {
            default_client,
            default_config,
            chat_client,
            bedrock_client,
            bedrock,
        }
    }

    /// A router that sends every agent to the same client.
    pub fn single(config: ModelConfig, client: Arc<dyn LlmClient>) -> Self {
        Self::with_clients(
            config,
            client.clone(),
            client.clone(),
            client,
            BedrockConfig {
                api_key: Some("unused".into()),
                ..Default::default()
            },
        )
    }

    pub fn default_config(&self) -> &ModelConfig {
        &self.default_config
    }

    /// Resolve the binding for an agent.
    pub fn route(
        &self,
        model_override: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<ModelBinding, BuildError> {
        let mut binding = match model_override.map(str::trim).filter(|m| !m.is_empty()) {
            None => {
                require_chat_key(&self.default_config)?;
                ModelBinding {
                    client: self.default_client.clone(),
                    config: self.default_config.clone(),
                    backend: Backend::Default,
                }
            }
            Some(model) if is_bedrock_model(model) => {
                let api_key = self.bedrock.api_key().ok_or_else(|| BuildError::MissingCredential {
                    name: "AWS_BEARER_TOKEN_BEDROCK".to_string(),
                    hint: format!("model '{}' routes to Bedrock; set bedrock.api_key", model),
                })?;
                let model_id = model.strip_prefix("bedrock/").unwrap_or(model);
                ModelBinding {
                    client: self.bedrock_client.clone(),
                    config: ModelConfig {
                        provider: "bedrock".to_string(),
                        model_id: model_id.to_string(),
                        api_key: Some(api_key),
                        base_url: self.bedrock.base_url.clone(),
                        aws_region: Some(self.bedrock.region.clone()),
                        ..self.default_config.clone()
                    },
                    backend: Backend::Bedrock,
                }
            }
            Some(model) => {
                let config = if self.default_config.provider == "bedrock" {
                    ModelConfig {
                        model_id: model.to_string(),
                        ..ModelConfig::default()
                    }
                } else {
                    ModelConfig {
                        model_id: model.to_string(),
                        ..self.default_config.clone()
                    }
                };
                require_chat_key(&config)?;
                ModelBinding {
                    client: self.chat_client.clone(),
                    config,
                    backend: Backend::ChatCompletions,
                }
            }
        };

        if let Some(t) = temperature {
            binding.config.temperature = t;
        }
        debug!(model = %binding.config.model_id, backend = ?binding.backend, "Routed agent model");
        Ok(binding)
    }
}

/// Hosted endpoints need a key; custom `base_url` servers may not.
fn require_chat_key(config: &ModelConfig) -> Result<(), BuildError> {
    if config.provider == "bedrock" || config.base_url.is_some() || config.api_key.is_some() {
        return Ok(());
    }
    Err(BuildError::MissingCredential {
        name: "OPENAI_API_KEY".to_string(),
        hint: format!(
            "model '{}' needs model.api_key or the OPENAI_API_KEY environment variable",
            config.model_id
        ),
    })
}
