use std::sync::Arc;

use futures::StreamExt;

use crewforge_core::config::{AppConfig, CredentialsConfig, EmailConfig, ModelConfig};
use crewforge_core::error::Result;
use crewforge_core::traits::LlmClient;
use crewforge_core::types::{ChatMessage, StreamDelta};

/// Shared resources handed to tool constructors.
#[derive(Clone)]
pub struct ToolEnv {
    pub http: reqwest::Client,
    pub credentials: CredentialsConfig,
    pub email: Option<EmailConfig>,
    /// Model used by tools that summarize or answer over data.
    pub llm: Option<LlmHandle>,
}

#[derive(Clone)]
pub struct LlmHandle {
    pub client: Arc<dyn LlmClient>,
    pub config: ModelConfig,
}

impl LlmHandle {
    /// One tool-less exchange, returning the concatenated reply text.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];
        let mut stream = self.client.chat_stream(&self.config, messages, &[]).await?;
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            if let StreamDelta::TextDelta(t) = delta? {
                text.push_str(&t);
            }
        }
        Ok(text)
    }
}

impl ToolEnv {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: config.credentials.clone(),
            email: config.email.clone(),
            llm: None,
        }
    }

    pub fn with_llm(mut self, client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        self.llm = Some(LlmHandle { client, config });
        self
    }
}

impl Default for ToolEnv {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: CredentialsConfig::default(),
            email: None,
            llm: None,
        }
    }
}

impl std::fmt::Debug for ToolEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEnv")
            .field("email", &self.email.is_some())
            .field("llm", &self.llm.as_ref().map(|l| l.config.model_id.as_str()))
            .finish()
    }
}

/// Why a tool constructor refused to build.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructError {
    MissingCredential { name: String, hint: String },
    Invalid(String),
}

impl ConstructError {
    pub fn missing(name: &str, hint: &str) -> Self {
        Self::MissingCredential {
            name: name.to_string(),
            hint: hint.to_string(),
        }
    }
}
