pub mod providers;
pub mod retry;
pub mod router;
pub mod streaming;

use std::sync::Arc;

use crewforge_core::config::ModelConfig;
use crewforge_core::traits::LlmClient;

pub use providers::{BedrockClient, ChatCompletionsClient};
pub use retry::RetryingClient;
pub use router::{is_bedrock_model, Backend, ModelBinding, ModelRouter};

/// Create an LLM client for the configured provider, wrapped in a
/// retrying client when `[model.retry]` is set.
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    let client: Arc<dyn LlmClient> = match config.provider.as_str() {
        "bedrock" => Arc::new(BedrockClient::new()),
        // Everything else speaks the chat-completions protocol
        _ => Arc::new(ChatCompletionsClient::new()),
    };
    match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(client, retry.clone())),
        None => client,
    }
}
