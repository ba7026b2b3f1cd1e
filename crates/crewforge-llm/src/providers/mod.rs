pub mod bedrock;
pub mod chat_completions;

pub use bedrock::BedrockClient;
pub use chat_completions::ChatCompletionsClient;
