use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;
use crate::workflow::{ListQuery, NewWorkflow, Workflow, WorkflowPatch};

/// LLM client: streaming chat completion with tool calling.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolSpec],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Tool: an external capability an agent can invoke.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Workflow store: persistence backend for workflow definitions.
///
/// Soft-deleted workflows are invisible to every read and write.
pub trait WorkflowStore: Send + Sync + 'static {
    fn create(&self, workflow: NewWorkflow) -> BoxFuture<'_, Result<Workflow>>;

    fn get(&self, id: &str) -> BoxFuture<'_, Result<Option<Workflow>>>;

    /// Non-deleted workflows, newest first.
    fn list(&self, query: ListQuery) -> BoxFuture<'_, Result<Vec<Workflow>>>;

    /// Apply a patch. Returns `None` when the workflow does not exist.
    fn update(&self, id: &str, patch: WorkflowPatch) -> BoxFuture<'_, Result<Option<Workflow>>>;

    /// Mark deleted. Returns `false` when the workflow does not exist.
    fn soft_delete(&self, id: &str) -> BoxFuture<'_, Result<bool>>;
}
