//! Mocks and fixtures shared by the CrewForge test suites.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{json, Value};

use crewforge_core::config::ModelConfig;
use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::traits::{LlmClient, Tool};
use crewforge_core::types::*;
use crewforge_core::workflow::{NodeKind, WorkflowNode};

// ── RecordingTool ───────────────────────────────────────────────

/// A tool that records every input it receives.
pub struct RecordingTool {
    name: String,
    schema: Value,
    response: String,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: json!({"type": "object", "properties": {}}),
            response: format!("{} ok", name),
            failure: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn responding(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records its inputs"
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(input);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.failure {
                Some(message) => Err(CrewForgeError::ToolExecution {
                    tool: self.name.clone(),
                    message: message.clone(),
                }),
                None => Ok(ToolResult::success(self.response.clone())),
            }
        })
    }
}

// ── MockLlm ─────────────────────────────────────────────────────

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum MockTurn {
    Text(String),
    ToolCall { name: String, input: Value },
    Error(String),
    /// Sleep before replying with the given text.
    Delayed(Duration, String),
}

/// What the mock saw on each request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

impl RecordedRequest {
    /// Text of the first user message, which carries the task prompt.
    pub fn prompt(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default()
    }
}

/// Scripted LLM. Once the script runs out it answers `response N`, where N
/// counts requests from 1.
#[derive(Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<MockTurn>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turns(turns: Vec<MockTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_turn(&self, n: usize) -> MockTurn {
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| MockTurn::Text(format!("response {}", n)))
    }
}

fn text_deltas(text: String) -> Vec<Result<StreamDelta>> {
    vec![
        Ok(StreamDelta::TextDelta(text)),
        Ok(StreamDelta::Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
        Ok(StreamDelta::Stop(StopReason::EndTurn)),
    ]
}

impl LlmClient for MockLlm {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolSpec],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let n = {
            let mut requests = match self.requests.lock() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            requests.push(RecordedRequest {
                model: config.model_id.clone(),
                temperature: config.temperature,
                messages,
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
            requests.len()
        };
        let turn = self.next_turn(n);

        Box::pin(async move {
            let deltas = match turn {
                MockTurn::Text(text) => text_deltas(text),
                MockTurn::Delayed(delay, text) => {
                    tokio::time::sleep(delay).await;
                    text_deltas(text)
                }
                MockTurn::ToolCall { name, input } => vec![
                    Ok(StreamDelta::ToolUseStart {
                        index: 0,
                        id: format!("call_{}", n),
                        name,
                    }),
                    Ok(StreamDelta::ToolInputDelta {
                        index: 0,
                        delta: input.to_string(),
                    }),
                    Ok(StreamDelta::Stop(StopReason::ToolUse)),
                ],
                MockTurn::Error(message) => return Err(CrewForgeError::LlmRequest(message)),
            };
            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

// ── Node fixtures ───────────────────────────────────────────────

pub fn agent_node(id: &str) -> WorkflowNode {
    WorkflowNode::new(id, NodeKind::Agent).with_data(json!({
        "agent_name": id,
        "agent_role": "Researcher",
        "agent_goal": "Find accurate facts",
        "agent_backstory": "A careful analyst",
    }))
}

pub fn task_node(id: &str, parents: &[&str]) -> WorkflowNode {
    WorkflowNode::new(id, NodeKind::Task)
        .with_data(json!({
            "task_name": id,
            "task_description": format!("Complete {}", id),
            "task_expected_op": "A short answer",
        }))
        .with_parents(parents)
}

pub fn tool_node(id: &str, tool: Value) -> WorkflowNode {
    WorkflowNode::new(id, NodeKind::Tool).with_data(json!({ "tool_name": tool }))
}

/// Minimal model config for tests.
pub fn test_model() -> ModelConfig {
    ModelConfig {
        api_key: Some("test-key".into()),
        ..Default::default()
    }
}
