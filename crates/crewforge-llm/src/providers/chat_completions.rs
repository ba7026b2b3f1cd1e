use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crewforge_core::config::ModelConfig;
use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::traits::LlmClient;
use crewforge_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Client for OpenAI-style `/chat/completions` endpoints.
///
/// Also covers compatible servers (Ollama, vLLM, Groq, OpenRouter) through
/// `base_url`.
pub struct ChatCompletionsClient {
    http: Client,
}

impl ChatCompletionsClient {
    pub fn new() -> Self {
        Self::with_http(Client::new())
    }

    pub fn with_http(http: Client) -> Self {
        Self { http }
    }
}

impl Default for ChatCompletionsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct WireToolCall {
    id: String,
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireToolDef,
}

#[derive(Serialize)]
struct WireToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Deserialize, Debug)]
struct ChunkToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Deserialize, Debug)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_tools(tools: &[ToolSpec]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            r#type: "function",
            function: WireToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Flatten chat messages into the wire format. Tool results become
/// separate `tool` messages.
pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => out.push(WireMessage::text("system", msg.text())),
            Role::User => {
                let mut saw_result = false;
                for block in &msg.content {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        saw_result = true;
                        out.push(WireMessage {
                            role: "tool",
                            content: Some(content.clone()),
                            tool_calls: vec![],
                            tool_call_id: Some(tool_use_id.clone()),
                        });
                    }
                }
                if !saw_result {
                    out.push(WireMessage::text("user", msg.text()));
                }
            }
            Role::Assistant => {
                let text = msg.text();
                let tool_calls: Vec<WireToolCall> = msg
                    .tool_uses()
                    .into_iter()
                    .map(|(id, name, input)| WireToolCall {
                        id: id.to_string(),
                        r#type: "function",
                        function: WireFunctionCall {
                            name: name.to_string(),
                            arguments: input.to_string(),
                        },
                    })
                    .collect();
                out.push(WireMessage {
                    role: "assistant",
                    content: if text.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(text)
                    },
                    tool_calls,
                    tool_call_id: None,
                });
            }
        }
    }

    out
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        "content_filter" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

pub(crate) fn parse_chunk(event: &SseEvent) -> Vec<Result<StreamDelta>> {
    if event.is_done() {
        return vec![];
    }

    let chunk: Chunk = match serde_json::from_str(&event.data) {
        Ok(c) => c,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Skipping unparseable completion chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();

    for choice in chunk.choices.into_iter().take(1) {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            deltas.push(Ok(StreamDelta::TextDelta(text)));
        }
        // Some providers send the name and the full arguments in one chunk.
        for call in choice.delta.tool_calls {
            let Some(function) = call.function else { continue };
            if let Some(name) = function.name {
                deltas.push(Ok(StreamDelta::ToolUseStart {
                    index: call.index,
                    id: call.id.unwrap_or_default(),
                    name,
                }));
            }
            if let Some(args) = function.arguments.filter(|a| !a.is_empty()) {
                deltas.push(Ok(StreamDelta::ToolInputDelta {
                    index: call.index,
                    delta: args,
                }));
            }
        }
        if let Some(reason) = choice.finish_reason {
            deltas.push(Ok(StreamDelta::Stop(map_finish_reason(&reason))));
        }
    }

    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    deltas
}

impl LlmClient for ChatCompletionsClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolSpec],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let body = CompletionRequest {
            model: config.model_id.clone(),
            messages: convert_messages(messages),
            max_tokens: config.max_tokens,
            temperature: Some(config.temperature),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            tools: convert_tools(tools),
        };

        Box::pin(async move {
            let url = config.base_url.as_deref().unwrap_or(DEFAULT_API_URL);
            debug!(model = %config.model_id, url, "Sending chat completion request");

            let mut req = self.http.post(url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.bearer_auth(api_key);
            }

            let response = req
                .send()
                .await
                .map_err(|e| CrewForgeError::LlmRequest(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(CrewForgeError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let deltas = SseStream::new(response.bytes_stream())
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_chunk(&event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Box::pin(deltas) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(data: serde_json::Value) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn text_chunk() {
        let deltas = parse_chunk(&event(json!({
            "choices": [{"delta": {"content": "Hello"}}]
        })));
        assert_eq!(deltas.len(), 1);
        assert_eq!(
            deltas[0].as_ref().unwrap(),
            &StreamDelta::TextDelta("Hello".into())
        );
    }

    #[test]
    fn tool_call_with_arguments_in_one_chunk() {
        let deltas: Vec<StreamDelta> = parse_chunk(&event(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call_1",
                "function": {"name": "web_search", "arguments": "{\"query\":\"rust\"}"}
            }]}}]
        })))
        .into_iter()
        .map(|d| d.unwrap())
        .collect();
        assert_eq!(
            deltas,
            vec![
                StreamDelta::ToolUseStart {
                    index: 0,
                    id: "call_1".into(),
                    name: "web_search".into()
                },
                StreamDelta::ToolInputDelta {
                    index: 0,
                    delta: "{\"query\":\"rust\"}".into()
                },
            ]
        );
    }

    #[test]
    fn finish_reason_and_usage() {
        let deltas: Vec<StreamDelta> = parse_chunk(&event(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        })))
        .into_iter()
        .map(|d| d.unwrap())
        .collect();
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Stop(StopReason::ToolUse),
                StreamDelta::Usage {
                    input_tokens: 12,
                    output_tokens: 3
                },
            ]
        );
    }

    #[test]
    fn done_and_garbage_yield_nothing() {
        let done = SseEvent {
            event_type: None,
            data: "[DONE]".into(),
        };
        assert!(parse_chunk(&done).is_empty());
        let junk = SseEvent {
            event_type: None,
            data: "not json".into(),
        };
        assert!(parse_chunk(&junk).is_empty());
    }

    #[test]
    fn tool_results_become_tool_messages() {
        let assistant = ChatMessage {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "web_search".into(),
                input: json!({"query": "rust"}),
            }],
            timestamp: None,
        };
        let wire = convert_messages(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            assistant,
            ChatMessage::tool_result("call_1", "results", false),
        ]);
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[2].content, None);
        assert_eq!(wire[2].tool_calls[0].function.name, "web_search");
        assert_eq!(wire[3].role, "tool");
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("call_1"));
    }
}
