use futures::future::BoxFuture;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crewforge_core::config::ModelConfig;
use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::traits::LlmClient;
use crewforge_core::types::*;

/// Amazon Bedrock client using the Converse API with a Bedrock API key.
///
/// Converse is request/response, so the reply is replayed as a short
/// sequence of stream deltas.
pub struct BedrockClient {
    http: Client,
}

impl BedrockClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for BedrockClient {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn converse_url(config: &ModelConfig) -> String {
    let base = match &config.base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!(
            "https://bedrock-runtime.{}.amazonaws.com",
            config.aws_region.as_deref().unwrap_or("us-east-1")
        ),
    };
    format!(
        "{}/model/{}/converse",
        base,
        urlencoding::encode(&config.model_id)
    )
}

fn content_json(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "text": text }),
        ContentBlock::ToolUse { id, name, input } => json!({
            "toolUse": { "toolUseId": id, "name": name, "input": input }
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "toolResult": {
                "toolUseId": tool_use_id,
                "content": [{ "text": content }],
                "status": if *is_error { "error" } else { "success" },
            }
        }),
    }
}

/// Build the Converse request body. Consecutive messages with the same
/// role are merged since Bedrock requires alternating turns.
pub(crate) fn build_request(
    config: &ModelConfig,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
) -> Value {
    let mut system = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                system.push(json!({ "text": msg.text() }));
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let blocks: Vec<Value> = msg.content.iter().map(content_json).collect();
        match turns.last_mut() {
            Some((last_role, content)) if *last_role == role => content.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let mut body = json!({
        "messages": turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect::<Vec<_>>(),
        "inferenceConfig": {
            "maxTokens": config.max_tokens,
            "temperature": config.temperature,
        },
    });
    if !system.is_empty() {
        body["system"] = Value::Array(system);
    }
    if !tools.is_empty() {
        body["toolConfig"] = json!({
            "tools": tools
                .iter()
                .map(|t| json!({
                    "toolSpec": {
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": { "json": t.input_schema },
                    }
                }))
                .collect::<Vec<_>>()
        });
    }
    body
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ConverseOutput,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ConverseUsage>,
}

#[derive(Deserialize)]
struct ConverseOutput {
    message: ConverseMessage,
}

#[derive(Deserialize)]
struct ConverseMessage {
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub(crate) fn response_to_deltas(raw: &str) -> Result<Vec<StreamDelta>> {
    let resp: ConverseResponse = serde_json::from_str(raw)
        .map_err(|e| CrewForgeError::LlmParse(format!("Bedrock response: {}", e)))?;

    let mut deltas = Vec::new();
    let mut tool_index = 0;
    for block in resp.output.message.content {
        if let Some(text) = block.get("text").and_then(Value::as_str) {
            deltas.push(StreamDelta::TextDelta(text.to_string()));
        } else if let Some(tool) = block.get("toolUse") {
            let id = tool["toolUseId"].as_str().unwrap_or_default().to_string();
            let name = tool["name"].as_str().unwrap_or_default().to_string();
            let input = tool.get("input").cloned().unwrap_or_else(|| json!({}));
            deltas.push(StreamDelta::ToolUseStart {
                index: tool_index,
                id,
                name,
            });
            deltas.push(StreamDelta::ToolInputDelta {
                index: tool_index,
                delta: input.to_string(),
            });
            tool_index += 1;
        }
    }

    if let Some(usage) = resp.usage {
        deltas.push(StreamDelta::Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        });
    }

    let stop = match resp.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    };
    deltas.push(StreamDelta::Stop(stop));
    Ok(deltas)
}

impl LlmClient for BedrockClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolSpec],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let url = converse_url(config);
        let body = build_request(config, &messages, tools);
        let api_key = config.api_key.clone();
        let model = config.model_id.clone();

        Box::pin(async move {
            let api_key = api_key.ok_or_else(|| {
                CrewForgeError::LlmRequest("Bedrock API key is not configured".to_string())
            })?;
            debug!(model = %model, "Sending Bedrock converse request");

            let response = self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| CrewForgeError::LlmRequest(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| CrewForgeError::LlmRequest(e.to_string()))?;
            if !status.is_success() {
                return Err(CrewForgeError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            let deltas = response_to_deltas(&text)?;
            Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok)))
                as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}
