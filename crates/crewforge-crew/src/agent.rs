use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::types::*;

use crate::builder::{CompiledAgent, CompiledTask};
use crate::graph::AgentSpec;

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

impl ToolCallAccumulator {
    fn input(&self) -> serde_json::Value {
        if self.input_json.trim().is_empty() {
            return serde_json::Value::Object(Default::default());
        }
        serde_json::from_str(&self.input_json).unwrap_or(serde_json::Value::Null)
    }
}

/// Upstream task output handed to a dependent task.
#[derive(Debug, Clone, Copy)]
pub struct ContextItem<'a> {
    pub task_name: &'a str,
    pub output: &'a str,
}

pub(crate) fn system_prompt(spec: &AgentSpec, has_tools: bool) -> String {
    let mut prompt = format!(
        "You are {}. {}\nYour personal goal is: {}",
        spec.role, spec.backstory, spec.goal
    );
    if has_tools {
        prompt.push_str(
            "\n\nUse the available tools when they help. Once you know the final answer, \
             reply with it directly and do not call any more tools.",
        );
    }
    prompt
}

pub(crate) fn task_prompt(task: &CompiledTask, context: &[ContextItem<'_>]) -> String {
    let mut prompt = format!(
        "Current Task: {}\n\nThis is the expected criteria for your final answer: {}\n\
         You MUST return the actual complete content as the final answer, not a summary.",
        task.spec.description, task.spec.expected_output
    );
    if !context.is_empty() {
        prompt.push_str("\n\nThis is the context you're working with:");
        for item in context {
            prompt.push_str(&format!("\n\n## {}\n{}", item.task_name, item.output));
        }
    }
    prompt
}

/// Drives one agent through a bounded tool-calling loop for a single task.
pub struct AgentExecutor<'a> {
    agent: &'a CompiledAgent,
}

impl<'a> AgentExecutor<'a> {
    pub fn new(agent: &'a CompiledAgent) -> Self {
        Self { agent }
    }

    pub async fn execute(
        &self,
        task: &CompiledTask,
        context: &[ContextItem<'_>],
        tool_ctx: ToolContext,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let spec = &self.agent.spec;
        let binding = &self.agent.binding;
        let toolbox = &self.agent.toolbox;
        toolbox.clear_cache();

        let tool_specs = toolbox.specs();
        let mut messages = vec![
            ChatMessage::system(system_prompt(spec, !toolbox.is_empty())),
            ChatMessage::user(task_prompt(task, context)),
        ];
        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;

        for turn in 0..spec.max_iterations {
            if cancel.is_cancelled() {
                return Err(CrewForgeError::Cancelled);
            }
            if spec.verbose {
                info!(agent = %spec.name, task = %task.node_id, turn, "Agent turn");
            } else {
                debug!(agent = %spec.name, task = %task.node_id, turn, "Agent turn");
            }

            let stream_result = tokio::select! {
                result = binding.client.chat_stream(&binding.config, messages.clone(), &tool_specs) => result,
                _ = cancel.cancelled() => return Err(CrewForgeError::Cancelled),
            };
            let mut stream = stream_result?;

            let mut text_content = String::new();
            let mut tool_calls: Vec<ToolCallAccumulator> = Vec::new();
            let mut stop_reason = None;

            while let Some(delta) = stream.next().await {
                if cancel.is_cancelled() {
                    return Err(CrewForgeError::Cancelled);
                }
                match delta? {
                    StreamDelta::TextDelta(text) => text_content.push_str(&text),
                    StreamDelta::ToolUseStart { index, id, name } => {
                        while tool_calls.len() <= index {
                            tool_calls.push(ToolCallAccumulator::default());
                        }
                        tool_calls[index].id = id;
                        tool_calls[index].name = name;
                    }
                    StreamDelta::ToolInputDelta { index, delta } => {
                        if let Some(tc) = tool_calls.get_mut(index) {
                            tc.input_json.push_str(&delta);
                        }
                    }
                    StreamDelta::Stop(reason) => stop_reason = Some(reason),
                    StreamDelta::Usage {
                        input_tokens,
                        output_tokens,
                    } => {
                        total_input_tokens += input_tokens;
                        total_output_tokens += output_tokens;
                    }
                }
            }
            tool_calls.retain(|tc| !tc.name.is_empty());

            if tool_calls.is_empty() {
                if stop_reason == Some(StopReason::MaxTokens) {
                    warn!(agent = %spec.name, task = %task.node_id, "Model hit max tokens");
                }
                info!(
                    agent = %spec.name,
                    task = %task.node_id,
                    turns = turn + 1,
                    input_tokens = total_input_tokens,
                    output_tokens = total_output_tokens,
                    "Task complete"
                );
                return Ok(text_content);
            }

            let mut content = Vec::new();
            if !text_content.is_empty() {
                content.push(ContentBlock::Text {
                    text: text_content,
                });
            }
            for tc in &tool_calls {
                content.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.input(),
                });
            }
            messages.push(ChatMessage {
                role: Role::Assistant,
                content,
                timestamp: Some(chrono::Utc::now()),
            });

            let mut results = Vec::with_capacity(tool_calls.len());
            for tc in &tool_calls {
                let input = tc.input();
                if spec.verbose {
                    info!(agent = %spec.name, tool = %tc.name, input = %input, "Calling tool");
                } else {
                    debug!(agent = %spec.name, tool = %tc.name, "Calling tool");
                }
                let result = toolbox.invoke(&tc.name, input, tool_ctx.clone()).await;
                results.push(ContentBlock::ToolResult {
                    tool_use_id: tc.id.clone(),
                    content: result.content,
                    is_error: result.is_error,
                });
            }
            messages.push(ChatMessage {
                role: Role::User,
                content: results,
                timestamp: Some(chrono::Utc::now()),
            });
        }

        Err(CrewForgeError::MaxIterationsExceeded {
            agent: spec.name.clone(),
            limit: spec.max_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crewforge_core::config::RunnerConfig;
    use crewforge_core::traits::Tool;
    use crewforge_llm::ModelRouter;
    use crewforge_test_utils::{agent_node, task_node, test_model, MockLlm, MockTurn, RecordingTool};
    use crewforge_tools::{ToolEntry, ToolConstructor, ToolEnv, ToolRegistry};

    use crate::builder::CrewBuilder;

    fn compile_with(
        llm: Arc<MockLlm>,
        tool: Arc<RecordingTool>,
        agent_data: serde_json::Value,
    ) -> crate::builder::CompiledCrew {
        let entry = ToolEntry::new(
            "lookup",
            "Lookup",
            "",
            ToolConstructor::fixed(move |_| Ok(tool.clone() as Arc<dyn Tool>)),
        );
        let registry = ToolRegistry::new(vec![entry]);
        let builder = CrewBuilder::new(
            Arc::new(registry),
            Arc::new(ModelRouter::single(test_model(), llm)),
            ToolEnv::default(),
            RunnerConfig::default(),
        );
        let mut agent = agent_node("a1").with_parents(&["p"]);
        if let serde_json::Value::Object(extra) = agent_data {
            agent.data.extend(extra);
        }
        builder
            .compile(&[
                crewforge_test_utils::tool_node("p", json!("lookup")),
                agent,
                task_node("t1", &["a1"]),
            ])
            .unwrap()
    }

    async fn run(crew: &crate::builder::CompiledCrew) -> Result<String> {
        let agent = crew.agent("a1").unwrap();
        AgentExecutor::new(agent)
            .execute(
                crew.task("t1").unwrap(),
                &[],
                ToolContext::default(),
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let llm = Arc::new(MockLlm::with_turns(vec![
            MockTurn::ToolCall {
                name: "lookup".into(),
                input: json!({"q": "x"}),
            },
            MockTurn::Text("final answer".into()),
        ]));
        let tool = Arc::new(RecordingTool::new("lookup").responding("lookup result"));
        let crew = compile_with(llm.clone(), tool.clone(), json!({}));

        assert_eq!(run(&crew).await.unwrap(), "final answer");
        assert_eq!(tool.calls(), vec![json!({"q": "x"})]);

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools, vec!["lookup"]);
        let last = requests[1].messages.last().unwrap();
        assert!(matches!(
            &last.content[0],
            ContentBlock::ToolResult { content, is_error: false, .. } if content == "lookup result"
        ));
    }

    #[tokio::test]
    async fn tool_failure_is_fed_back() {
        let llm = Arc::new(MockLlm::with_turns(vec![
            MockTurn::ToolCall {
                name: "lookup".into(),
                input: json!({}),
            },
            MockTurn::Text("recovered".into()),
        ]));
        let tool = Arc::new(RecordingTool::new("lookup").failing("quota exceeded"));
        let crew = compile_with(llm.clone(), tool, json!({}));

        assert_eq!(run(&crew).await.unwrap(), "recovered");
        let last = llm.requests()[1].messages.last().cloned().unwrap();
        match &last.content[0] {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert!(*is_error);
                assert!(content.contains("quota exceeded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn iteration_budget_is_enforced() {
        let turns = (0..5)
            .map(|_| MockTurn::ToolCall {
                name: "lookup".into(),
                input: json!({}),
            })
            .collect();
        let llm = Arc::new(MockLlm::with_turns(turns));
        let tool = Arc::new(RecordingTool::new("lookup"));
        let crew = compile_with(llm.clone(), tool, json!({"agent_max_iter": 2}));

        let err = run(&crew).await.unwrap_err();
        assert!(matches!(err, CrewForgeError::MaxIterationsExceeded { limit: 2, .. }));
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn cache_flag_reuses_identical_calls() {
        let call = MockTurn::ToolCall {
            name: "lookup".into(),
            input: json!({"q": "same"}),
        };
        let llm = Arc::new(MockLlm::with_turns(vec![call.clone(), call, MockTurn::Text("done".into())]));
        let tool = Arc::new(RecordingTool::new("lookup"));
        let crew = compile_with(llm, tool.clone(), json!({"agent_cache": true}));
        run(&crew).await.unwrap();
        assert_eq!(tool.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let crew = compile_with(
            Arc::new(MockLlm::new()),
            Arc::new(RecordingTool::new("lookup")),
            json!({}),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = AgentExecutor::new(crew.agent("a1").unwrap())
            .execute(crew.task("t1").unwrap(), &[], ToolContext::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CrewForgeError::Cancelled));
    }

    #[test]
    fn prompts_carry_agent_and_context() {
        let crew = compile_with(
            Arc::new(MockLlm::new()),
            Arc::new(RecordingTool::new("lookup")),
            json!({"agent_role": "Editor", "agent_goal": "Polish text"}),
        );
        let agent = crew.agent("a1").unwrap();
        let system = system_prompt(&agent.spec, true);
        assert!(system.starts_with("You are Editor."));
        assert!(system.contains("Polish text"));

        let user = task_prompt(
            crew.task("t1").unwrap(),
            &[ContextItem {
                task_name: "research",
                output: "three facts",
            }],
        );
        assert!(user.starts_with("Current Task: Complete t1"));
        assert!(user.contains("A short answer"));
        assert!(user.contains("## research\nthree facts"));
    }
}
