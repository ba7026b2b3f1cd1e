use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crewforge_core::config::RunnerConfig;
use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::types::{RunId, ToolContext};

use crate::agent::{AgentExecutor, ContextItem};
use crate::builder::CompiledCrew;

/// Output of one completed task.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub task_id: String,
    pub task_name: String,
    pub agent: String,
    pub output: String,
    pub elapsed_ms: u64,
}

/// Runs compiled tasks one after another, feeding each task the outputs of
/// the tasks it declared as context.
///
/// The first failure aborts the run and only that error is returned.
pub struct SequentialRunner {
    task_timeout: Option<Duration>,
}

impl SequentialRunner {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            task_timeout: config.task_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub async fn run(
        &self,
        crew: &CompiledCrew,
        run_id: &RunId,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskOutput>> {
        let mut outputs: Vec<TaskOutput> = Vec::with_capacity(crew.tasks.len());

        for (step, task) in crew.tasks.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CrewForgeError::Cancelled);
            }
            let agent = crew.agent(&task.agent_id).ok_or_else(|| {
                CrewForgeError::Config(format!(
                    "Task {} is assigned to missing agent {}",
                    task.node_id, task.agent_id
                ))
            })?;

            let context: Vec<ContextItem<'_>> = task
                .context
                .iter()
                .filter_map(|id| outputs.iter().find(|o| o.task_id == *id))
                .map(|o| ContextItem {
                    task_name: &o.task_name,
                    output: &o.output,
                })
                .collect();

            info!(
                run_id = %run_id,
                step = step + 1,
                of = crew.tasks.len(),
                task_id = %task.node_id,
                agent = %agent.spec.name,
                "Running task"
            );
            let start = Instant::now();
            let tool_ctx = ToolContext::new(run_id.clone(), task.node_id.clone(), agent.spec.name.clone());
            let executor = AgentExecutor::new(agent);
            let fut = executor.execute(task, &context, tool_ctx, cancel);

            let result = match self.task_timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(r) => r,
                    Err(_) => Err(CrewForgeError::TaskTimeout {
                        task: task.node_id.clone(),
                        timeout_secs: limit.as_secs(),
                    }),
                },
                None => fut.await,
            };

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    error!(run_id = %run_id, task_id = %task.node_id, error = %e, "Task failed");
                    return Err(e);
                }
            };
            drop(context);

            outputs.push(TaskOutput {
                task_id: task.node_id.clone(),
                task_name: task.spec.name.clone(),
                agent: agent.spec.name.clone(),
                output,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crewforge_llm::ModelRouter;
    use crewforge_test_utils::{agent_node, task_node, test_model, MockLlm, MockTurn};
    use crewforge_tools::{ToolEnv, ToolRegistry};

    use crate::builder::CrewBuilder;

    fn compile(llm: Arc<MockLlm>, nodes: &[crewforge_core::workflow::WorkflowNode]) -> CompiledCrew {
        CrewBuilder::new(
            Arc::new(ToolRegistry::with_builtins()),
            Arc::new(ModelRouter::single(test_model(), llm)),
            ToolEnv::default(),
            RunnerConfig::default(),
        )
        .compile(nodes)
        .unwrap()
    }

    #[tokio::test]
    async fn outputs_flow_to_dependents() {
        let llm = Arc::new(MockLlm::with_turns(vec![
            MockTurn::Text("facts about rust".into()),
            MockTurn::Text("article".into()),
        ]));
        let crew = compile(
            llm.clone(),
            &[agent_node("a1"), task_node("t2", &["a1", "t1"]), task_node("t1", &["a1"])],
        );
        let outputs = SequentialRunner::new(&RunnerConfig::default())
            .run(&crew, &RunId::new(), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = outputs.iter().map(|o| o.task_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(outputs[1].output, "article");

        let requests = llm.requests();
        assert!(!requests[0].prompt().contains("context you're working with"));
        assert!(requests[1].prompt().contains("## t1\nfacts about rust"));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_tasks() {
        let llm = Arc::new(MockLlm::with_turns(vec![MockTurn::Error("rate limited".into())]));
        let crew = compile(
            llm.clone(),
            &[agent_node("a1"), task_node("t1", &["a1"]), task_node("t2", &["a1", "t1"])],
        );
        let err = SequentialRunner::new(&RunnerConfig::default())
            .run(&crew, &RunId::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrewForgeError::LlmRequest(_)));
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_times_out() {
        let llm = Arc::new(MockLlm::with_turns(vec![MockTurn::Delayed(
            Duration::from_secs(30),
            "late".into(),
        )]));
        let crew = compile(llm, &[agent_node("a1"), task_node("t1", &["a1"])]);
        let err = SequentialRunner::new(&RunnerConfig::default())
            .with_task_timeout(Some(Duration::from_secs(5)))
            .run(&crew, &RunId::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            CrewForgeError::TaskTimeout { task, timeout_secs } => {
                assert_eq!(task, "t1");
                assert_eq!(timeout_secs, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_run_stops() {
        let llm = Arc::new(MockLlm::new());
        let crew = compile(llm.clone(), &[agent_node("a1"), task_node("t1", &["a1"])]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = SequentialRunner::new(&RunnerConfig::default())
            .run(&crew, &RunId::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CrewForgeError::Cancelled));
        assert!(llm.requests().is_empty());
    }
}
