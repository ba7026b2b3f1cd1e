use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crewforge_core::config::{AppConfig, RunnerConfig};
use crewforge_core::error::{BuildError, Result};
use crewforge_core::traits::Tool;
use crewforge_core::types::RunId;
use crewforge_core::workflow::{NodeKind, WorkflowNode};
use crewforge_llm::{ModelBinding, ModelRouter};
use crewforge_tools::{StaticInputTool, ToolEnv, ToolRegistry, Toolbox};

use crate::graph::{topological_order, AgentSpec, NodeData, TaskSpec, ToolNodeSpec};
use crate::runner::SequentialRunner;

pub const EMPTY_WORKFLOW: &str = "Workflow is empty (no agents or tasks).";
pub const AGENTS_WITHOUT_TASKS: &str = "Workflow has agents but no tasks to execute.";

/// An agent ready to run: validated data, model binding and its tools.
pub struct CompiledAgent {
    pub node_id: String,
    pub spec: AgentSpec,
    pub binding: ModelBinding,
    pub toolbox: Toolbox,
}

#[derive(Debug, Clone)]
pub struct CompiledTask {
    pub node_id: String,
    pub spec: TaskSpec,
    /// Node id of the owning agent.
    pub agent_id: String,
    /// Node ids of the tasks whose output this task receives.
    pub context: Vec<String>,
}

/// Output of the compiler: agents plus tasks in execution order.
pub struct CompiledCrew {
    pub agents: Vec<CompiledAgent>,
    pub tasks: Vec<CompiledTask>,
    pub warnings: Vec<String>,
}

impl CompiledCrew {
    pub fn agent(&self, node_id: &str) -> Option<&CompiledAgent> {
        self.agents.iter().find(|a| a.node_id == node_id)
    }

    pub fn task(&self, node_id: &str) -> Option<&CompiledTask> {
        self.tasks.iter().find(|t| t.node_id == node_id)
    }

    /// Task node ids in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.node_id.as_str()).collect()
    }

    pub fn plan(&self) -> ExecutionPlan {
        ExecutionPlan {
            agents: self
                .agents
                .iter()
                .map(|a| PlannedAgent {
                    id: a.node_id.clone(),
                    name: a.spec.name.clone(),
                    model: a.binding.config.model_id.clone(),
                    max_iterations: a.spec.max_iterations,
                    tools: a.toolbox.names().into_iter().map(String::from).collect(),
                })
                .collect(),
            tasks: self
                .tasks
                .iter()
                .map(|t| PlannedTask {
                    id: t.node_id.clone(),
                    name: t.spec.name.clone(),
                    agent: t.agent_id.clone(),
                    context: t.context.clone(),
                })
                .collect(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Serializable summary of a compiled crew.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub agents: Vec<PlannedAgent>,
    pub tasks: Vec<PlannedTask>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedAgent {
    pub id: String,
    pub name: String,
    pub model: String,
    pub max_iterations: usize,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedTask {
    pub id: String,
    pub name: String,
    pub agent: String,
    pub context: Vec<String>,
}

/// Compiles a workflow node list into a runnable crew.
pub struct CrewBuilder {
    registry: Arc<ToolRegistry>,
    router: Arc<ModelRouter>,
    env: ToolEnv,
    runner: RunnerConfig,
}

/// Tool resources with the default model attached when it can be routed.
fn tool_env(config: &AppConfig, router: &ModelRouter) -> ToolEnv {
    let env = ToolEnv::from_config(config);
    match router.route(None, None) {
        Ok(binding) => env.with_llm(binding.client, binding.config),
        Err(e) => {
            warn!(error = %e, "Default model unavailable; tools run without a model");
            env
        }
    }
}

impl CrewBuilder {
    pub fn new(
        registry: Arc<ToolRegistry>,
        router: Arc<ModelRouter>,
        env: ToolEnv,
        runner: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            router,
            env,
            runner,
        }
    }

    /// Builder with the built-in tools and clients from settings.
    pub fn from_config(config: &AppConfig) -> Self {
        let router = ModelRouter::from_config(config);
        let env = tool_env(config, &router);
        Self::new(
            Arc::new(ToolRegistry::with_builtins()),
            Arc::new(router),
            env,
            config.runner.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn runner_config(&self) -> &RunnerConfig {
        &self.runner
    }

    /// Validate the graph, build agents and tools, and order the tasks.
    pub fn compile(&self, nodes: &[WorkflowNode]) -> std::result::Result<CompiledCrew, BuildError> {
        let by_id = index_nodes(nodes)?;
        let mut warnings = Vec::new();

        let agents = self.instantiate_agents(nodes, &by_id)?;
        let tasks = self.instantiate_tasks(nodes, &by_id, &agents, &mut warnings)?;
        let tasks = order_tasks(tasks)?;

        info!(
            agents = agents.len(),
            tasks = tasks.len(),
            warnings = warnings.len(),
            "Workflow compiled"
        );
        Ok(CompiledCrew {
            agents,
            tasks,
            warnings,
        })
    }

    /// Compile and run. Returns the final task's output.
    pub async fn build_and_run(
        &self,
        nodes: &[WorkflowNode],
        run_id: &RunId,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let crew = self.compile(nodes)?;
        if crew.tasks.is_empty() {
            let message = if crew.agents.is_empty() {
                EMPTY_WORKFLOW
            } else {
                AGENTS_WITHOUT_TASKS
            };
            info!(run_id = %run_id, "{}", message);
            return Ok(message.to_string());
        }

        let outputs = SequentialRunner::new(&self.runner)
            .run(&crew, run_id, cancel)
            .await?;
        Ok(outputs
            .into_iter()
            .last()
            .map(|o| o.output)
            .unwrap_or_default())
    }

    fn instantiate_agents(
        &self,
        nodes: &[WorkflowNode],
        by_id: &HashMap<&str, &WorkflowNode>,
    ) -> std::result::Result<Vec<CompiledAgent>, BuildError> {
        let mut agents = Vec::new();
        for node in nodes.iter().filter(|n| n.kind == NodeKind::Agent) {
            let NodeData::Agent(spec) = NodeData::parse(node, self.runner.default_max_iterations)? else {
                continue;
            };

            let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
            for conn in node.connections() {
                match by_id.get(conn.as_str()) {
                    Some(tool_node) if tool_node.kind == NodeKind::Tool => {
                        if let NodeData::Tool(tool_spec) =
                            NodeData::parse(tool_node, self.runner.default_max_iterations)?
                        {
                            tools.push(self.instantiate_tool(&tool_node.id, tool_spec)?);
                        }
                    }
                    Some(other) => {
                        debug!(agent = %node.id, node = %other.id, kind = %other.kind, "Agent link is not a tool");
                    }
                    None => {
                        debug!(agent = %node.id, node = %conn, "Agent links to an unknown node");
                    }
                }
            }

            let binding = self
                .router
                .route(spec.model.as_deref(), spec.temperature)?;
            let toolbox = Toolbox::new(tools)
                .with_timeout_cap(self.runner.tool_timeout_secs)
                .with_max_output_chars(self.runner.max_tool_output_chars)
                .with_cache(spec.cache);

            if spec.allow_delegation {
                debug!(agent = %node.id, "Delegation requested; tasks still run sequentially");
            }
            debug!(
                agent = %node.id,
                name = %spec.name,
                model = %binding.config.model_id,
                tools = ?toolbox.names(),
                "Agent compiled"
            );
            agents.push(CompiledAgent {
                node_id: node.id.clone(),
                spec,
                binding,
                toolbox,
            });
        }
        Ok(agents)
    }

    fn instantiate_tool(
        &self,
        node_id: &str,
        spec: ToolNodeSpec,
    ) -> std::result::Result<Arc<dyn Tool>, BuildError> {
        let tool = self
            .registry
            .instantiate(&spec.tool, &spec.config_params, &self.env)?;
        if spec.tool_inputs.is_empty() {
            return Ok(tool);
        }
        debug!(
            node_id,
            tool = %tool.name(),
            inputs = ?spec.tool_inputs.keys().collect::<Vec<_>>(),
            "Pinning static tool inputs"
        );
        Ok(Arc::new(StaticInputTool::new(tool, spec.tool_inputs)))
    }

    fn instantiate_tasks(
        &self,
        nodes: &[WorkflowNode],
        by_id: &HashMap<&str, &WorkflowNode>,
        agents: &[CompiledAgent],
        warnings: &mut Vec<String>,
    ) -> std::result::Result<Vec<CompiledTask>, BuildError> {
        let mut tasks = Vec::new();
        for node in nodes.iter().filter(|n| n.kind == NodeKind::Task) {
            let NodeData::Task(spec) = NodeData::parse(node, self.runner.default_max_iterations)? else {
                continue;
            };
            let mut owners: Vec<&str> = Vec::new();
            let mut context: Vec<String> = Vec::new();

            for conn in node.connections() {
                match by_id.get(conn.as_str()).map(|n| n.kind) {
                    Some(NodeKind::Agent) => owners.push(conn),
                    Some(NodeKind::Tool) => {
                        warn!(task = %node.id, tool = %conn, "Ignoring tool linked directly to a task");
                    }
                    Some(NodeKind::Task) | None => {
                        if !context.contains(conn) {
                            context.push(conn.clone());
                        }
                    }
                }
            }

            let Some(agent_id) = owners.last().map(|a| a.to_string()) else {
                return Err(if agents.is_empty() {
                    BuildError::NoAgentsDefined {
                        task_id: node.id.clone(),
                        task_name: spec.name,
                    }
                } else {
                    BuildError::UnassignedTask {
                        task_id: node.id.clone(),
                        task_name: spec.name,
                    }
                });
            };
            if owners.len() > 1 {
                warn!(task = %node.id, agents = ?owners, chosen = %agent_id, "Task has several agents; last one wins");
                warnings.push(format!(
                    "Task '{}' ({}) is linked to {} agents; using {}",
                    spec.name,
                    node.id,
                    owners.len(),
                    agent_id
                ));
            }

            tasks.push(CompiledTask {
                node_id: node.id.clone(),
                spec,
                agent_id,
                context,
            });
        }
        Ok(tasks)
    }
}

fn index_nodes(nodes: &[WorkflowNode]) -> std::result::Result<HashMap<&str, &WorkflowNode>, BuildError> {
    let mut by_id = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if by_id.insert(node.id.as_str(), node).is_some() {
            return Err(BuildError::DuplicateNode(node.id.clone()));
        }
    }
    Ok(by_id)
}

/// Check context references and sort tasks so every task follows its context.
fn order_tasks(tasks: Vec<CompiledTask>) -> std::result::Result<Vec<CompiledTask>, BuildError> {
    let ids: Vec<String> = tasks.iter().map(|t| t.node_id.clone()).collect();
    for task in &tasks {
        if let Some(dangling) = task.context.iter().find(|c| !ids.contains(c)) {
            return Err(BuildError::DanglingContextReference {
                task_id: task.node_id.clone(),
                reference: dangling.clone(),
            });
        }
    }

    let deps: HashMap<String, Vec<String>> = tasks
        .iter()
        .map(|t| (t.node_id.clone(), t.context.clone()))
        .collect();
    let order = topological_order(&ids, &deps)
        .map_err(|tasks| BuildError::CyclicDependency { tasks })?;
    debug!(order = ?order, "Tasks ordered");

    let mut by_id: HashMap<String, CompiledTask> =
        tasks.into_iter().map(|t| (t.node_id.clone(), t)).collect();
    Ok(order.iter().filter_map(|id| by_id.remove(id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewforge_core::config::ModelConfig;
    use crewforge_test_utils::{agent_node, task_node, test_model, tool_node, MockLlm};
    use serde_json::json;

    fn builder() -> CrewBuilder {
        let router = ModelRouter::single(test_model(), Arc::new(MockLlm::new()));
        CrewBuilder::new(
            Arc::new(ToolRegistry::with_builtins()),
            Arc::new(router),
            ToolEnv::default(),
            RunnerConfig::default(),
        )
    }

    #[test]
    fn single_agent_single_task() {
        let crew = builder()
            .compile(&[agent_node("a1"), task_node("t1", &["a1"])])
            .unwrap();
        assert_eq!(crew.order(), vec!["t1"]);
        assert_eq!(crew.task("t1").unwrap().agent_id, "a1");
        assert!(crew.warnings.is_empty());
    }

    #[test]
    fn source_is_used_when_parents_empty() {
        let task = WorkflowNode::new("t1", NodeKind::Task)
            .with_data(json!({"task_name": "t1"}))
            .with_source(&["a1"]);
        let crew = builder().compile(&[agent_node("a1"), task]).unwrap();
        assert_eq!(crew.task("t1").unwrap().agent_id, "a1");
    }

    #[test]
    fn context_dependencies_order_tasks() {
        let crew = builder()
            .compile(&[
                agent_node("a1"),
                task_node("t2", &["t1", "a1"]),
                task_node("t1", &["a1"]),
            ])
            .unwrap();
        assert_eq!(crew.order(), vec!["t1", "t2"]);
        assert_eq!(crew.task("t2").unwrap().context, vec!["t1"]);
    }

    #[test]
    fn duplicate_context_refs_are_deduped() {
        let crew = builder()
            .compile(&[
                agent_node("a1"),
                task_node("t1", &["a1"]),
                task_node("t2", &["a1", "t1", "t1"]),
            ])
            .unwrap();
        assert_eq!(crew.task("t2").unwrap().context, vec!["t1"]);
    }

    #[test]
    fn last_agent_wins_with_warning() {
        let crew = builder()
            .compile(&[agent_node("a1"), agent_node("a2"), task_node("t1", &["a1", "a2"])])
            .unwrap();
        assert_eq!(crew.task("t1").unwrap().agent_id, "a2");
        assert_eq!(crew.warnings.len(), 1);
        assert!(crew.warnings[0].contains("2 agents"));
    }

    #[test]
    fn duplicate_node_ids_rejected() {
        let err = builder()
            .compile(&[agent_node("a1"), agent_node("a1")])
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::DuplicateNode(ref id) if id == "a1"));
    }

    #[test]
    fn unassigned_task_fails_even_when_others_are_valid() {
        let err = builder()
            .compile(&[agent_node("a1"), task_node("t1", &["a1"]), task_node("t2", &[])])
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::UnassignedTask { ref task_id, .. } if task_id == "t2"));
    }

    #[test]
    fn no_agents_defined() {
        let err = builder().compile(&[task_node("t1", &[])]).err().unwrap();
        assert!(err.to_string().contains("No agents defined"));
        assert!(matches!(err, BuildError::NoAgentsDefined { .. }));
    }

    #[test]
    fn dangling_reference_is_structural() {
        let err = builder()
            .compile(&[agent_node("a1"), task_node("t1", &["a1", "ghost"])])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BuildError::DanglingContextReference { ref reference, .. } if reference == "ghost"
        ));
    }

    #[test]
    fn cycle_is_reported() {
        let err = builder()
            .compile(&[
                agent_node("a1"),
                task_node("t1", &["a1", "t2"]),
                task_node("t2", &["a1", "t1"]),
            ])
            .err()
            .unwrap();
        match err {
            BuildError::CyclicDependency { tasks } => assert_eq!(tasks, vec!["t1", "t2"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tools_attach_to_agents_and_pin_inputs() {
        let mut csv = tool_node("csv", json!("CsvSearchTool"));
        csv.data.insert("tool_inputs".into(), json!({"file_path": "/tmp/data.csv"}));
        let scraper = tool_node("web", json!(9));
        let crew = builder()
            .compile(&[
                csv,
                scraper,
                agent_node("a1").with_parents(&["csv", "web"]),
                task_node("t1", &["a1", "csv"]),
            ])
            .unwrap();
        let agent = crew.agent("a1").unwrap();
        assert_eq!(agent.toolbox.names(), vec!["csv_search", "scrape_website"]);
        let csv_spec = &agent.toolbox.specs()[0];
        assert_eq!(csv_spec.input_schema["required"], json!(["file_path", "prompt"]));
        // the tool link on the task is ignored
        assert!(crew.task("t1").unwrap().context.is_empty());
    }

    #[test]
    fn tool_env_without_default_credential_has_no_model() {
        let keyless = ModelConfig {
            provider: "openai".into(),
            api_key: None,
            base_url: None,
            ..ModelConfig::default()
        };
        let mock: Arc<dyn crewforge_core::traits::LlmClient> = Arc::new(MockLlm::new());
        let router = ModelRouter::with_clients(
            keyless,
            mock.clone(),
            mock.clone(),
            mock,
            Default::default(),
        );
        assert!(tool_env(&AppConfig::default(), &router).llm.is_none());

        let keyed = ModelRouter::single(test_model(), Arc::new(MockLlm::new()));
        assert!(tool_env(&AppConfig::default(), &keyed).llm.is_some());
    }

    #[test]
    fn unknown_tool_fails_compile() {
        let err = builder()
            .compile(&[
                tool_node("x", json!("no_such_tool")),
                agent_node("a1").with_parents(&["x"]),
            ])
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::UnknownTool(_)));
    }

    #[test]
    fn agent_model_override_reaches_binding() {
        let mut agent = agent_node("a1");
        agent.data.insert("agent_model_name".into(), json!("gpt-4o"));
        agent.data.insert("agent_temperature".into(), json!(0.3));
        let crew = builder().compile(&[agent]).unwrap();
        let binding = &crew.agent("a1").unwrap().binding;
        assert_eq!(binding.config.model_id, "gpt-4o");
        assert_eq!(binding.config.temperature, 0.3);
    }

    #[test]
    fn missing_default_key_is_environment_error() {
        let router = ModelRouter::single(ModelConfig::default(), Arc::new(MockLlm::new()));
        let builder = CrewBuilder::new(
            Arc::new(ToolRegistry::with_builtins()),
            Arc::new(router),
            ToolEnv::default(),
            RunnerConfig::default(),
        );
        let err = builder.compile(&[agent_node("a1")]).err().unwrap();
        assert!(matches!(err, BuildError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn empty_and_agent_only_workflows() {
        let b = builder();
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        assert_eq!(b.build_and_run(&[], &run_id, &cancel).await.unwrap(), EMPTY_WORKFLOW);
        assert_eq!(
            b.build_and_run(&[agent_node("a1")], &run_id, &cancel).await.unwrap(),
            AGENTS_WITHOUT_TASKS
        );
    }

    #[test]
    fn plan_serializes() {
        let crew = builder()
            .compile(&[agent_node("a1"), task_node("t1", &["a1"])])
            .unwrap();
        let plan = serde_json::to_value(crew.plan()).unwrap();
        assert_eq!(plan["tasks"][0]["id"], "t1");
        assert_eq!(plan["agents"][0]["max_iterations"], 25);
    }
}
