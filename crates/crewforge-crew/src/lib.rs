pub mod agent;
pub mod builder;
pub mod graph;
pub mod injection;
pub mod runner;
pub mod service;

pub use agent::AgentExecutor;
pub use builder::{
    CompiledAgent, CompiledCrew, CompiledTask, CrewBuilder, ExecutionPlan, PlannedAgent,
    PlannedTask, AGENTS_WITHOUT_TASKS, EMPTY_WORKFLOW,
};
pub use graph::{topological_order, AgentSpec, NodeData, TaskSpec, ToolNodeSpec};
pub use injection::{InjectionRule, InjectionTable, PayloadField};
pub use runner::{SequentialRunner, TaskOutput};
pub use service::WorkflowService;
