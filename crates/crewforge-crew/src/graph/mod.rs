//! Workflow graph model: typed node data and task ordering.

pub mod node;
pub mod order;

pub use node::{AgentSpec, NodeData, TaskSpec, ToolNodeSpec};
pub use order::topological_order;
