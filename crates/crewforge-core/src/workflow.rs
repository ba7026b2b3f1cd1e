//! Persisted workflow graph and run request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;
use crate::types::RunId;

/// Node discriminant, stored explicitly as `"type"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Agent,
    Task,
    Tool,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Task => write!(f, "task"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Canvas position, kept only for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One node of a workflow graph. `data` stays loosely typed until compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, alias = "childs")]
    pub children: Vec<String>,
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: serde_json::Map::new(),
            parents: vec![],
            children: vec![],
            source: vec![],
            position: None,
        }
    }

    /// Set `data` from a JSON object. Non-object values are ignored.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    pub fn with_parents(mut self, parents: &[&str]) -> Self {
        self.parents = parents.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_source(mut self, source: &[&str]) -> Self {
        self.source = source.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Incoming links: `parents`, or `source` when `parents` is empty.
    pub fn connections(&self) -> &[String] {
        if self.parents.is_empty() {
            &self.source
        } else {
            &self.parents
        }
    }
}

/// A stored workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Option<Vec<WorkflowNode>>,
}

impl From<NewWorkflow> for WorkflowPatch {
    fn from(w: NewWorkflow) -> Self {
        Self {
            name: Some(w.name),
            description: w.description,
            nodes: Some(w.nodes),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: default_limit(),
        }
    }
}

fn default_limit() -> usize { 100 }

/// Per-run parameters injected into matching tool nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub vector_search_engine: Option<String>,
}

impl RunRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Outcome of a single run, returned to callers as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub workflow_id: String,
    pub run_id: RunId,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorClass>,
}

impl RunOutcome {
    pub fn success(workflow_id: impl Into<String>, run_id: RunId, output: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
            status: RunStatus::Success,
            output: Some(output.into()),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(
        workflow_id: impl Into<String>,
        run_id: RunId,
        error: impl Into<String>,
        kind: ErrorClass,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
            status: RunStatus::Failed,
            output: None,
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
