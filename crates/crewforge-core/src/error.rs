use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used to pick an HTTP status and a log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad node data, unknown tools, unassigned tasks.
    Configuration,
    /// Graph shape problems: cycles, dangling context references.
    Structural,
    /// Missing credentials or settings in the process environment.
    Environment,
    /// Failures while the crew is running.
    Execution,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Structural => "structural",
            Self::Environment => "environment",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-level validation failure on node data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while compiling a workflow graph into a crew.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("Tool '{0}' not found in registry")]
    UnknownTool(String),

    #[error("Failed to instantiate tool '{tool_id}' (expected {expected}): {reason}")]
    ToolInstantiation {
        tool_id: String,
        expected: String,
        reason: String,
    },

    #[error("Invalid agent data for node {node_id}: {}", join_fields(.errors))]
    InvalidAgentData {
        node_id: String,
        errors: Vec<FieldError>,
    },

    #[error("Invalid task data for node {node_id}: {}", join_fields(.errors))]
    InvalidTaskData {
        node_id: String,
        errors: Vec<FieldError>,
    },

    #[error("Invalid tool data for node {node_id}: {}", join_fields(.errors))]
    InvalidToolData {
        node_id: String,
        errors: Vec<FieldError>,
    },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Task '{task_name}' ({task_id}) has no agent assigned")]
    UnassignedTask { task_id: String, task_name: String },

    #[error("No agents defined: task '{task_name}' ({task_id}) cannot be assigned")]
    NoAgentsDefined { task_id: String, task_name: String },

    #[error("Task {task_id} references unknown context task {reference}")]
    DanglingContextReference { task_id: String, reference: String },

    #[error("Cyclic dependency detected among tasks: {}", .tasks.join(", "))]
    CyclicDependency { tasks: Vec<String> },

    #[error("Missing credential {name}: {hint}")]
    MissingCredential { name: String, hint: String },
}

impl BuildError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CyclicDependency { .. } | Self::DanglingContextReference { .. } => {
                ErrorClass::Structural
            }
            Self::MissingCredential { .. } => ErrorClass::Environment,
            _ => ErrorClass::Configuration,
        }
    }
}

#[derive(Debug, Error)]
pub enum CrewForgeError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Run errors
    #[error("Agent '{agent}' exceeded max iterations ({limit})")]
    MaxIterationsExceeded { agent: String, limit: usize },

    #[error("Task '{task}' timed out after {timeout_secs}s")]
    TaskTimeout { task: String, timeout_secs: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Graph compilation
    #[error(transparent)]
    Build(#[from] BuildError),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrewForgeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Build(e) => e.class(),
            Self::Config(_) | Self::ConfigNotFound(_) => ErrorClass::Environment,
            _ => ErrorClass::Execution,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrewForgeError>;
