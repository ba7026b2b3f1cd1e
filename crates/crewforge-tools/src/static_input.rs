use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

/// Wraps a tool so that it always runs with pre-declared inputs.
///
/// Whatever arguments the agent passes are dropped; the wrapped tool sees
/// only the static map. Name, description and schema are the wrapped tool's.
pub struct StaticInputTool {
    inner: Arc<dyn Tool>,
    inputs: Map<String, Value>,
}

impl StaticInputTool {
    pub fn new(inner: Arc<dyn Tool>, inputs: Map<String, Value>) -> Self {
        Self { inner, inputs }
    }

    pub fn static_inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }
}

impl Tool for StaticInputTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    fn execute(&self, _input: Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        self.inner.execute(Value::Object(self.inputs.clone()), ctx)
    }

    fn timeout_secs(&self) -> u64 {
        self.inner.timeout_secs()
    }
}
