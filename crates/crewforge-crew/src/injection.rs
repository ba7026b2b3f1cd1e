use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crewforge_core::config::InjectionRuleConfig;
use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::workflow::{NodeKind, RunRequest, WorkflowNode};
use crewforge_tools::{ToolRef, ToolRegistry};

/// A field of the run payload that can be copied into tool inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadField {
    Prompt,
    FilePath,
    FileName,
    VectorSearchEngine,
}

impl PayloadField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prompt" => Some(Self::Prompt),
            "file_path" => Some(Self::FilePath),
            "file_name" => Some(Self::FileName),
            "vector_search_engine" => Some(Self::VectorSearchEngine),
            _ => None,
        }
    }

    /// Value from the request; empty strings count as absent.
    fn value<'a>(&self, request: &'a RunRequest) -> Option<&'a str> {
        let v = match self {
            Self::Prompt => Some(request.prompt.as_str()),
            Self::FilePath => request.file_path.as_deref(),
            Self::FileName => request.file_name.as_deref(),
            Self::VectorSearchEngine => request.vector_search_engine.as_deref(),
        };
        v.filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionRule {
    pub field: PayloadField,
    pub input: String,
}

impl InjectionRule {
    pub fn new(field: PayloadField, input: &str) -> Self {
        Self {
            field,
            input: input.to_string(),
        }
    }
}

/// Which payload fields flow into which tool inputs, keyed by the tool's
/// display name.
#[derive(Debug, Clone)]
pub struct InjectionTable {
    rules: BTreeMap<String, Vec<InjectionRule>>,
}

impl Default for InjectionTable {
    fn default() -> Self {
        use PayloadField::*;
        let mut rules = BTreeMap::new();
        rules.insert(
            "CsvSearchTool".to_string(),
            vec![
                InjectionRule::new(FilePath, "file_path"),
                InjectionRule::new(Prompt, "prompt"),
            ],
        );
        rules.insert(
            "FILEReaderTool".to_string(),
            vec![InjectionRule::new(FilePath, "file_path")],
        );
        rules.insert(
            "Serper Search".to_string(),
            vec![InjectionRule::new(Prompt, "search_query")],
        );
        rules.insert(
            "Tavily Search Tool".to_string(),
            vec![InjectionRule::new(Prompt, "query")],
        );
        rules.insert(
            "Web Search".to_string(),
            vec![
                InjectionRule::new(Prompt, "query"),
                InjectionRule::new(VectorSearchEngine, "engine"),
            ],
        );
        Self { rules }
    }
}

impl InjectionTable {
    /// Defaults with configured entries replacing those of the same name.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<InjectionRuleConfig>>) -> Result<Self> {
        let mut table = Self::default();
        for (tool, rules) in overrides {
            let parsed = rules
                .iter()
                .map(|r| {
                    PayloadField::parse(&r.field)
                        .map(|field| InjectionRule::new(field, &r.input))
                        .ok_or_else(|| {
                            CrewForgeError::Config(format!(
                                "injection rule for '{}' uses unknown payload field '{}'",
                                tool, r.field
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            table.rules.insert(tool.clone(), parsed);
        }
        Ok(table)
    }

    pub fn rules_for(&self, display_name: &str) -> &[InjectionRule] {
        self.rules
            .get(display_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Copy request values into the `tool_inputs` of matching tool nodes.
    /// Returns how many nodes were changed.
    pub fn apply(&self, nodes: &mut [WorkflowNode], request: &RunRequest, registry: &ToolRegistry) -> usize {
        let mut changed = 0;
        for node in nodes.iter_mut().filter(|n| n.kind == NodeKind::Tool) {
            let Some(entry) = ["tool_name", "tool_id"]
                .iter()
                .find_map(|k| node.data.get(*k))
                .and_then(ToolRef::from_value)
                .and_then(|r| registry.entry(&r))
            else {
                continue;
            };

            let rules = match self.rules.get(&entry.name) {
                Some(rules) => rules,
                None => self.rules_for(&entry.id),
            };
            let values: Vec<(&str, &str)> = rules
                .iter()
                .filter_map(|r| r.field.value(request).map(|v| (r.input.as_str(), v)))
                .collect();
            if values.is_empty() {
                continue;
            }

            let inputs = node
                .data
                .entry("tool_inputs")
                .or_insert_with(|| Value::Object(Map::new()));
            if !inputs.is_object() {
                warn!(node_id = %node.id, "Replacing non-object tool_inputs");
                *inputs = Value::Object(Map::new());
            }
            if let Some(map) = inputs.as_object_mut() {
                for (key, value) in &values {
                    map.insert(key.to_string(), Value::String(value.to_string()));
                }
            }
            debug!(node_id = %node.id, tool = %entry.name, keys = ?values.iter().map(|(k, _)| *k).collect::<Vec<_>>(), "Injected run parameters");
            changed += 1;
        }
        changed
    }
}
