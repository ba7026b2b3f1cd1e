//! Typed views over the loosely-typed `data` bag of workflow nodes.
//!
//! The UI writes its own wire names (`agent_role`, `task_expected_op`, ...)
//! and sometimes short aliases; both are accepted. Unknown keys are left
//! alone since the UI keeps presentation state in the same map.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crewforge_core::error::{BuildError, FieldError};
use crewforge_core::workflow::{NodeKind, WorkflowNode};
use crewforge_tools::registry::{ConfigParams, ToolRef};

const AGENT_KEYS: &[&[&str]] = &[
    &["agent_name", "name"],
    &["agent_role", "role"],
    &["agent_goal", "goal"],
    &["agent_backstory", "backstory"],
    &["agent_model_name", "model", "llm_provider_model"],
    &["agent_temperature", "temperature"],
    &["agent_max_iter", "agent_iteration", "max_iter"],
    &["agent_delegation", "allow_delegation"],
    &["agent_verbose", "verbose"],
    &["agent_cache", "cache"],
];

const TASK_KEYS: &[&[&str]] = &[
    &["task_name", "name"],
    &["task_description", "description"],
    &["task_expected_op", "expected_output"],
];

const TOOL_KEYS: &[&[&str]] = &[&["tool_name", "tool_id"], &["config_params"], &["tool_inputs"]];

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_iterations: usize,
    pub allow_delegation: bool,
    pub verbose: bool,
    pub cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolNodeSpec {
    pub tool: ToolRef,
    pub config_params: ConfigParams,
    pub tool_inputs: Map<String, Value>,
}

/// Node data after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Agent(AgentSpec),
    Task(TaskSpec),
    Tool(ToolNodeSpec),
}

impl NodeData {
    pub fn parse(node: &WorkflowNode, default_max_iterations: usize) -> Result<Self, BuildError> {
        match node.kind {
            NodeKind::Agent => {
                AgentSpec::parse(&node.id, &node.data, default_max_iterations).map(Self::Agent)
            }
            NodeKind::Task => TaskSpec::parse(&node.id, &node.data).map(Self::Task),
            NodeKind::Tool => ToolNodeSpec::parse(&node.id, &node.data).map(Self::Tool),
        }
    }
}

/// First present, non-null value among `keys`, with the key that matched.
fn lookup<'a>(data: &'a Map<String, Value>, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    keys.iter()
        .find_map(|k| data.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
}

fn log_unknown_keys(node_id: &str, data: &Map<String, Value>, known: &[&[&str]]) {
    for key in data.keys() {
        if !known.iter().any(|group| group.contains(&key.as_str())) {
            debug!(node_id, key = %key, "Ignoring unknown node data key");
        }
    }
}

/// Collects field errors while reading one node's data.
struct Reader<'a> {
    data: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Reader<'a> {
    fn new(data: &'a Map<String, Value>) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }

    fn string(&mut self, keys: &[&'static str], default: &str) -> String {
        match lookup(self.data, keys) {
            None => default.to_string(),
            Some((_, Value::String(s))) => s.clone(),
            Some((key, _)) => {
                self.errors.push(FieldError::new(key, "must be a string"));
                default.to_string()
            }
        }
    }

    fn optional_string(&mut self, keys: &[&'static str]) -> Option<String> {
        match lookup(self.data, keys) {
            None => None,
            Some((_, Value::String(s))) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Some((key, _)) => {
                self.errors.push(FieldError::new(key, "must be a string"));
                None
            }
        }
    }

    fn flag(&mut self, keys: &[&'static str], default: bool) -> bool {
        match lookup(self.data, keys) {
            None => default,
            Some((_, Value::Bool(b))) => *b,
            Some((_, Value::String(s))) if s.eq_ignore_ascii_case("true") => true,
            Some((_, Value::String(s))) if s.eq_ignore_ascii_case("false") => false,
            Some((key, _)) => {
                self.errors.push(FieldError::new(key, "must be a boolean"));
                default
            }
        }
    }

    fn object(&mut self, key: &'static str) -> Map<String, Value> {
        match lookup(self.data, &[key]) {
            None => Map::new(),
            Some((_, Value::Object(map))) => map.clone(),
            Some((key, _)) => {
                self.errors.push(FieldError::new(key, "must be an object"));
                Map::new()
            }
        }
    }
}

fn parse_temperature(reader: &mut Reader<'_>) -> Option<f32> {
    let (key, value) = lookup(reader.data, AGENT_KEYS[5])?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(t) if (0.0..=1.0).contains(&t) => Some(t as f32),
        Some(_) => {
            reader
                .errors
                .push(FieldError::new(key, "must be between 0.0 and 1.0"));
            None
        }
        None => {
            reader.errors.push(FieldError::new(key, "must be a number"));
            None
        }
    }
}

/// Integer >= 1 from a number or numeric string.
pub fn coerce_max_iterations(value: &Value) -> Option<usize> {
    let n = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    usize::try_from(n).ok().filter(|n| *n >= 1)
}

impl AgentSpec {
    pub fn parse(
        node_id: &str,
        data: &Map<String, Value>,
        default_max_iterations: usize,
    ) -> Result<Self, BuildError> {
        log_unknown_keys(node_id, data, AGENT_KEYS);
        let mut r = Reader::new(data);

        let name = r.string(AGENT_KEYS[0], "New Agent");
        let role = r.string(AGENT_KEYS[1], "Default Role");
        let goal = r.string(AGENT_KEYS[2], "Default Goal");
        let backstory = r.string(AGENT_KEYS[3], "Default Backstory");
        let model = r.optional_string(AGENT_KEYS[4]);
        let temperature = parse_temperature(&mut r);
        let allow_delegation = r.flag(AGENT_KEYS[7], false);
        let verbose = r.flag(AGENT_KEYS[8], false);
        let cache = r.flag(AGENT_KEYS[9], true);

        let max_iterations = match lookup(data, AGENT_KEYS[6]) {
            None => default_max_iterations,
            Some((key, value)) => coerce_max_iterations(value).unwrap_or_else(|| {
                warn!(
                    node_id,
                    key,
                    value = %value,
                    fallback = default_max_iterations,
                    "Invalid max iterations, using default"
                );
                default_max_iterations
            }),
        };

        if !r.errors.is_empty() {
            return Err(BuildError::InvalidAgentData {
                node_id: node_id.to_string(),
                errors: r.errors,
            });
        }

        Ok(Self {
            name,
            role,
            goal,
            backstory,
            model,
            temperature,
            max_iterations,
            allow_delegation,
            verbose,
            cache,
        })
    }
}

impl TaskSpec {
    pub fn parse(node_id: &str, data: &Map<String, Value>) -> Result<Self, BuildError> {
        log_unknown_keys(node_id, data, TASK_KEYS);
        let mut r = Reader::new(data);
        let name = r.string(TASK_KEYS[0], "New Task");
        let description = r.string(TASK_KEYS[1], "Default Task Description");
        let expected_output = r.string(TASK_KEYS[2], "Default Expected Output");

        if !r.errors.is_empty() {
            return Err(BuildError::InvalidTaskData {
                node_id: node_id.to_string(),
                errors: r.errors,
            });
        }
        Ok(Self {
            name,
            description,
            expected_output,
        })
    }
}

impl ToolNodeSpec {
    pub fn parse(node_id: &str, data: &Map<String, Value>) -> Result<Self, BuildError> {
        log_unknown_keys(node_id, data, TOOL_KEYS);
        let mut r = Reader::new(data);

        let tool = match lookup(data, TOOL_KEYS[0]) {
            None => {
                r.errors.push(FieldError::new("tool_name", "field required"));
                None
            }
            Some((key, value)) => {
                let parsed = ToolRef::from_value(value);
                if parsed.is_none() {
                    r.errors.push(FieldError::new(
                        key,
                        "must be a tool id or a positive numeric alias",
                    ));
                }
                parsed
            }
        };
        let config_params = r.object("config_params");
        let tool_inputs = r.object("tool_inputs");

        match tool {
            Some(tool) if r.errors.is_empty() => Ok(Self {
                tool,
                config_params,
                tool_inputs,
            }),
            _ => Err(BuildError::InvalidToolData {
                node_id: node_id.to_string(),
                errors: r.errors,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn agent_accepts_wire_names_and_aliases() {
        let spec = AgentSpec::parse(
            "a1",
            &map(json!({
                "agent_name": "Scout",
                "role": "Researcher",
                "agent_goal": "Find facts",
                "backstory": "Curious",
                "llm_provider_model": "anthropic.claude-3-haiku",
                "agent_temperature": 0.2,
                "agent_iteration": "7",
                "allow_delegation": true,
                "label": "ui only"
            })),
            25,
        )
        .unwrap();
        assert_eq!(spec.name, "Scout");
        assert_eq!(spec.role, "Researcher");
        assert_eq!(spec.backstory, "Curious");
        assert_eq!(spec.model.as_deref(), Some("anthropic.claude-3-haiku"));
        assert_eq!(spec.temperature, Some(0.2));
        assert_eq!(spec.max_iterations, 7);
        assert!(spec.allow_delegation);
        assert!(spec.cache);
        assert!(!spec.verbose);
    }

    #[test]
    fn agent_defaults_when_fields_missing() {
        let spec = AgentSpec::parse("a1", &Map::new(), 25).unwrap();
        assert_eq!(spec.name, "New Agent");
        assert_eq!(spec.max_iterations, 25);
        assert_eq!(spec.model, None);
        assert_eq!(spec.temperature, None);
    }

    #[test]
    fn bad_max_iterations_falls_back() {
        for bad in [json!("lots"), json!(0), json!(-3), json!(2.5), json!([1])] {
            let spec = AgentSpec::parse("a1", &map(json!({ "agent_max_iter": bad })), 25).unwrap();
            assert_eq!(spec.max_iterations, 25);
        }
        let spec = AgentSpec::parse("a1", &map(json!({ "max_iter": 3 })), 25).unwrap();
        assert_eq!(spec.max_iterations, 3);
    }

    #[test]
    fn agent_field_errors_are_collected() {
        let err = AgentSpec::parse(
            "a1",
            &map(json!({ "agent_role": 5, "agent_temperature": 1.5, "agent_verbose": "loud" })),
            25,
        )
        .unwrap_err();
        match err {
            BuildError::InvalidAgentData { node_id, errors } => {
                assert_eq!(node_id, "a1");
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["agent_role", "agent_temperature", "agent_verbose"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn task_parses_expected_output_alias() {
        let spec = TaskSpec::parse(
            "t1",
            &map(json!({ "name": "Summarize", "description": "Sum it", "expected_output": "Bullets" })),
        )
        .unwrap();
        assert_eq!(spec.name, "Summarize");
        assert_eq!(spec.expected_output, "Bullets");

        let err = TaskSpec::parse("t1", &map(json!({ "task_description": ["x"] }))).unwrap_err();
        assert!(matches!(err, BuildError::InvalidTaskData { .. }));
    }

    #[test]
    fn tool_requires_identifier() {
        let err = ToolNodeSpec::parse("x", &map(json!({ "config_params": {} }))).unwrap_err();
        match err {
            BuildError::InvalidToolData { errors, .. } => assert_eq!(errors[0].field, "tool_name"),
            other => panic!("unexpected {other:?}"),
        }
        let err = ToolNodeSpec::parse("x", &map(json!({ "tool_name": "web_search", "tool_inputs": "q" })))
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidToolData { .. }));
    }

    #[test]
    fn tool_accepts_alias_and_maps() {
        let spec = ToolNodeSpec::parse(
            "x",
            &map(json!({
                "tool_id": 9,
                "config_params": { "website_url": "https://example.com" },
                "tool_inputs": { "query": "rust" }
            })),
        )
        .unwrap();
        assert_eq!(spec.tool, ToolRef::Alias(9));
        assert_eq!(spec.config_params["website_url"], "https://example.com");
        assert_eq!(spec.tool_inputs["query"], "rust");
    }

    #[test]
    fn dispatches_on_node_kind() {
        let node = WorkflowNode::new("t", NodeKind::Task).with_data(json!({ "task_name": "T" }));
        assert!(matches!(NodeData::parse(&node, 25), Ok(NodeData::Task(_))));
    }
}
