use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crewforge_core::error::BuildError;
use crewforge_core::traits::Tool;

use crate::definition::{ParamSchema, ToolDefinition};
use crate::env::{ConstructError, ToolEnv};

/// Static configuration from a tool node's `config_params`.
pub type ConfigParams = serde_json::Map<String, serde_json::Value>;

type FixedFn = dyn Fn(&ToolEnv) -> Result<Arc<dyn Tool>, ConstructError> + Send + Sync;
type ConfigurableFn =
    dyn Fn(&ConfigParams, &ToolEnv) -> Result<Arc<dyn Tool>, ConstructError> + Send + Sync;

/// How a registry entry builds its tool.
///
/// Only `Configurable` constructors receive `config_params`.
#[derive(Clone)]
pub enum ToolConstructor {
    Fixed(Arc<FixedFn>),
    Configurable {
        accepts: Vec<String>,
        build: Arc<ConfigurableFn>,
    },
}

impl ToolConstructor {
    pub fn fixed<F>(f: F) -> Self
    where
        F: Fn(&ToolEnv) -> Result<Arc<dyn Tool>, ConstructError> + Send + Sync + 'static,
    {
        Self::Fixed(Arc::new(f))
    }

    pub fn configurable<F>(accepts: &[&str], f: F) -> Self
    where
        F: Fn(&ConfigParams, &ToolEnv) -> Result<Arc<dyn Tool>, ConstructError>
            + Send
            + Sync
            + 'static,
    {
        Self::Configurable {
            accepts: accepts.iter().map(|a| a.to_string()).collect(),
            build: Arc::new(f),
        }
    }

    pub fn accepts_config(&self) -> bool {
        matches!(self, Self::Configurable { .. })
    }

    /// Constructor shape as shown in catalogs and error messages.
    pub fn shape(&self) -> String {
        match self {
            Self::Fixed(_) => "fixed()".to_string(),
            Self::Configurable { accepts, .. } => format!("configurable({})", accepts.join(", ")),
        }
    }
}

#[derive(Clone)]
pub struct ToolEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters: Option<Vec<ParamSchema>>,
    pub constructor: ToolConstructor,
}

impl ToolEntry {
    pub fn new(id: &str, name: &str, description: &str, constructor: ToolConstructor) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters: None,
            constructor,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ParamSchema>) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// A tool identifier as written in node data: a string id or a numeric alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRef {
    Id(String),
    Alias(u32),
}

impl ToolRef {
    /// Accepts JSON numbers, numeric strings, and plain ids.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).map(Self::Alias),
            serde_json::Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        Some(match s.parse::<u32>() {
            Ok(n) => Self::Alias(n),
            Err(_) => Self::Id(s.to_string()),
        })
    }
}

impl From<&str> for ToolRef {
    fn from(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| Self::Id(String::new()))
    }
}

impl std::fmt::Display for ToolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Alias(n) => write!(f, "{}", n),
        }
    }
}

/// Immutable catalog of tool constructors with numeric aliases.
///
/// Aliases are the 1-based positions of the ids in sorted order. The table
/// is rebuilt whenever a registry value is constructed, so a shared
/// registry never changes underneath its readers.
pub struct ToolRegistry {
    entries: BTreeMap<String, ToolEntry>,
    aliases: Vec<String>,
}

impl ToolRegistry {
    pub fn new(entries: impl IntoIterator<Item = ToolEntry>) -> Self {
        let entries: BTreeMap<String, ToolEntry> =
            entries.into_iter().map(|e| (e.id.clone(), e)).collect();
        let aliases = entries.keys().cloned().collect();
        Self { entries, aliases }
    }

    /// Registry with every built-in tool.
    pub fn with_builtins() -> Self {
        Self::new(crate::builtin::entries())
    }

    /// A new registry with `entry` added or replaced.
    pub fn with_entry(self, entry: ToolEntry) -> Self {
        let mut entries = self.entries;
        entries.insert(entry.id.clone(), entry);
        Self::new(entries.into_values())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical ids in alias order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.aliases.iter().map(String::as_str)
    }

    /// Canonical id for an id or alias.
    pub fn resolve(&self, tool: &ToolRef) -> Option<&str> {
        match tool {
            ToolRef::Id(id) => self.entries.get_key_value(id).map(|(k, _)| k.as_str()),
            ToolRef::Alias(n) => {
                let idx = usize::try_from(*n).ok()?.checked_sub(1)?;
                self.aliases.get(idx).map(String::as_str)
            }
        }
    }

    pub fn alias_of(&self, id: &str) -> Option<u32> {
        self.aliases
            .binary_search_by(|a| a.as_str().cmp(id))
            .ok()
            .and_then(|idx| u32::try_from(idx + 1).ok())
    }

    pub fn entry(&self, tool: &ToolRef) -> Option<&ToolEntry> {
        self.resolve(tool).and_then(|id| self.entries.get(id))
    }

    pub fn definition(&self, tool: &ToolRef) -> Option<ToolDefinition> {
        let entry = self.entry(tool)?;
        Some(self.to_definition(entry))
    }

    /// Every tool, ordered by alias.
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.aliases
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| self.to_definition(e))
            .collect()
    }

    fn to_definition(&self, entry: &ToolEntry) -> ToolDefinition {
        ToolDefinition {
            alias: self.alias_of(&entry.id).unwrap_or_default(),
            id: entry.id.clone(),
            name: entry.name.clone(),
            description: entry.description.clone(),
            constructor: entry.constructor.shape(),
            parameters_schema: entry.parameters.clone(),
        }
    }

    /// Build a ready-to-invoke tool.
    pub fn instantiate(
        &self,
        tool: &ToolRef,
        config_params: &ConfigParams,
        env: &ToolEnv,
    ) -> Result<Arc<dyn Tool>, BuildError> {
        let entry = self
            .entry(tool)
            .ok_or_else(|| BuildError::UnknownTool(tool.to_string()))?;

        let built = match &entry.constructor {
            ToolConstructor::Fixed(build) => {
                if !config_params.is_empty() {
                    debug!(tool = %entry.id, "Ignoring config_params for fixed tool");
                }
                build(env)
            }
            ToolConstructor::Configurable { build, .. } => build(config_params, env),
        };

        built.map_err(|e| match e {
            ConstructError::MissingCredential { name, hint } => {
                BuildError::MissingCredential { name, hint }
            }
            ConstructError::Invalid(reason) => BuildError::ToolInstantiation {
                tool_id: entry.id.clone(),
                expected: entry.constructor.shape(),
                reason,
            },
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Read an optional non-empty string from config params.
pub fn config_str(params: &ConfigParams, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewforge_test_utils::RecordingTool;
    use serde_json::json;

    fn recording(id: &str) -> ToolEntry {
        ToolEntry::new(
            id,
            id,
            "test tool",
            ToolConstructor::fixed(|_| Ok(Arc::new(RecordingTool::new("rec")) as Arc<dyn Tool>)),
        )
    }

    #[test]
    fn builtin_aliases_follow_sorted_ids() {
        let registry = ToolRegistry::with_builtins();
        let ids: Vec<&str> = registry.ids().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(registry.alias_of("CsvSearchTool"), Some(1));
        assert_eq!(
            registry.resolve(&ToolRef::Alias(1)),
            Some("CsvSearchTool")
        );
        assert_eq!(registry.alias_of("website_scraper"), Some(registry.len() as u32));
    }

    #[test]
    fn alias_round_trips_for_every_id() {
        let registry = ToolRegistry::with_builtins();
        for id in registry.ids() {
            let alias = registry.alias_of(id).unwrap();
            assert_eq!(registry.resolve(&ToolRef::Alias(alias)), Some(id));
        }
        assert_eq!(registry.resolve(&ToolRef::Alias(0)), None);
        assert_eq!(
            registry.resolve(&ToolRef::Alias(registry.len() as u32 + 1)),
            None
        );
    }

    #[test]
    fn adding_an_entry_rebuilds_aliases() {
        let registry = ToolRegistry::new(vec![recording("b_tool"), recording("d_tool")]);
        assert_eq!(registry.alias_of("d_tool"), Some(2));
        let registry = registry.with_entry(recording("a_tool"));
        assert_eq!(registry.alias_of("a_tool"), Some(1));
        assert_eq!(registry.alias_of("d_tool"), Some(3));
    }

    #[test]
    fn tool_ref_parsing() {
        assert_eq!(ToolRef::from_value(&json!(3)), Some(ToolRef::Alias(3)));
        assert_eq!(ToolRef::from_value(&json!("7")), Some(ToolRef::Alias(7)));
        assert_eq!(
            ToolRef::from_value(&json!("serper_dev_tool")),
            Some(ToolRef::Id("serper_dev_tool".into()))
        );
        assert_eq!(ToolRef::from_value(&json!("")), None);
        assert_eq!(ToolRef::from_value(&json!(-1)), None);
        assert_eq!(ToolRef::from_value(&json!(true)), None);
    }

    #[test]
    fn list_definitions_is_alias_ordered() {
        let defs = ToolRegistry::with_builtins().list_definitions();
        for (i, d) in defs.iter().enumerate() {
            assert_eq!(d.alias as usize, i + 1);
        }
        let scraper = defs.iter().find(|d| d.id == "website_scraper").unwrap();
        assert_eq!(scraper.constructor, "configurable(website_url)");
        assert_eq!(scraper.name, "Website Scraper");
    }

    #[test]
    fn unknown_tool_is_configuration_error() {
        let registry = ToolRegistry::with_builtins();
        let err = registry
            .instantiate(&ToolRef::Id("nope".into()), &ConfigParams::new(), &ToolEnv::default())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::UnknownTool(ref id) if id == "nope"));
        let err = registry
            .instantiate(&ToolRef::Alias(99), &ConfigParams::new(), &ToolEnv::default())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::UnknownTool(ref id) if id == "99"));
    }

    #[test]
    fn configurable_constructor_receives_params() {
        let entry = ToolEntry::new(
            "cfg",
            "Cfg",
            "",
            ToolConstructor::configurable(&["target"], |params, _| {
                let target = config_str(params, "target")
                    .ok_or_else(|| ConstructError::Invalid("target is required".into()))?;
                Ok(Arc::new(RecordingTool::new(&target)) as Arc<dyn Tool>)
            }),
        );
        let registry = ToolRegistry::new(vec![entry]);
        let mut params = ConfigParams::new();
        params.insert("target".into(), json!("x"));
        let tool = registry
            .instantiate(&ToolRef::Id("cfg".into()), &params, &ToolEnv::default())
            .unwrap();
        assert_eq!(tool.name(), "x");

        let err = registry
            .instantiate(&ToolRef::Id("cfg".into()), &ConfigParams::new(), &ToolEnv::default())
            .err()
            .unwrap();
        match err {
            BuildError::ToolInstantiation { expected, reason, .. } => {
                assert_eq!(expected, "configurable(target)");
                assert_eq!(reason, "target is required");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_credential_maps_to_environment_error() {
        let registry = ToolRegistry::with_builtins();
        let mut env = ToolEnv::default();
        env.credentials.serper_api_key = Some("${UNSET_FOR_TEST}".into());
        std::env::remove_var("SERPER_API_KEY");
        let err = registry
            .instantiate(&ToolRef::Id("serper_dev_tool".into()), &ConfigParams::new(), &env)
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::MissingCredential { .. }));
    }
}
