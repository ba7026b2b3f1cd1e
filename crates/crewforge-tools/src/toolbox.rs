use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crewforge_core::error::CrewForgeError;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult, ToolSpec};

/// The tools owned by one agent, invoked by model-facing name.
///
/// Invocation never fails: timeouts, errors, and unknown names all come
/// back as error text for the model to react to.
pub struct Toolbox {
    tools: Vec<(String, Arc<dyn Tool>)>,
    timeout_cap: Option<Duration>,
    max_output_chars: usize,
    cache: Option<Mutex<HashMap<String, ToolResult>>>,
}

impl Toolbox {
    /// Duplicate tool names get a numeric suffix (`search`, `search_2`).
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut named: Vec<(String, Arc<dyn Tool>)> = Vec::with_capacity(tools.len());
        for tool in tools {
            let base = tool.name().to_string();
            let mut name = base.clone();
            let mut n = 2;
            while named.iter().any(|(existing, _)| *existing == name) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            named.push((name, tool));
        }
        Self {
            tools: named,
            timeout_cap: None,
            max_output_chars: usize::MAX,
            cache: None,
        }
    }

    /// Cap every tool's own timeout.
    pub fn with_timeout_cap(mut self, secs: u64) -> Self {
        self.timeout_cap = Some(Duration::from_secs(secs));
        self
    }

    pub fn with_max_output_chars(mut self, chars: usize) -> Self {
        self.max_output_chars = chars;
        self
    }

    /// Reuse the first result of identical calls.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(|| Mutex::new(HashMap::new()));
        self
    }

    /// Forget cached results, e.g. between tasks.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Ok(mut c) = cache.lock() {
                c.clear();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolSpec {
                name: name.clone(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "Model requested unknown tool");
            return ToolResult::error(format!(
                "Tool '{}' is not available. Available tools: {}",
                name,
                self.names().join(", ")
            ));
        };

        let cache_key = format!("{}:{}", name, input);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().ok().and_then(|c| c.get(&cache_key).cloned()) {
                debug!(tool = name, "Tool cache hit");
                return hit;
            }
        }

        let mut timeout = Duration::from_secs(tool.timeout_secs());
        if let Some(cap) = self.timeout_cap {
            timeout = timeout.min(cap);
        }

        let result = match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "Tool failed");
                ToolResult::error(describe_failure(name, &e))
            }
            Err(_) => {
                let e = CrewForgeError::ToolTimeout {
                    tool: name.to_string(),
                    timeout_secs: timeout.as_secs(),
                };
                warn!(tool = name, error = %e, "Tool timed out");
                ToolResult::error(e.to_string())
            }
        };

        let result = ToolResult {
            content: truncate_chars(&result.content, self.max_output_chars),
            is_error: result.is_error,
        };

        if let Some(cache) = &self.cache {
            if !result.is_error {
                if let Ok(mut c) = cache.lock() {
                    c.insert(cache_key, result.clone());
                }
            }
        }
        result
    }
}

fn describe_failure(name: &str, e: &CrewForgeError) -> String {
    match e {
        CrewForgeError::ToolValidation(msg) => {
            format!("Tool '{}' rejected its input: {}", name, msg)
        }
        other => format!("Tool '{}' failed: {}", name, other),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n...[truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
