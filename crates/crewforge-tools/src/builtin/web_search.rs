use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::{parse_input, serper, tavily};

/// Web search with a per-call choice of backend.
pub struct WebSearchTool {
    serper_key: Option<String>,
    tavily_key: Option<String>,
    http: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(
        serper_key: Option<String>,
        tavily_key: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            serper_key,
            tavily_key,
            http,
        }
    }

    /// Requested engine, or whichever backend has a key.
    fn pick_engine<'a>(&self, requested: Option<&'a str>) -> Option<&'a str> {
        match requested.map(str::trim).filter(|e| !e.is_empty()) {
            Some(engine) => Some(engine),
            None if self.serper_key.is_some() => Some("serper"),
            None if self.tavily_key.is_some() => Some("tavily"),
            None => None,
        }
    }
}

#[derive(Deserialize)]
struct WebSearchInput {
    #[serde(alias = "search_query")]
    query: String,
    #[serde(default)]
    engine: Option<String>,
}

impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Engine may be 'serper' (Google) or 'tavily'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "engine": {
                    "type": "string",
                    "enum": ["serper", "tavily"],
                    "description": "Search backend (default: whichever is configured)"
                }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: WebSearchInput = parse_input(input)?;
            let engine = self.pick_engine(p.engine.as_deref()).map(str::to_ascii_lowercase);
            let text = match (engine.as_deref(), &self.serper_key, &self.tavily_key) {
                (Some("serper") | Some("google"), Some(key), _) => {
                    serper::search(&self.http, key, self.name(), &p.query).await?
                }
                (Some("tavily"), _, Some(key)) => {
                    tavily::search(&self.http, key, self.name(), &p.query).await?
                }
                (Some(other), _, _) => {
                    return Ok(ToolResult::error(format!(
                        "Search engine '{}' is unknown or has no API key configured",
                        other
                    )))
                }
                (None, _, _) => {
                    return Err(CrewForgeError::ToolExecution {
                        tool: self.name().to_string(),
                        message: "no search engine is configured".to_string(),
                    })
                }
            };
            Ok(ToolResult::success(text))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(serper: bool, tavily: bool) -> WebSearchTool {
        WebSearchTool::new(
            serper.then(|| "s".to_string()),
            tavily.then(|| "t".to_string()),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn engine_defaults_to_configured_backend() {
        assert_eq!(tool(true, true).pick_engine(None), Some("serper"));
        assert_eq!(tool(false, true).pick_engine(Some(" ")), Some("tavily"));
        assert_eq!(tool(false, false).pick_engine(None), None);
        assert_eq!(tool(true, false).pick_engine(Some("tavily")), Some("tavily"));
    }

    #[tokio::test]
    async fn engine_without_key_is_reported() {
        let result = tool(true, false)
            .execute(json!({"query": "rust", "engine": "tavily"}), ToolContext::default())
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("tavily"));
    }
}
