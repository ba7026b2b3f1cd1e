use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::{exec_err, parse_input};

const SERPER_URL: &str = "https://google.serper.dev/search";
const MAX_RESULTS: usize = 5;

/// Google search through the Serper API.
pub struct SerperSearchTool {
    api_key: String,
    http: reqwest::Client,
}

impl SerperSearchTool {
    pub fn new(api_key: String, http: reqwest::Client) -> Self {
        Self { api_key, http }
    }
}

#[derive(Deserialize)]
struct SerperInput {
    #[serde(alias = "query")]
    search_query: String,
}

/// Run a Serper query and render the organic results.
pub(crate) async fn search(
    http: &reqwest::Client,
    api_key: &str,
    tool: &str,
    query: &str,
) -> Result<String> {
    let resp = http
        .post(SERPER_URL)
        .header("X-API-KEY", api_key)
        .json(&json!({ "q": query }))
        .send()
        .await
        .map_err(|e| exec_err(tool, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(exec_err(tool, format!("Serper returned HTTP {}", status)));
    }
    let body: Value = resp.json().await.map_err(|e| exec_err(tool, e))?;
    Ok(format_results(&body))
}

pub(crate) fn format_results(body: &Value) -> String {
    let results = body["organic"].as_array().map(Vec::as_slice).unwrap_or_default();
    if results.is_empty() {
        return "No results found.".to_string();
    }
    results
        .iter()
        .take(MAX_RESULTS)
        .enumerate()
        .map(|(i, r)| {
            format!(
                "Result {}:\nTitle: {}\nLink: {}\nSnippet: {}\n",
                i + 1,
                r["title"].as_str().unwrap_or(""),
                r["link"].as_str().unwrap_or(""),
                r["snippet"].as_str().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Tool for SerperSearchTool {
    fn name(&self) -> &str {
        "serper_search"
    }

    fn description(&self) -> &str {
        "Runs a Google search using the Serper API and returns the top results with snippets."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_query": {
                    "type": "string",
                    "description": "Search query to run on the internet"
                }
            },
            "required": ["search_query"]
        })
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: SerperInput = parse_input(input)?;
            let text = search(&self.http, &self.api_key, self.name(), &p.search_query).await?;
            Ok(ToolResult::success(text))
        })
    }
}
