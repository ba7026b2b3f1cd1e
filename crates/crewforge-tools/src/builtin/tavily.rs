use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::{exec_err, parse_input};

const TAVILY_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS: u64 = 10;

/// Professional/personal detail search through Tavily.
pub struct TavilySearchTool {
    api_key: String,
    http: reqwest::Client,
}

impl TavilySearchTool {
    pub fn new(api_key: String, http: reqwest::Client) -> Self {
        Self { api_key, http }
    }
}

#[derive(Deserialize)]
struct TavilyInput {
    query: String,
}

pub(crate) async fn search(
    http: &reqwest::Client,
    api_key: &str,
    tool: &str,
    query: &str,
) -> Result<String> {
    let resp = http
        .post(TAVILY_URL)
        .json(&json!({
            "api_key": api_key,
            "query": query,
            "max_results": MAX_RESULTS,
        }))
        .send()
        .await
        .map_err(|e| exec_err(tool, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(exec_err(tool, format!("Tavily returned HTTP {}", status)));
    }
    let body: Value = resp.json().await.map_err(|e| exec_err(tool, e))?;
    Ok(format_results(&body))
}

pub(crate) fn format_results(body: &Value) -> String {
    match body["results"].as_array() {
        Some(results) if !results.is_empty() => results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "Result {}:\nURL: {}\nContent: {}\n",
                    i + 1,
                    r["url"].as_str().unwrap_or(""),
                    r["content"].as_str().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "No results found.".to_string(),
    }
}

impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        "Runs a professional/personal detail search via Tavily."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What you want to know" }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: TavilyInput = parse_input(input)?;
            let text = search(&self.http, &self.api_key, self.name(), &p.query).await?;
            Ok(ToolResult::success(text))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_results() {
        let body = json!({"results": [
            {"url": "https://a", "content": "alpha"},
            {"url": "https://b", "content": "beta"}
        ]});
        let text = format_results(&body);
        assert_eq!(
            text,
            "Result 1:\nURL: https://a\nContent: alpha\n\nResult 2:\nURL: https://b\nContent: beta\n"
        );
    }

    #[test]
    fn no_results() {
        assert_eq!(format_results(&json!({"results": []})), "No results found.");
    }
}
