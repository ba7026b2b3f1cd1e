use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::{exec_err, parse_input};
use crate::env::ConstructError;
use crate::registry::{config_str, ConfigParams};

const API_BASE: &str = "https://api.github.com";
const PER_TYPE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Code,
    Issue,
    Pr,
    Repo,
}

impl ContentType {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Some(Self::Code),
            "issue" | "issues" => Some(Self::Issue),
            "pr" | "prs" | "pull_request" => Some(Self::Pr),
            "repo" | "repository" => Some(Self::Repo),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Issue => "issue",
            Self::Pr => "pr",
            Self::Repo => "repo",
        }
    }
}

/// Searches code, issues and pull requests within one GitHub repository.
pub struct GithubSearchTool {
    repo: String,
    content_types: Vec<ContentType>,
    token: Option<String>,
    http: reqwest::Client,
    api_base: String,
}

impl GithubSearchTool {
    pub fn new(
        repo: String,
        content_types: Vec<ContentType>,
        token: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            repo,
            content_types,
            token,
            http,
            api_base: API_BASE.to_string(),
        }
    }

    /// Build from a tool node's `config_params`.
    pub fn from_params(
        params: &ConfigParams,
        token: Option<String>,
        http: reqwest::Client,
    ) -> std::result::Result<Self, ConstructError> {
        let repo = config_str(params, "github_repo")
            .ok_or_else(|| ConstructError::Invalid("github_repo is required".into()))?;
        let repo = repo
            .trim_start_matches("https://github.com/")
            .trim_end_matches('/')
            .to_string();
        if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
            return Err(ConstructError::Invalid(format!(
                "github_repo must look like owner/name, got '{}'",
                repo
            )));
        }
        let content_types = parse_content_types(params.get("content_types"))?;
        Ok(Self::new(repo, content_types, token, http))
    }
}

/// Accepts a comma-separated string or an array; defaults to code, issue, pr.
pub(crate) fn parse_content_types(
    value: Option<&Value>,
) -> std::result::Result<Vec<ContentType>, ConstructError> {
    let raw: Vec<String> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(String::from).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(String::from).ok_or_else(|| {
                    ConstructError::Invalid("content_types entries must be strings".into())
                })
            })
            .collect::<std::result::Result<_, _>>()?,
        Some(other) => {
            return Err(ConstructError::Invalid(format!(
                "content_types must be a string or list, got {}",
                other
            )))
        }
    };

    let mut types = Vec::new();
    for item in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let ty = ContentType::parse(item)
            .ok_or_else(|| ConstructError::Invalid(format!("Unknown content type '{}'", item)))?;
        if !types.contains(&ty) {
            types.push(ty);
        }
    }
    if types.is_empty() {
        types = vec![ContentType::Code, ContentType::Issue, ContentType::Pr];
    }
    Ok(types)
}

#[derive(Deserialize)]
struct GithubSearchInput {
    #[serde(alias = "query")]
    search_query: String,
}

impl GithubSearchTool {
    fn search_url(&self, ty: ContentType, query: &str) -> String {
        let (endpoint, q) = match ty {
            ContentType::Code => ("code", format!("{} repo:{}", query, self.repo)),
            ContentType::Issue => ("issues", format!("{} repo:{} type:issue", query, self.repo)),
            ContentType::Pr => ("issues", format!("{} repo:{} type:pr", query, self.repo)),
            ContentType::Repo => ("repositories", format!("{} repo:{}", query, self.repo)),
        };
        format!(
            "{}/search/{}?q={}&per_page={}",
            self.api_base,
            endpoint,
            urlencoding::encode(&q),
            PER_TYPE
        )
    }

    async fn search_one(&self, ty: ContentType, query: &str) -> std::result::Result<Vec<String>, String> {
        let mut req = self
            .http
            .get(self.search_url(ty, query))
            .header("User-Agent", "crewforge")
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }
        let body: Value = resp.json().await.map_err(|e| e.to_string())?;
        Ok(format_items(ty, &body))
    }
}

pub(crate) fn format_items(ty: ContentType, body: &Value) -> Vec<String> {
    let Some(items) = body.get("items").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .take(PER_TYPE)
        .map(|item| {
            let url = item["html_url"].as_str().unwrap_or("");
            match ty {
                ContentType::Code => format!("[code] {} ({})", item["path"].as_str().unwrap_or(""), url),
                ContentType::Repo => format!(
                    "[repo] {}: {} ({})",
                    item["full_name"].as_str().unwrap_or(""),
                    item["description"].as_str().unwrap_or(""),
                    url
                ),
                ContentType::Issue | ContentType::Pr => format!(
                    "[{}] #{} {} [{}] ({})",
                    ty.label(),
                    item["number"].as_u64().unwrap_or(0),
                    item["title"].as_str().unwrap_or(""),
                    item["state"].as_str().unwrap_or(""),
                    url
                ),
            }
        })
        .collect()
}

impl Tool for GithubSearchTool {
    fn name(&self) -> &str {
        "github_search"
    }

    fn description(&self) -> &str {
        "Searches code, issues and pull requests in a GitHub repository."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_query": { "type": "string", "description": "What to search for in the repository" }
            },
            "required": ["search_query"]
        })
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: GithubSearchInput = parse_input(input)?;
            let mut lines = Vec::new();
            let mut failures = Vec::new();

            for &ty in &self.content_types {
                if ty == ContentType::Code && self.token.is_none() {
                    debug!(repo = %self.repo, "Skipping code search without a GitHub token");
                    continue;
                }
                match self.search_one(ty, &p.search_query).await {
                    Ok(found) => lines.extend(found),
                    Err(e) => failures.push(format!("{} search failed: {}", ty.label(), e)),
                }
            }

            if lines.is_empty() && !failures.is_empty() {
                return Err(exec_err(self.name(), failures.join("; ")));
            }
            if lines.is_empty() {
                return Ok(ToolResult::success(format!(
                    "No results for '{}' in {}",
                    p.search_query, self.repo
                )));
            }
            lines.extend(failures);
            Ok(ToolResult::success(lines.join("\n")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(v: Value) -> ConfigParams {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn content_types_accept_string_or_list() {
        assert_eq!(
            parse_content_types(Some(&json!("code, issue"))).unwrap(),
            vec![ContentType::Code, ContentType::Issue]
        );
        assert_eq!(
            parse_content_types(Some(&json!(["pr", "repo", "pr"]))).unwrap(),
            vec![ContentType::Pr, ContentType::Repo]
        );
        assert_eq!(parse_content_types(None).unwrap().len(), 3);
        assert!(parse_content_types(Some(&json!("wiki"))).is_err());
        assert!(parse_content_types(Some(&json!(5))).is_err());
    }

    #[test]
    fn repo_is_validated() {
        let http = reqwest::Client::new();
        assert!(GithubSearchTool::from_params(&params(json!({})), None, http.clone()).is_err());
        assert!(GithubSearchTool::from_params(
            &params(json!({"github_repo": "just-a-name"})),
            None,
            http.clone()
        )
        .is_err());
        let tool = GithubSearchTool::from_params(
            &params(json!({"github_repo": "https://github.com/rust-lang/rust/"})),
            None,
            http,
        )
        .unwrap();
        assert_eq!(tool.repo, "rust-lang/rust");
    }

    #[test]
    fn search_url_scopes_to_repo() {
        let tool = GithubSearchTool::new("o/r".into(), vec![], None, reqwest::Client::new());
        let url = tool.search_url(ContentType::Pr, "flaky test");
        assert!(url.starts_with("https://api.github.com/search/issues?q="));
        assert!(url.contains("repo%3Ao%2Fr"));
        assert!(url.contains("type%3Apr"));
    }

    #[test]
    fn formats_issue_items() {
        let body = json!({"items": [
            {"number": 12, "title": "Crash on start", "state": "open", "html_url": "https://github.com/o/r/issues/12"}
        ]});
        let lines = format_items(ContentType::Issue, &body);
        assert_eq!(
            lines,
            vec!["[issue] #12 Crash on start [open] (https://github.com/o/r/issues/12)"]
        );
        assert!(format_items(ContentType::Code, &json!({})).is_empty());
    }

    #[tokio::test]
    async fn code_only_without_token_finds_nothing() {
        let tool = GithubSearchTool::new(
            "o/r".into(),
            vec![ContentType::Code],
            None,
            reqwest::Client::new(),
        );
        let result = tool
            .execute(json!({"search_query": "main"}), ToolContext::default())
            .await
            .unwrap();
        assert!(result.content.starts_with("No results"));
    }
}
