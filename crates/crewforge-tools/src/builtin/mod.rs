pub mod csv_search;
pub mod email;
pub mod evaluate_summary;
pub mod file_reader;
pub mod github_search;
pub mod serper;
pub mod tavily;
pub mod web_search;
pub mod website_scraper;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;

use crewforge_core::error::{CrewForgeError, Result};
use crewforge_core::traits::Tool;

use crate::definition::{ParamSchema, ParamType};
use crate::env::ConstructError;
use crate::registry::{config_str, ToolConstructor, ToolEntry};

pub use csv_search::CsvSearchTool;
pub use email::EmailSenderTool;
pub use evaluate_summary::EvaluateSummaryTool;
pub use file_reader::FileReaderTool;
pub use github_search::GithubSearchTool;
pub use serper::SerperSearchTool;
pub use tavily::TavilySearchTool;
pub use web_search::WebSearchTool;
pub use website_scraper::WebsiteScraperTool;

pub(crate) fn exec_err(tool: &str, e: impl std::fmt::Display) -> CrewForgeError {
    CrewForgeError::ToolExecution {
        tool: tool.to_string(),
        message: e.to_string(),
    }
}

pub(crate) fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| CrewForgeError::ToolValidation(e.to_string()))
}

fn shared<T: Tool + 'static>(tool: T) -> Arc<dyn Tool> {
    Arc::new(tool)
}

fn upload_button() -> ParamSchema {
    ParamSchema::new(
        "upload_button",
        ParamType::FileUpload,
        "Upload File",
        false,
        "Upload a file from your computer",
    )
}

/// Every built-in registry entry.
pub fn entries() -> Vec<ToolEntry> {
    vec![
        ToolEntry::new(
            "CsvSearchTool",
            "CsvSearchTool",
            "A tool that can be used to semantic search a query from a CSV's content.",
            ToolConstructor::fixed(|env| Ok(shared(CsvSearchTool::new(env.llm.clone())))),
        )
        .with_parameters(vec![
            ParamSchema::new("file_path", ParamType::Text, "CSV File Path", true, "Path to the CSV file"),
            ParamSchema::new("prompt", ParamType::Text, "Search Query", true, "What to look for in the CSV"),
            upload_button().with_accept(".csv"),
        ]),
        ToolEntry::new(
            "EmailSenderTool",
            "Email Sender",
            "Sends a real email to the recipient.",
            ToolConstructor::fixed(|env| {
                let config = env.email.clone().ok_or_else(|| {
                    ConstructError::missing("email", "set [email] api_url and from_address")
                })?;
                Ok(shared(EmailSenderTool::new(config, env.http.clone())))
            }),
        )
        .with_parameters(vec![
            ParamSchema::new("recipient", ParamType::Text, "Recipient Email", true, "Email address of the recipient"),
            ParamSchema::new("subject", ParamType::Text, "Subject", true, "Email subject line"),
            ParamSchema::new("body", ParamType::TextArea, "Email Body", true, "Plain text email body content"),
        ]),
        ToolEntry::new(
            "EvaluateSummaryTool",
            "Evaluate Summarization",
            "Evaluates summary quality against the original transcript using BLEU and ROUGE metrics.",
            ToolConstructor::fixed(|_| Ok(shared(EvaluateSummaryTool))),
        )
        .with_parameters(vec![
            ParamSchema::new("transcript", ParamType::TextArea, "Transcript", true, "Original transcript text to compare against"),
            ParamSchema::new("summary", ParamType::TextArea, "Summary", true, "Generated summary to evaluate"),
        ]),
        ToolEntry::new(
            "FILEReaderTool",
            "FILEReaderTool",
            "Reads a document from a path or URL and returns its text.",
            ToolConstructor::fixed(|env| Ok(shared(FileReaderTool::new(env.http.clone())))),
        )
        .with_parameters(vec![
            ParamSchema::new("file_path", ParamType::Text, "File Path", true, "Path or URL of the file to read"),
            upload_button().with_accept(".pdf,.txt,.md,.html"),
        ]),
        ToolEntry::new(
            "TavilyTool",
            "Tavily Search Tool",
            "Searches the web with Tavily and returns the top results.",
            ToolConstructor::fixed(|env| {
                let key = env
                    .credentials
                    .tavily()
                    .ok_or_else(|| ConstructError::missing("TAVILY_API_KEY", "set credentials.tavily_api_key or TAVILY_API_KEY"))?;
                Ok(shared(TavilySearchTool::new(key, env.http.clone())))
            }),
        )
        .with_parameters(vec![ParamSchema::new(
            "query",
            ParamType::Text,
            "Search Query",
            false,
            "Query to search for; filled from the run prompt when empty",
        )]),
        ToolEntry::new(
            "github_search_tool",
            "GitHub Search Tool",
            "Searches code, issues and pull requests in a GitHub repository.",
            ToolConstructor::configurable(&["github_repo", "content_types"], |params, env| {
                Ok(shared(GithubSearchTool::from_params(
                    params,
                    env.credentials.github(),
                    env.http.clone(),
                )?))
            }),
        )
        .with_parameters(vec![
            ParamSchema::new("github_repo", ParamType::Text, "Repository", true, "Repository as owner/name"),
            ParamSchema::new("content_types", ParamType::Text, "Content Types", false, "Comma-separated: code, issue, pr, repo")
                .with_default(json!("code,issue,pr")),
        ]),
        ToolEntry::new(
            "serper_dev_tool",
            "Serper Search",
            "Searches the internet with Serper and returns the top results.",
            ToolConstructor::fixed(|env| {
                let key = env
                    .credentials
                    .serper()
                    .ok_or_else(|| ConstructError::missing("SERPER_API_KEY", "set credentials.serper_api_key or SERPER_API_KEY"))?;
                Ok(shared(SerperSearchTool::new(key, env.http.clone())))
            }),
        ),
        ToolEntry::new(
            "web_search",
            "Web Search",
            "Searches the web with the chosen engine.",
            ToolConstructor::fixed(|env| {
                Ok(shared(WebSearchTool::new(
                    env.credentials.serper(),
                    env.credentials.tavily(),
                    env.http.clone(),
                )))
            }),
        )
        .with_parameters(vec![
            ParamSchema::new("query", ParamType::Text, "Search Query", false, "Filled from the run prompt when empty"),
            ParamSchema::new("engine", ParamType::Select, "Search Engine", false, "Backend to search with")
                .with_options(&["serper", "tavily"])
                .with_default(json!("serper")),
        ]),
        ToolEntry::new(
            "website_scraper",
            "Website Scraper",
            "Scrapes the readable text content of a website.",
            ToolConstructor::configurable(&["website_url"], |params, env| {
                Ok(shared(WebsiteScraperTool::new(
                    config_str(params, "website_url"),
                    env.http.clone(),
                )?))
            }),
        )
        .with_parameters(vec![ParamSchema::new(
            "website_url",
            ParamType::Text,
            "Website URL",
            false,
            "Fixed page to scrape; leave empty to let the agent choose",
        )]),
    ]
}
