use std::sync::OnceLock;

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::{exec_err, parse_input};
use crate::env::ConstructError;

/// Fetches a page and returns its readable text.
///
/// When built with a `website_url` the tool always scrapes that page.
pub struct WebsiteScraperTool {
    fixed_url: Option<String>,
    http: reqwest::Client,
}

impl WebsiteScraperTool {
    pub fn new(fixed_url: Option<String>, http: reqwest::Client) -> std::result::Result<Self, ConstructError> {
        if let Some(url) = &fixed_url {
            if !is_http_url(url) {
                return Err(ConstructError::Invalid(format!(
                    "website_url must start with http:// or https://, got '{}'",
                    url
                )));
            }
        }
        Ok(Self { fixed_url, http })
    }
}

#[derive(Deserialize, Default)]
struct ScrapeInput {
    #[serde(default, alias = "url")]
    website_url: Option<String>,
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

struct HtmlPatterns {
    blocks: Regex,
    breaks: Regex,
    tags: Regex,
    blank_lines: Regex,
    spaces: Regex,
}

fn patterns() -> &'static HtmlPatterns {
    static PATTERNS: OnceLock<HtmlPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HtmlPatterns {
        blocks: Regex::new(r"(?is)<(script|style|noscript|svg)[^>]*>.*?</(script|style|noscript|svg)>")
            .expect("valid html pattern"),
        breaks: Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr)[^>]*>").expect("valid html pattern"),
        tags: Regex::new(r"<[^>]+>").expect("valid html pattern"),
        blank_lines: Regex::new(r"\n\s*\n(\s*\n)+").expect("valid html pattern"),
        spaces: Regex::new(r"[ \t\u{a0}]+").expect("valid html pattern"),
    })
}

/// Reduce an HTML document to plain text.
pub(crate) fn html_to_text(html: &str) -> String {
    let p = patterns();
    let text = p.blocks.replace_all(html, "");
    let text = p.breaks.replace_all(&text, "\n");
    let text = p.tags.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    let text = p.spaces.replace_all(&text, " ");
    let text = p.blank_lines.replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

impl Tool for WebsiteScraperTool {
    fn name(&self) -> &str {
        "scrape_website"
    }

    fn description(&self) -> &str {
        "Scrapes the readable text content of a website."
    }

    fn input_schema(&self) -> Value {
        if self.fixed_url.is_some() {
            json!({ "type": "object", "properties": {} })
        } else {
            json!({
                "type": "object",
                "properties": {
                    "website_url": { "type": "string", "description": "Full URL of the page to scrape" }
                },
                "required": ["website_url"]
            })
        }
    }

    fn timeout_secs(&self) -> u64 {
        60
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: ScrapeInput = if input.is_null() {
                ScrapeInput::default()
            } else {
                parse_input(input)?
            };
            let Some(url) = self.fixed_url.clone().or(p.website_url) else {
                return Ok(ToolResult::error("website_url is required"));
            };
            if !is_http_url(&url) {
                return Ok(ToolResult::error(format!("Not an http(s) URL: {}", url)));
            }

            debug!(url = %url, "Scraping website");
            let resp = self
                .http
                .get(&url)
                .header("User-Agent", "Mozilla/5.0 (compatible; crewforge)")
                .send()
                .await
                .map_err(|e| exec_err(self.name(), e))?;
            let status = resp.status();
            if !status.is_success() {
                return Ok(ToolResult::error(format!("HTTP {} fetching {}", status, url)));
            }
            let body = resp.text().await.map_err(|e| exec_err(self.name(), e))?;
            Ok(ToolResult::success(format!(
                "Content of {}:\n{}",
                url,
                html_to_text(&body)
            )))
        })
    }
}
