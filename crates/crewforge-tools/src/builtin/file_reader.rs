use std::path::Path;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::website_scraper::html_to_text;
use super::{exec_err, parse_input};

/// Reads a local file or an http(s) URL and returns its text.
pub struct FileReaderTool {
    http: reqwest::Client,
}

impl FileReaderTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Deserialize)]
struct FileReaderInput {
    #[serde(alias = "pdf_path", alias = "path")]
    file_path: String,
}

/// Text of a byte buffer, or `None` when it looks binary.
pub(crate) fn decode_text(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(8192)];
    if head.contains(&0) {
        return None;
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}

fn looks_like_html(path: &str, content: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".html")
        || lower.ends_with(".htm")
        || content.trim_start().to_ascii_lowercase().starts_with("<!doctype html")
}

impl FileReaderTool {
    async fn read_bytes(&self, location: &str) -> std::result::Result<Vec<u8>, String> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let resp = self
                .http
                .get(location)
                .send()
                .await
                .map_err(|e| format!("Could not download {}: {}", location, e))?;
            if !resp.status().is_success() {
                return Err(format!("Could not download {}: HTTP {}", location, resp.status()));
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| format!("Could not download {}: {}", location, e))?;
            return Ok(bytes.to_vec());
        }

        let path = Path::new(location);
        if !path.exists() {
            return Err(format!("File not found: {}", location));
        }
        tokio::fs::read(path)
            .await
            .map_err(|e| format!("Could not read {}: {}", location, e))
    }
}

impl Tool for FileReaderTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text document from a local path or URL and returns its contents."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Local path or http(s) URL of the file" }
            },
            "required": ["file_path"]
        })
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: FileReaderInput = parse_input(input)?;
            debug!(file = %p.file_path, "Reading file");

            let bytes = match self.read_bytes(&p.file_path).await {
                Ok(b) => b,
                Err(message) => return Ok(ToolResult::error(message)),
            };
            let Some(text) = decode_text(&bytes) else {
                return Err(exec_err(
                    self.name(),
                    format!("{} is a binary file and cannot be read as text", p.file_path),
                ));
            };
            if looks_like_html(&p.file_path, &text) {
                return Ok(ToolResult::success(html_to_text(&text)));
            }
            Ok(ToolResult::success(text))
        })
    }
}
