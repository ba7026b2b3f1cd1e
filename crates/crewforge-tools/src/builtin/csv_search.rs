use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::{exec_err, parse_input};
use crate::env::LlmHandle;

const MAX_ROWS_IN_CONTEXT: usize = 40;

/// Answers a question about a CSV file.
///
/// Rows are ranked by keyword overlap with the question. With a model
/// available the top rows are handed to it for an answer; otherwise the
/// matching rows are returned as-is.
pub struct CsvSearchTool {
    llm: Option<LlmHandle>,
}

impl CsvSearchTool {
    pub fn new(llm: Option<LlmHandle>) -> Self {
        Self { llm }
    }
}

#[derive(Deserialize)]
struct CsvSearchInput {
    #[serde(alias = "csv_path")]
    file_path: String,
    #[serde(alias = "query")]
    prompt: String,
}

#[derive(Debug, PartialEq)]
pub(crate) struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Split CSV text into records, honouring double-quoted fields. Quoted
/// fields may span lines. Blank lines are skipped.
fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', _) => in_quotes = !in_quotes,
            (',', false) => record.push(std::mem::take(&mut field).trim().to_string()),
            ('\r', false) => {}
            ('\n', false) => {
                record.push(std::mem::take(&mut field).trim().to_string());
                let fields = std::mem::take(&mut record);
                if !(fields.len() == 1 && fields[0].is_empty()) {
                    records.push(fields);
                }
            }
            _ => field.push(c),
        }
    }
    if !record.is_empty() || !field.trim().is_empty() {
        record.push(field.trim().to_string());
        records.push(record);
    }
    records
}

pub(crate) fn parse_csv(text: &str) -> Option<Table> {
    let mut records = split_records(text).into_iter();
    let headers = records.next()?;
    let rows = records.collect();
    Some(Table { headers, rows })
}

fn keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Indices of the rows most relevant to `question`, best first. Falls back
/// to the leading rows when nothing matches.
pub(crate) fn rank_rows(table: &Table, question: &str, limit: usize) -> Vec<usize> {
    let words = keywords(question);
    let mut scored: Vec<(usize, usize)> = table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let hay = row.join(" ").to_lowercase();
            (i, words.iter().filter(|w| hay.contains(w.as_str())).count())
        })
        .filter(|(_, score)| *score > 0)
        .collect();
    if scored.is_empty() {
        return (0..table.rows.len().min(limit)).collect();
    }
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(limit).map(|(i, _)| i).collect()
}

fn render(table: &Table, indices: &[usize]) -> String {
    let mut out = vec![table.headers.join(", ")];
    out.extend(indices.iter().map(|&i| table.rows[i].join(", ")));
    out.join("\n")
}

impl Tool for CsvSearchTool {
    fn name(&self) -> &str {
        "csv_search"
    }

    fn description(&self) -> &str {
        "Runs a question against a CSV file and returns the relevant rows or an answer."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Path to the CSV file" },
                "prompt": { "type": "string", "description": "Question to ask about the CSV" }
            },
            "required": ["file_path", "prompt"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        120
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: CsvSearchInput = parse_input(input)?;
            let text = match tokio::fs::read_to_string(&p.file_path).await {
                Ok(t) => t,
                Err(e) => {
                    return Ok(ToolResult::error(format!(
                        "Could not read CSV {}: {}",
                        p.file_path, e
                    )))
                }
            };
            let Some(table) = parse_csv(&text) else {
                return Ok(ToolResult::error("Empty CSV"));
            };

            let picked = rank_rows(&table, &p.prompt, MAX_ROWS_IN_CONTEXT);
            let excerpt = render(&table, &picked);
            debug!(file = %p.file_path, rows = table.rows.len(), picked = picked.len(), "CSV search");

            let Some(llm) = &self.llm else {
                return Ok(ToolResult::success(format!(
                    "{} rows in {}. Most relevant rows:\n{}",
                    table.rows.len(),
                    p.file_path,
                    excerpt
                )));
            };

            let answer = llm
                .complete(
                    "You answer questions about tabular data. Use only the rows provided.",
                    &format!(
                        "The CSV has {} rows with columns: {}.\nRelevant rows:\n{}\n\nQuestion: {}",
                        table.rows.len(),
                        table.headers.join(", "),
                        excerpt,
                        p.prompt
                    ),
                )
                .await
                .map_err(|e| exec_err(self.name(), e))?;
            Ok(ToolResult::success(answer))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SALES: &str = "region,product,total\nnorth,\"Widget, large\",120\nsouth,Gadget,80\n\neast,Widget,45\n";

    #[test]
    fn parses_quoted_fields_and_skips_blank_lines() {
        let table = parse_csv(SALES).unwrap();
        assert_eq!(table.headers, vec!["region", "product", "total"]);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][1], "Widget, large");
        assert_eq!(split_records(r#"a,"say ""hi""",c"#), vec![vec!["a", "say \"hi\"", "c"]]);
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let table = parse_csv("id,note\r\n1,\"first line\nsecond line\"\r\n2,plain\r\n").unwrap();
        assert_eq!(table.headers, vec!["id", "note"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["1", "first line\nsecond line"]);
        assert_eq!(table.rows[1], vec!["2", "plain"]);
    }

    #[test]
    fn ranks_matching_rows_first() {
        let table = parse_csv(SALES).unwrap();
        assert_eq!(rank_rows(&table, "total for gadget in the south", 5), vec![1]);
        assert_eq!(rank_rows(&table, "widget sales", 5), vec![0, 2]);
        assert_eq!(rank_rows(&table, "zzz", 2), vec![0, 1]);
    }

    #[tokio::test]
    async fn without_model_returns_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", SALES).unwrap();
        let tool = CsvSearchTool::new(None);
        let result = tool
            .execute(
                json!({"file_path": file.path().to_str().unwrap(), "prompt": "find total for gadget"}),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.starts_with("3 rows in"));
        assert!(result.content.contains("south, Gadget, 80"));
    }

    #[tokio::test]
    async fn missing_input_is_validation_error() {
        let err = CsvSearchTool::new(None)
            .execute(json!({"file_path": "/tmp/x.csv"}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crewforge_core::CrewForgeError::ToolValidation(_)));
    }
}
