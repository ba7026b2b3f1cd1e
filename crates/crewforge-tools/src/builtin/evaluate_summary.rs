use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::parse_input;

/// Scores a summary against its source transcript with BLEU and ROUGE.
pub struct EvaluateSummaryTool;

#[derive(Deserialize)]
struct EvaluateInput {
    transcript: String,
    summary: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct Scores {
    pub bleu: f64,
    pub rouge: RougeScores,
}

#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct RougeScores {
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

fn overlap(reference: &HashMap<&[String], usize>, candidate: &HashMap<&[String], usize>) -> usize {
    candidate
        .iter()
        .map(|(gram, &c)| c.min(reference.get(gram).copied().unwrap_or(0)))
        .sum()
}

fn f_measure(overlap: usize, candidate_total: usize, reference_total: usize) -> f64 {
    if overlap == 0 || candidate_total == 0 || reference_total == 0 {
        return 0.0;
    }
    let p = overlap as f64 / candidate_total as f64;
    let r = overlap as f64 / reference_total as f64;
    2.0 * p * r / (p + r)
}

fn rouge_n(reference: &[String], candidate: &[String], n: usize) -> f64 {
    let r = ngram_counts(reference, n);
    let c = ngram_counts(candidate, n);
    f_measure(
        overlap(&r, &c),
        c.values().sum(),
        r.values().sum(),
    )
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y { prev[j] + 1 } else { cur[j].max(prev[j + 1]) };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Sentence BLEU-4 with add-epsilon smoothing for empty n-gram orders.
fn bleu(reference: &[String], candidate: &[String]) -> f64 {
    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }
    let mut log_sum = 0.0;
    for n in 1..=4 {
        let c = ngram_counts(candidate, n);
        let total: usize = c.values().sum();
        if total == 0 {
            // Candidate shorter than n: treat this order as neutral.
            continue;
        }
        let matched = overlap(&ngram_counts(reference, n), &c);
        let precision = if matched == 0 {
            0.1 / total as f64
        } else {
            matched as f64 / total as f64
        };
        log_sum += precision.ln() / 4.0;
    }
    let (c, r) = (candidate.len() as f64, reference.len() as f64);
    let brevity = if c > r { 1.0 } else { (1.0 - r / c).exp() };
    brevity * log_sum.exp()
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

pub(crate) fn evaluate(transcript: &str, summary: &str) -> Scores {
    let reference = tokens(transcript);
    let candidate = tokens(summary);
    let lcs = lcs_len(&reference, &candidate);
    Scores {
        bleu: round4(bleu(&reference, &candidate)),
        rouge: RougeScores {
            rouge1: round4(rouge_n(&reference, &candidate, 1)),
            rouge2: round4(rouge_n(&reference, &candidate, 2)),
            rouge_l: round4(f_measure(lcs, candidate.len(), reference.len())),
        },
    }
}

impl Tool for EvaluateSummaryTool {
    fn name(&self) -> &str {
        "evaluate_summary"
    }

    fn description(&self) -> &str {
        "Evaluates summary quality against the original transcript using BLEU and ROUGE metrics."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "transcript": { "type": "string", "description": "Original transcript text to compare against" },
                "summary": { "type": "string", "description": "Generated summary to evaluate" }
            },
            "required": ["transcript", "summary"]
        })
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: EvaluateInput = parse_input(input)?;
            let scores = evaluate(&p.transcript, &p.summary);
            Ok(ToolResult::success(serde_json::to_string_pretty(&scores)?))
        })
    }
}
