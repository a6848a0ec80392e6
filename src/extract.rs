use std::collections::BTreeSet;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::model::{ExtractedArtifacts, JsonRow, SemanticSearchCall, Transcript, Turn};

pub const SQL_TOOL: &str = "sql_db_query";
pub const SEMANTIC_SEARCH_TOOL: &str = "vector_search";

const DEFAULT_SEARCH_RESULTS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Structured,
    JsonText,
}

impl CallShape {
    pub const ORDERED: [CallShape; 2] = [CallShape::Structured, CallShape::JsonText];

    pub fn invocations(self, turn: &Turn, tool: &str) -> Vec<JsonRow> {
        match self {
            Self::Structured => turn
                .tool_calls
                .iter()
                .filter(|call| call.name == tool)
                .map(|call| call.arguments().unwrap_or_default())
                .collect(),
            Self::JsonText => turn
                .text()
                .and_then(|text| json_text_invocation(&text, tool))
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStrategy {
    ToolCall(CallShape),
    BareStatement,
}

impl SqlStrategy {
    pub const ORDERED: [SqlStrategy; 3] = [
        SqlStrategy::ToolCall(CallShape::Structured),
        SqlStrategy::ToolCall(CallShape::JsonText),
        SqlStrategy::BareStatement,
    ];

    pub fn find(self, turn: &Turn) -> Option<String> {
        match self {
            Self::ToolCall(shape) => shape
                .invocations(turn, SQL_TOOL)
                .iter()
                .find_map(|args| args.get("query").and_then(Value::as_str).and_then(select_only)),
            Self::BareStatement => turn.text().as_deref().and_then(select_only),
        }
    }
}

pub struct TranscriptExtractor {
    amount_pattern: Regex,
    id_patterns: Vec<Regex>,
    reasoning_block: Regex,
}

impl TranscriptExtractor {
    pub fn new() -> Result<Self> {
        let amount_pattern =
            Regex::new(r"\$(-?[0-9,]+\.?[0-9]*)").context("failed to compile amount regex")?;
        let id_patterns = vec![
            Regex::new(r"(?i)transaction\s+id:\s*(\d+)")
                .context("failed to compile transaction id regex")?,
            Regex::new(r"txn_id:\s*(\d+)").context("failed to compile txn_id regex")?,
        ];
        let reasoning_block =
            Regex::new(r"(?s)<think>.*?</think>").context("failed to compile think-block regex")?;

        Ok(Self {
            amount_pattern,
            id_patterns,
            reasoning_block,
        })
    }

    pub fn response_text(&self, transcript: &Transcript) -> String {
        self.reasoning_block
            .replace_all(&transcript.final_text(), "")
            .trim()
            .to_string()
    }

    pub fn extract(&self, transcript: &Transcript, response: &str) -> ExtractedArtifacts {
        ExtractedArtifacts {
            generated_sql: extract_sql(transcript),
            semantic_search_calls: extract_semantic_search_calls(transcript),
            response_amounts: self.extract_amounts(response),
            referenced_ids: self.extract_referenced_ids(response),
        }
    }

    pub fn extract_amounts(&self, text: &str) -> Vec<f64> {
        self.amount_pattern
            .captures_iter(text)
            .filter_map(|captures| captures.get(1))
            .filter_map(|matched| matched.as_str().replace(',', "").parse::<f64>().ok())
            .collect()
    }

    pub fn extract_referenced_ids(&self, text: &str) -> BTreeSet<i64> {
        self.id_patterns
            .iter()
            .flat_map(|pattern| pattern.captures_iter(text))
            .filter_map(|captures| captures.get(1))
            .filter_map(|matched| matched.as_str().parse::<i64>().ok())
            .collect()
    }
}

pub fn extract_sql(transcript: &Transcript) -> String {
    transcript
        .messages
        .iter()
        .find_map(|turn| {
            SqlStrategy::ORDERED
                .iter()
                .find_map(|strategy| strategy.find(turn))
        })
        .unwrap_or_default()
}

pub fn extract_semantic_search_calls(transcript: &Transcript) -> Vec<SemanticSearchCall> {
    let mut calls = Vec::new();
    for turn in &transcript.messages {
        for shape in CallShape::ORDERED {
            calls.extend(
                shape
                    .invocations(turn, SEMANTIC_SEARCH_TOOL)
                    .iter()
                    .map(semantic_search_call),
            );
        }
    }
    calls
}

fn semantic_search_call(args: &JsonRow) -> SemanticSearchCall {
    let query = args
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let n_results = args
        .get("n_results")
        .and_then(|value| match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse::<u64>().ok(),
            _ => None,
        })
        .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
        .unwrap_or(DEFAULT_SEARCH_RESULTS);

    SemanticSearchCall { query, n_results }
}

fn json_text_invocation(text: &str, tool: &str) -> Option<JsonRow> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }

    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(trimmed) else {
        return None;
    };

    let names_tool = ["tool", "name"]
        .iter()
        .any(|key| fields.get(*key).and_then(Value::as_str) == Some(tool));
    if !names_tool {
        return None;
    }

    let nested = ["args", "arguments"]
        .iter()
        .find_map(|key| match fields.get(*key) {
            Some(Value::Object(nested)) => Some(nested.clone()),
            _ => None,
        });
    Some(nested.unwrap_or(fields))
}

fn select_only(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let is_select = trimmed
        .get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("SELECT"))
        .unwrap_or(false);
    is_select.then(|| trimmed.to_string())
}
