use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub type JsonRow = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub test_id: String,
    pub question: String,
    pub client_id: i64,
    pub golden_sql: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub golden_output: Vec<JsonRow>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub need_vector: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expected_search_terms: Vec<String>,
    #[serde(default)]
    pub expected_amount: Option<f64>,
    #[serde(default)]
    pub expected_spending: Option<f64>,
    #[serde(default)]
    pub expected_income: Option<f64>,
}

impl TestCase {
    pub fn expected_targets(&self) -> Vec<(&'static str, f64)> {
        [
            ("Amount", self.expected_amount),
            ("Spending", self.expected_spending),
            ("Income", self.expected_income),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.map(|value| (label, value)))
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default, alias = "turns", deserialize_with = "null_as_default")]
    pub messages: Vec<Turn>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn final_text(&self) -> String {
        self.messages
            .last()
            .and_then(Turn::text)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
}

impl Turn {
    pub fn speaker(&self) -> &str {
        self.role
            .as_deref()
            .or(self.kind.as_deref())
            .unwrap_or("unknown")
    }

    pub fn text(&self) -> Option<String> {
        match &self.content {
            Value::String(text) => Some(text.clone()),
            Value::Array(parts) => {
                let texts = parts
                    .iter()
                    .filter_map(|part| match part {
                        Value::String(text) => Some(text.as_str()),
                        Value::Object(fields) => fields.get("text").and_then(Value::as_str),
                        _ => None,
                    })
                    .collect::<Vec<&str>>();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.concat())
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
impl Turn {
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: Value::String(content.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                name: name.into(),
                args,
                id: None,
            }],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn arguments(&self) -> Option<JsonRow> {
        match &self.args {
            Value::Object(fields) => Some(fields.clone()),
            Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
                Ok(Value::Object(fields)) => Some(fields),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticSearchCall {
    pub query: String,
    pub n_results: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedArtifacts {
    pub generated_sql: String,
    pub semantic_search_calls: Vec<SemanticSearchCall>,
    pub response_amounts: Vec<f64>,
    pub referenced_ids: BTreeSet<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierScore {
    pub value: f64,
    pub explanation: String,
}

impl TierScore {
    pub fn new(value: f64, explanation: impl Into<String>) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            explanation: explanation.into(),
        }
    }

    pub fn pass(explanation: impl Into<String>) -> Self {
        Self::new(1.0, explanation)
    }

    pub fn fail(explanation: impl Into<String>) -> Self {
        Self::new(0.0, explanation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricScore {
    pub metric: String,
    pub score: f64,
    pub explanation: String,
}

impl MetricScore {
    pub fn new(metric: &str, score: TierScore) -> Self {
        Self {
            metric: metric.to_string(),
            score: score.value,
            explanation: score.explanation,
        }
    }

    pub fn is_perfect(&self) -> bool {
        self.score >= 1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierOutcome {
    pub score: f64,
    pub metrics: Vec<MetricScore>,
}

impl TierOutcome {
    pub fn mean_of(metrics: Vec<MetricScore>) -> Self {
        let score = if metrics.is_empty() {
            0.0
        } else {
            metrics.iter().map(|metric| metric.score).sum::<f64>() / metrics.len() as f64
        };
        Self { score, metrics }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationDetails {
    pub generated_sql: String,
    pub response: String,
    pub tier1: Vec<MetricScore>,
    pub tier2: Vec<MetricScore>,
    pub tier3: Vec<MetricScore>,
}

impl EvaluationDetails {
    pub fn metrics(&self) -> impl Iterator<Item = &MetricScore> {
        self.tier1
            .iter()
            .chain(self.tier2.iter())
            .chain(self.tier3.iter())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub test_id: String,
    pub question: String,
    pub passed: bool,
    pub tier1_score: f64,
    pub tier2_score: f64,
    pub tier3_score: f64,
    pub overall_score: f64,
    pub latency_seconds: f64,
    pub details: EvaluationDetails,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
