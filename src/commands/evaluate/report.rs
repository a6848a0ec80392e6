use serde::Serialize;

use crate::model::{EvaluationResult, MetricScore};
use crate::util::truncate_chars;

pub const RESPONSE_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct InvocationFailure {
    pub test_id: String,
    pub question: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f64,
    pub average_overall: f64,
    pub average_latency_seconds: f64,
    pub average_tier1: f64,
    pub average_tier2: f64,
    pub average_tier3: f64,
    pub invocation_failures: usize,
}

impl RunSummary {
    pub fn from_results(results: &[EvaluationResult], invocation_failures: usize) -> Self {
        if results.is_empty() {
            return Self {
                invocation_failures,
                ..Self::default()
            };
        }

        let total = results.len();
        let passed = results.iter().filter(|result| result.passed).count();
        let mean = |field: fn(&EvaluationResult) -> f64| {
            results.iter().map(field).sum::<f64>() / total as f64
        };

        Self {
            total,
            passed,
            pass_rate: passed as f64 / total as f64,
            average_overall: mean(|result| result.overall_score),
            average_latency_seconds: mean(|result| result.latency_seconds),
            average_tier1: mean(|result| result.tier1_score),
            average_tier2: mean(|result| result.tier2_score),
            average_tier3: mean(|result| result.tier3_score),
            invocation_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub model: String,
    pub reasoning: bool,
    pub generated_at: String,
    pub test_cases_path: String,
    pub test_cases_sha256: String,
    pub owner_column: String,
    pub harness_version: String,
}

#[derive(Debug, Serialize)]
pub struct ResultRecord<'a> {
    pub test_id: &'a str,
    pub question: &'a str,
    pub passed: bool,
    pub overall_score: f64,
    pub tier1_score: f64,
    pub tier2_score: f64,
    pub tier3_score: f64,
    pub latency_seconds: f64,
    pub generated_sql: &'a str,
    pub response: &'a str,
    pub tier1: &'a [MetricScore],
    pub tier2: &'a [MetricScore],
    pub tier3: &'a [MetricScore],
}

impl<'a> From<&'a EvaluationResult> for ResultRecord<'a> {
    fn from(result: &'a EvaluationResult) -> Self {
        Self {
            test_id: &result.test_id,
            question: &result.question,
            passed: result.passed,
            overall_score: result.overall_score,
            tier1_score: result.tier1_score,
            tier2_score: result.tier2_score,
            tier3_score: result.tier3_score,
            latency_seconds: result.latency_seconds,
            generated_sql: &result.details.generated_sql,
            response: truncate_chars(&result.details.response, RESPONSE_PREVIEW_CHARS),
            tier1: &result.details.tier1,
            tier2: &result.details.tier2,
            tier3: &result.details.tier3,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultsDocument<'a> {
    pub metadata: RunMetadata,
    pub summary: RunSummary,
    pub results: Vec<ResultRecord<'a>>,
    pub invocation_failures: &'a [InvocationFailure],
}

impl<'a> ResultsDocument<'a> {
    pub fn new(
        metadata: RunMetadata,
        results: &'a [EvaluationResult],
        invocation_failures: &'a [InvocationFailure],
    ) -> Self {
        Self {
            metadata,
            summary: RunSummary::from_results(results, invocation_failures.len()),
            results: results.iter().map(ResultRecord::from).collect(),
            invocation_failures,
        }
    }
}

pub fn render_text_report(
    model: &str,
    results: &[EvaluationResult],
    invocation_failures: &[InvocationFailure],
) -> String {
    let header = format!("EVALUATION REPORT - Model: {model}");
    let underline = "=".repeat(header.chars().count());
    let mut lines = vec![header, underline];

    let summary = RunSummary::from_results(results, invocation_failures.len());
    lines.push(String::new());
    lines.push("Summary:".to_string());
    if summary.total == 0 {
        lines.push("  No cases evaluated.".to_string());
    } else {
        lines.push(format!(
            "  Tests Passed: {}/{} ({})",
            summary.passed,
            summary.total,
            percent(summary.pass_rate)
        ));
        lines.push(format!(
            "  Average Overall Score: {}",
            percent(summary.average_overall)
        ));
        lines.push(format!(
            "  Average Latency: {:.2}s",
            summary.average_latency_seconds
        ));
        lines.push(format!(
            "  Average Tier 1 (Functional): {}",
            percent(summary.average_tier1)
        ));
        lines.push(format!(
            "  Average Tier 2 (Retrieval): {}",
            percent(summary.average_tier2)
        ));
        lines.push(format!(
            "  Average Tier 3 (Response): {}",
            percent(summary.average_tier3)
        ));
    }
    if summary.invocation_failures > 0 {
        lines.push(format!(
            "  Invocation Failures: {}",
            summary.invocation_failures
        ));
    }

    if !results.is_empty() {
        lines.push(String::new());
        lines.push("Individual Test Results:".to_string());
    }
    for result in results {
        lines.push(String::new());
        lines.push(format!("{}: {}", result.test_id, result.question));
        lines.push(format!(
            "  Status: {} (Latency: {:.2}s)",
            if result.passed { "PASS" } else { "FAIL" },
            result.latency_seconds
        ));
        lines.push(format!(
            "  Overall: {} | T1: {} | T2: {} | T3: {}",
            percent(result.overall_score),
            percent(result.tier1_score),
            percent(result.tier2_score),
            percent(result.tier3_score)
        ));

        if !result.passed {
            lines.push("  Issues:".to_string());
            for metric in result.details.metrics().filter(|metric| !metric.is_perfect()) {
                lines.push(format!("    - {}: {}", metric.metric, metric.explanation));
            }
        }
    }

    if !invocation_failures.is_empty() {
        lines.push(String::new());
        lines.push("Invocation Failures:".to_string());
        for failure in invocation_failures {
            lines.push(format!(
                "  {}: {} ({})",
                failure.test_id, failure.question, failure.error
            ));
        }
    }

    lines.join("\n")
}

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}
