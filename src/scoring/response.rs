use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use crate::model::{ExtractedArtifacts, JsonRow, MetricScore, TestCase, TierOutcome, TierScore};

pub const FAITHFULNESS: &str = "faithfulness";
pub const AMOUNTS: &str = "amounts";

const PLACEHOLDERS: &[&str] = &["$X.XX", "$Y.YY", "[actual", "[transaction", "placeholder"];
const AMOUNT_TOLERANCE: f64 = 0.01;
const MIN_SEQUENTIAL_RUN: usize = 3;

pub fn score(
    response: &str,
    artifacts: &ExtractedArtifacts,
    case: &TestCase,
    id_column: &str,
) -> TierOutcome {
    TierOutcome::mean_of(vec![
        MetricScore::new(
            FAITHFULNESS,
            evaluate_faithfulness(
                response,
                &case.golden_output,
                &artifacts.referenced_ids,
                id_column,
            ),
        ),
        MetricScore::new(
            AMOUNTS,
            evaluate_amount_accuracy(&artifacts.response_amounts, case),
        ),
    ])
}

pub fn evaluate_faithfulness(
    response: &str,
    golden_output: &[JsonRow],
    referenced_ids: &BTreeSet<i64>,
    id_column: &str,
) -> TierScore {
    let mut issues = Vec::new();

    let lowered = response.to_lowercase();
    for placeholder in PLACEHOLDERS {
        if lowered.contains(&placeholder.to_lowercase()) {
            issues.push(format!("Contains placeholder: {placeholder}"));
        }
    }

    let ids = referenced_ids.iter().copied().collect::<Vec<i64>>();
    if is_sequential(&ids) {
        issues.push("CRITICAL: Sequential fabricated IDs detected".to_string());
    }

    if let Some(expected_ids) = golden_ids(golden_output, id_column) {
        let hallucinated = ids
            .iter()
            .copied()
            .filter(|id| !expected_ids.contains(id))
            .collect::<Vec<i64>>();
        if !hallucinated.is_empty() {
            issues.push(format!("Hallucinated transaction IDs: {hallucinated:?}"));
        }
    }

    if issues.is_empty() {
        TierScore::pass("Response is faithful to DB results")
    } else {
        TierScore::fail(format!("Faithfulness violations: {}", issues.join("; ")))
    }
}

pub fn is_sequential(ids: &[i64]) -> bool {
    if ids.len() < MIN_SEQUENTIAL_RUN {
        return false;
    }

    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.windows(MIN_SEQUENTIAL_RUN).any(|window| {
        window[0].checked_add(1) == Some(window[1]) && window[0].checked_add(2) == Some(window[2])
    })
}

pub fn evaluate_amount_accuracy(response_amounts: &[f64], case: &TestCase) -> TierScore {
    if response_amounts.is_empty() {
        return if is_effectively_empty(&case.golden_output) {
            TierScore::pass("Correctly handled empty result")
        } else {
            TierScore::fail("No amounts found in response")
        };
    }

    let mut issues = Vec::new();
    for (label, expected) in case.expected_targets() {
        let Some(closest) = closest_amount(response_amounts, expected) else {
            continue;
        };
        if (closest - expected).abs() > AMOUNT_TOLERANCE {
            issues.push(format!(
                "{label} mismatch: expected ${expected:.2}, closest found ${closest:.2}"
            ));
        }
    }

    if issues.is_empty() {
        TierScore::pass("Amounts are accurate")
    } else {
        TierScore::fail(issues.join("; "))
    }
}

fn closest_amount(amounts: &[f64], expected: f64) -> Option<f64> {
    amounts
        .iter()
        .copied()
        .min_by(|left, right| (left - expected).abs().total_cmp(&(right - expected).abs()))
}

fn is_effectively_empty(golden_output: &[JsonRow]) -> bool {
    match golden_output {
        [] => true,
        [row] => row.values().all(|value| match value {
            Value::Null => true,
            Value::Number(number) => number.as_f64() == Some(0.0),
            _ => false,
        }),
        _ => false,
    }
}

fn golden_ids(golden_output: &[JsonRow], id_column: &str) -> Option<HashSet<i64>> {
    let first = golden_output.first()?;
    if !first.contains_key(id_column) {
        return None;
    }

    Some(
        golden_output
            .iter()
            .filter_map(|row| row.get(id_column))
            .filter_map(json_integer)
            .collect(),
    )
}

fn json_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0)
                .map(|float| float as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}
