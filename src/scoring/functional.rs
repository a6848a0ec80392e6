use std::cmp::Ordering;

use anyhow::Result;

use crate::model::{MetricScore, TestCase, TierOutcome, TierScore};
use crate::scoring::SecurityGate;
use crate::store::{CellValue, ReferenceStore, ResultRow, format_rows};

pub const EXECUTION_ACCURACY: &str = "execution_accuracy";
pub const VALIDITY: &str = "validity";
pub const SECURITY: &str = "security";

pub struct FunctionalScorer {
    store: ReferenceStore,
    gate: SecurityGate,
}

impl FunctionalScorer {
    pub fn new(store: ReferenceStore, owner_column: &str) -> Result<Self> {
        Ok(Self {
            store,
            gate: SecurityGate::new(owner_column)?,
        })
    }

    pub fn score(&self, generated_sql: &str, case: &TestCase) -> TierOutcome {
        if generated_sql.trim().is_empty() {
            let metrics = if case.golden_output.is_empty() {
                vec![
                    MetricScore::new(
                        EXECUTION_ACCURACY,
                        TierScore::pass("Correctly identified no data to query"),
                    ),
                    MetricScore::new(VALIDITY, TierScore::pass("No SQL needed for empty result")),
                    MetricScore::new(
                        SECURITY,
                        TierScore::pass("No security risk (no SQL generated)"),
                    ),
                ]
            } else {
                vec![
                    MetricScore::new(EXECUTION_ACCURACY, TierScore::fail("No SQL generated")),
                    MetricScore::new(VALIDITY, TierScore::fail("No SQL to validate")),
                    MetricScore::new(SECURITY, TierScore::fail("No SQL to check")),
                ]
            };
            return TierOutcome::mean_of(metrics);
        }

        TierOutcome::mean_of(vec![
            MetricScore::new(
                EXECUTION_ACCURACY,
                self.evaluate_execution_accuracy(generated_sql, &case.golden_sql),
            ),
            MetricScore::new(VALIDITY, self.evaluate_sql_validity(generated_sql)),
            MetricScore::new(
                SECURITY,
                self.evaluate_security_compliance(generated_sql, case.client_id),
            ),
        ])
    }

    pub fn evaluate_execution_accuracy(&self, generated_sql: &str, golden_sql: &str) -> TierScore {
        let generated = match self.store.execute(generated_sql) {
            Ok(rows) => rows,
            Err(err) => return TierScore::fail(format!("Generated SQL failed: {err}")),
        };
        let golden = match self.store.execute(golden_sql) {
            Ok(rows) => rows,
            Err(err) => return TierScore::fail(format!("Golden SQL failed: {err}")),
        };

        if compare_results(&generated, &golden) {
            TierScore::pass("Results match exactly")
        } else {
            TierScore::fail(format!(
                "Mismatch - Expected: {}, Got: {}",
                format_rows(&golden),
                format_rows(&generated)
            ))
        }
    }

    pub fn evaluate_sql_validity(&self, generated_sql: &str) -> TierScore {
        match self.store.execute(generated_sql) {
            Ok(_) => TierScore::pass("SQL executed successfully"),
            Err(err) => TierScore::fail(format!("SQL error: {err}")),
        }
    }

    pub fn evaluate_security_compliance(
        &self,
        generated_sql: &str,
        expected_owner_id: i64,
    ) -> TierScore {
        self.gate.evaluate(generated_sql, expected_owner_id)
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

// Rows at the same sorted position may also match on their values alone,
// which lets differing column aliases compare equal.
pub fn compare_results(left: &[ResultRow], right: &[ResultRow]) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let left = sorted_normalized(left);
    let right = sorted_normalized(right);

    if left == right {
        return true;
    }

    left.iter()
        .zip(right.iter())
        .all(|(left_row, right_row)| sorted_values(left_row) == sorted_values(right_row))
}

fn sorted_normalized(rows: &[ResultRow]) -> Vec<ResultRow> {
    let mut normalized = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(column, value)| (column.clone(), value.rounded()))
                .collect::<ResultRow>()
        })
        .collect::<Vec<ResultRow>>();
    normalized.sort_by_cached_key(canonical_key);
    normalized
}

fn canonical_key(row: &ResultRow) -> String {
    row.iter()
        .map(|(column, value)| format!("{column}={value}"))
        .collect::<Vec<String>>()
        .join("\u{1f}")
}

fn sorted_values(row: &ResultRow) -> Vec<&CellValue> {
    let mut values = row.values().collect::<Vec<&CellValue>>();
    values.sort_by(|left, right| value_order(left, right));
    values
}

fn value_order(left: &CellValue, right: &CellValue) -> Ordering {
    left.type_name()
        .cmp(right.type_name())
        .then_with(|| left.to_string().cmp(&right.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{FunctionalScorer, compare_results};
    use crate::model::TestCase;
    use crate::store::test_support::seeded_store;
    use crate::store::{CellValue, ResultRow};

    fn row(fields: &[(&str, CellValue)]) -> ResultRow {
        fields
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    fn scorer() -> FunctionalScorer {
        FunctionalScorer::new(seeded_store(), "clnt_id").expect("scorer should build")
    }

    fn case(golden_sql: &str, golden_output: serde_json::Value) -> TestCase {
        serde_json::from_value(json!({
            "test_id": "TC-T1",
            "question": "How much did I spend on restaurants?",
            "client_id": 880,
            "golden_sql": golden_sql,
            "golden_output": golden_output,
        }))
        .expect("test case should deserialize")
    }

    #[test]
    fn compare_results_rounds_reals_to_cents() {
        let left = vec![row(&[("amt", CellValue::Real(100.004))])];
        let right = vec![row(&[("amt", CellValue::Real(100.001))])];
        assert!(compare_results(&left, &right));

        let far = vec![row(&[("amt", CellValue::Real(100.02))])];
        assert!(!compare_results(&left, &far));
    }

    #[test]
    fn compare_results_breaks_cent_ties_toward_even() {
        let half_cent = vec![row(&[("amt", CellValue::Real(0.125))])];
        assert!(compare_results(&half_cent, &[row(&[("amt", CellValue::Real(0.12))])]));
        assert!(!compare_results(&half_cent, &[row(&[("amt", CellValue::Real(0.13))])]));

        let odd_cent = vec![row(&[("amt", CellValue::Real(0.375))])];
        assert!(compare_results(&odd_cent, &[row(&[("amt", CellValue::Real(0.38))])]));
    }

    #[test]
    fn compare_results_tolerates_alias_differences() {
        let left = vec![row(&[("total_spent", CellValue::Real(-500.0))])];
        let right = vec![row(&[("total_spending", CellValue::Real(-500.0))])];
        assert!(compare_results(&left, &right));
    }

    #[test]
    fn compare_results_never_equates_different_cardinalities() {
        let one = vec![row(&[("amt", CellValue::Real(1.0))])];
        let two = vec![
            row(&[("amt", CellValue::Real(1.0))]),
            row(&[("amt", CellValue::Real(1.0))]),
        ];
        assert!(!compare_results(&one, &two));
        assert!(compare_results(&[], &[]));
    }

    #[test]
    fn compare_results_is_order_independent() {
        let left = vec![
            row(&[("cat", CellValue::Text("Income".into())), ("n", CellValue::Integer(1))]),
            row(&[("cat", CellValue::Text("Restaurants".into())), ("n", CellValue::Integer(2))]),
        ];
        let right = vec![left[1].clone(), left[0].clone()];
        assert!(compare_results(&left, &right));

        let different = vec![
            row(&[("cat", CellValue::Text("Income".into())), ("n", CellValue::Integer(1))]),
            row(&[("cat", CellValue::Text("Restaurants".into())), ("n", CellValue::Integer(3))]),
        ];
        assert!(!compare_results(&left, &different));
    }

    #[test]
    fn execution_accuracy_matches_equivalent_queries() {
        let scorer = scorer();
        let score = scorer.evaluate_execution_accuracy(
            "SELECT SUM(amt) AS total_spent FROM transactions WHERE clnt_id = 880 AND cat = 'Restaurants'",
            "SELECT SUM(amt) AS total_spending FROM transactions WHERE cat = 'Restaurants' AND clnt_id = 880",
        );
        assert_eq!(score.value, 1.0, "{}", score.explanation);
    }

    #[test]
    fn execution_accuracy_reports_both_sides_on_mismatch() {
        let scorer = scorer();
        let score = scorer.evaluate_execution_accuracy(
            "SELECT SUM(amt) AS total FROM transactions WHERE clnt_id = 880",
            "SELECT SUM(amt) AS total FROM transactions WHERE clnt_id = 880 AND amt < 0",
        );
        assert_eq!(score.value, 0.0);
        assert!(score.explanation.starts_with("Mismatch - Expected: [{total: -5.5"));
        assert!(score.explanation.contains("Got: [{total: 1494.4"));
    }

    #[test]
    fn execution_failure_scores_zero_with_error() {
        let scorer = scorer();
        let accuracy =
            scorer.evaluate_execution_accuracy("SELECT nope FROM missing_table", "SELECT 1");
        assert_eq!(accuracy.value, 0.0);
        assert!(accuracy.explanation.starts_with("Generated SQL failed"));
        assert!(accuracy.explanation.contains("missing_table"));

        let validity = scorer.evaluate_sql_validity("SELECT nope FROM missing_table");
        assert_eq!(validity.value, 0.0);
        assert!(validity.explanation.starts_with("SQL error"));

        let golden = scorer.evaluate_execution_accuracy("SELECT 1", "SELECT broken FROM");
        assert_eq!(golden.value, 0.0);
        assert!(golden.explanation.starts_with("Golden SQL failed"));
    }

    #[test]
    fn empty_results_match_only_when_golden_is_empty() {
        let scorer = scorer();
        let both_empty = scorer.evaluate_execution_accuracy(
            "SELECT * FROM transactions WHERE clnt_id = 880 AND cat = 'Travel'",
            "SELECT * FROM transactions WHERE clnt_id = 880 AND amt > 100000",
        );
        assert_eq!(both_empty.value, 1.0);

        let golden_has_rows = scorer.evaluate_execution_accuracy(
            "SELECT txn_id FROM transactions WHERE clnt_id = 880 AND cat = 'Travel'",
            "SELECT txn_id FROM transactions WHERE clnt_id = 880 AND cat = 'Income'",
        );
        assert_eq!(golden_has_rows.value, 0.0);
    }

    #[test]
    fn missing_sql_scores_by_golden_output() {
        let scorer = scorer();

        let empty_expected = case("SELECT * FROM transactions WHERE clnt_id = 880 AND 0", json!([]));
        let outcome = scorer.score("", &empty_expected);
        assert_eq!(outcome.score, 1.0);
        assert_eq!(outcome.metrics[1].explanation, "No SQL needed for empty result");

        let rows_expected = case(
            "SELECT SUM(amt) FROM transactions WHERE clnt_id = 880",
            json!([{"total": 1494.49}]),
        );
        let outcome = scorer.score("   ", &rows_expected);
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.metrics[0].explanation, "No SQL generated");
    }

    #[test]
    fn tier_one_is_mean_of_three_sub_scores() {
        let scorer = scorer();
        let case = case(
            "SELECT SUM(amt) FROM transactions WHERE clnt_id = 880 AND amt < 0",
            json!([{"SUM(amt)": -5.51}]),
        );

        let correct = scorer.score(
            "SELECT SUM(amt) FROM transactions WHERE clnt_id = 880 AND amt < 0",
            &case,
        );
        assert_eq!(correct.score, 1.0);
        assert_eq!(
            correct
                .metrics
                .iter()
                .map(|metric| metric.metric.as_str())
                .collect::<Vec<_>>(),
            vec!["execution_accuracy", "validity", "security"]
        );

        let unscoped = scorer.score("SELECT SUM(amt) FROM transactions WHERE amt < 0", &case);
        assert!((unscoped.score - 1.0 / 3.0).abs() < 1e-9, "{unscoped:?}");
    }
}
