use crate::model::{MetricScore, SemanticSearchCall, TestCase, TierOutcome, TierScore};

pub const USAGE: &str = "vector_search_usage";
pub const RELEVANCE: &str = "retrieval_relevance";

pub fn score(calls: &[SemanticSearchCall], case: &TestCase) -> TierOutcome {
    TierOutcome::mean_of(vec![
        MetricScore::new(USAGE, evaluate_usage(calls, case.need_vector)),
        MetricScore::new(
            RELEVANCE,
            evaluate_relevance(calls, &case.expected_search_terms),
        ),
    ])
}

pub fn evaluate_usage(calls: &[SemanticSearchCall], need_vector: bool) -> TierScore {
    match (need_vector, !calls.is_empty()) {
        (true, true) => TierScore::pass("Vector search called appropriately"),
        (false, false) => TierScore::pass("Vector search not needed"),
        (true, false) => TierScore::fail("Vector search should have been called"),
        (false, true) => TierScore::new(0.5, "Vector search called but may not be necessary"),
    }
}

pub fn evaluate_relevance(calls: &[SemanticSearchCall], expected_terms: &[String]) -> TierScore {
    if expected_terms.is_empty() {
        return TierScore::pass("No expected search terms defined");
    }

    if calls.is_empty() {
        return TierScore::fail("No vector search performed but expected terms required");
    }

    for call in calls {
        let query = call.query.to_lowercase();
        let matched = expected_terms
            .iter()
            .filter(|term| query.contains(&term.to_lowercase()))
            .map(String::as_str)
            .collect::<Vec<&str>>();
        if !matched.is_empty() {
            return TierScore::pass(format!(
                "Found expected terms in query '{}': {:?}",
                call.query, matched
            ));
        }
    }

    TierScore::fail(format!(
        "Missing expected terms in all queries: {expected_terms:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::{evaluate_relevance, evaluate_usage, score};
    use crate::model::{SemanticSearchCall, TestCase};

    fn call(query: &str) -> SemanticSearchCall {
        SemanticSearchCall {
            query: query.to_string(),
            n_results: 15,
        }
    }

    fn terms(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn usage_truth_table() {
        let called = vec![call("restaurants")];
        assert_eq!(evaluate_usage(&called, true).value, 1.0);
        assert_eq!(evaluate_usage(&[], false).value, 1.0);
        assert_eq!(evaluate_usage(&[], true).value, 0.0);
        assert_eq!(evaluate_usage(&called, false).value, 0.5);
    }

    #[test]
    fn relevance_is_trivial_without_expected_terms() {
        assert_eq!(evaluate_relevance(&[], &[]).value, 1.0);
        assert_eq!(evaluate_relevance(&[call("anything")], &[]).value, 1.0);
    }

    #[test]
    fn relevance_requires_a_call_when_terms_expected() {
        let score = evaluate_relevance(&[], &terms(&["restaurants"]));
        assert_eq!(score.value, 0.0);
        assert!(score.explanation.contains("No vector search performed"));
    }

    #[test]
    fn relevance_matches_case_insensitively_on_any_call() {
        let calls = vec![call("coffee shops"), call("Fast Food RESTAURANTS nearby")];
        let score = evaluate_relevance(&calls, &terms(&["groceries", "restaurants"]));
        assert_eq!(score.value, 1.0);
        assert!(score.explanation.contains("Fast Food RESTAURANTS nearby"));
        assert!(score.explanation.contains("restaurants"));
    }

    #[test]
    fn relevance_fails_when_no_call_contains_any_term() {
        let calls = vec![call("coffee"), call("gas station")];
        let score = evaluate_relevance(&calls, &terms(&["restaurants", "dining"]));
        assert_eq!(score.value, 0.0);
        assert!(score.explanation.starts_with("Missing expected terms"));
    }

    #[test]
    fn tier_two_is_mean_of_usage_and_relevance() {
        let case: TestCase = serde_json::from_value(serde_json::json!({
            "test_id": "TC001",
            "question": "How much did I spend in August 2023?",
            "client_id": 880,
            "golden_sql": "SELECT 1",
            "need_vector": false,
            "expected_search_terms": []
        }))
        .expect("test case should deserialize");

        assert_eq!(score(&[], &case).score, 1.0);
        assert_eq!(score(&[call("august")], &case).score, 0.75);
    }
}
