use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError, InvocationRequest};
use crate::extract::TranscriptExtractor;
use crate::model::{EvaluationDetails, EvaluationResult, TestCase, TierOutcome};
use crate::scoring::functional::FunctionalScorer;
use crate::scoring::{ScoringSettings, is_passing, overall_score, response, retrieval};
use crate::store::ReferenceStore;
use crate::util::truncate_chars;

const LOG_PREVIEW_CHARS: usize = 200;

pub struct Evaluator {
    agent: Box<dyn Agent>,
    agent_resets: bool,
    extractor: TranscriptExtractor,
    functional: FunctionalScorer,
    settings: ScoringSettings,
}

impl Evaluator {
    pub fn new(
        agent: Box<dyn Agent>,
        store: ReferenceStore,
        settings: ScoringSettings,
    ) -> Result<Self> {
        let agent_resets = agent.capabilities().reset;
        let functional = FunctionalScorer::new(store, &settings.owner_column)?;

        Ok(Self {
            agent,
            agent_resets,
            extractor: TranscriptExtractor::new()?,
            functional,
            settings,
        })
    }

    pub fn evaluate_case(&mut self, case: &TestCase) -> Result<EvaluationResult, AgentError> {
        if self.agent_resets {
            if let Err(err) = self.agent.reset() {
                warn!(test_id = %case.test_id, error = %err, "agent reset failed; continuing");
            }
        }

        let request = InvocationRequest::single_turn(case);
        let started = Instant::now();
        let transcript = self.agent.invoke(&request)?;
        let latency_seconds = started.elapsed().as_secs_f64();
        if transcript.is_empty() {
            return Err(AgentError::EmptyTranscript);
        }
        info!(
            test_id = %case.test_id,
            turns = transcript.messages.len(),
            latency_seconds,
            "agent answered"
        );

        let response_text = self.extractor.response_text(&transcript);
        let artifacts = self.extractor.extract(&transcript, &response_text);
        debug!(
            test_id = %case.test_id,
            generated_sql = %artifacts.generated_sql,
            semantic_search_calls = artifacts.semantic_search_calls.len(),
            response = %truncate_chars(&response_text, LOG_PREVIEW_CHARS),
            "extracted artifacts"
        );

        let tier1 = self.functional.score(&artifacts.generated_sql, case);
        let tier2 = retrieval::score(&artifacts.semantic_search_calls, case);
        let tier3 = response::score(&response_text, &artifacts, case, &self.settings.id_column);

        let result = combine(
            case,
            artifacts.generated_sql,
            response_text,
            [tier1, tier2, tier3],
            latency_seconds,
        );
        info!(
            test_id = %result.test_id,
            tier1 = result.tier1_score,
            tier2 = result.tier2_score,
            tier3 = result.tier3_score,
            overall = result.overall_score,
            passed = result.passed,
            "case scored"
        );

        Ok(result)
    }

    pub fn finish(self) -> Result<()> {
        self.functional.close()
    }
}

fn combine(
    case: &TestCase,
    generated_sql: String,
    response: String,
    [tier1, tier2, tier3]: [TierOutcome; 3],
    latency_seconds: f64,
) -> EvaluationResult {
    let overall = overall_score(tier1.score, tier2.score, tier3.score);

    EvaluationResult {
        test_id: case.test_id.clone(),
        question: case.question.clone(),
        passed: is_passing(overall),
        tier1_score: tier1.score,
        tier2_score: tier2.score,
        tier3_score: tier3.score,
        overall_score: overall,
        latency_seconds,
        details: EvaluationDetails {
            generated_sql,
            response,
            tier1: tier1.metrics,
            tier2: tier2.metrics,
            tier3: tier3.metrics,
        },
    }
}
