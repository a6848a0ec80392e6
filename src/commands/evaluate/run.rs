use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::{Agent, CommandAgent, ReplayAgent};
use crate::cli::EvaluateArgs;
use crate::model::{EvaluationResult, TestCase};
use crate::scoring::ScoringSettings;
use crate::store::ReferenceStore;
use crate::util::{now_utc_string, sha256_file, write_json_pretty, write_text};

use super::orchestrator::Evaluator;
use super::report::{InvocationFailure, ResultsDocument, RunMetadata, render_text_report};

pub fn run(args: EvaluateArgs) -> Result<()> {
    let cases = load_test_cases(&args.test_cases)?;
    let cases = select_cases(cases, &args.test_ids)?;
    let test_cases_sha256 = sha256_file(&args.test_cases)?;
    info!(
        path = %args.test_cases.display(),
        cases = cases.len(),
        sha256 = %test_cases_sha256,
        "loaded test cases"
    );

    let store = ReferenceStore::open_read_only(&args.db_path)?;
    let agent = build_agent(&args)?;
    let settings = ScoringSettings {
        owner_column: args.owner_column.clone(),
        id_column: args.id_column.clone(),
    };

    let mut evaluator = Evaluator::new(agent, store, settings)?;
    info!(model = %args.model, reasoning = args.reasoning, "evaluation started");
    let outcome = evaluate_all(&mut evaluator, &cases);
    evaluator.finish()?;

    let report = render_text_report(&args.model, &outcome.results, &outcome.failures);
    write_text(&args.report_path, &report)?;
    info!(path = %args.report_path.display(), "wrote evaluation report");

    let metadata = RunMetadata {
        model: args.model.clone(),
        reasoning: args.reasoning,
        generated_at: now_utc_string(),
        test_cases_path: args.test_cases.display().to_string(),
        test_cases_sha256,
        owner_column: args.owner_column.clone(),
        harness_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let document = ResultsDocument::new(metadata, &outcome.results, &outcome.failures);
    write_json_pretty(&args.results_path, &document)?;
    info!(
        path = %args.results_path.display(),
        passed = document.summary.passed,
        total = document.summary.total,
        invocation_failures = document.summary.invocation_failures,
        "wrote evaluation results"
    );

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "{report}")?;
    output.flush()?;
    Ok(())
}

#[derive(Debug, Default)]
pub(super) struct RunOutcome {
    pub results: Vec<EvaluationResult>,
    pub failures: Vec<InvocationFailure>,
}

pub(super) fn evaluate_all(evaluator: &mut Evaluator, cases: &[TestCase]) -> RunOutcome {
    let mut outcome = RunOutcome::default();

    for (index, case) in cases.iter().enumerate() {
        info!(
            test_id = %case.test_id,
            position = index + 1,
            total = cases.len(),
            "evaluating case"
        );

        match evaluator.evaluate_case(case) {
            Ok(result) => outcome.results.push(result),
            Err(err) => {
                let error = format!("{:#}", anyhow::Error::new(err));
                warn!(test_id = %case.test_id, error = %error, "agent invocation failed");
                outcome.failures.push(InvocationFailure {
                    test_id: case.test_id.clone(),
                    question: case.question.clone(),
                    error,
                });
            }
        }
    }

    outcome
}

pub(super) fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_test_cases(&raw).with_context(|| format!("invalid test cases in {}", path.display()))
}

pub(super) fn parse_test_cases(raw: &[u8]) -> Result<Vec<TestCase>> {
    let document: Value = serde_json::from_slice(raw).context("test cases are not valid JSON")?;
    let Value::Array(entries) = document else {
        bail!("test cases must be a JSON array");
    };
    if entries.is_empty() {
        bail!("test case set is empty");
    }

    let mut seen = HashSet::new();
    let mut cases = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let case: TestCase = serde_json::from_value(entry)
            .with_context(|| format!("failed to parse test case at index {index}"))?;
        if !seen.insert(case.test_id.clone()) {
            bail!("duplicate test_id `{}`", case.test_id);
        }
        cases.push(case);
    }

    Ok(cases)
}

pub(super) fn select_cases(cases: Vec<TestCase>, test_ids: &[String]) -> Result<Vec<TestCase>> {
    if test_ids.is_empty() {
        return Ok(cases);
    }

    let known = cases
        .iter()
        .map(|case| case.test_id.as_str())
        .collect::<HashSet<&str>>();
    if let Some(unknown) = test_ids.iter().find(|id| !known.contains(id.as_str())) {
        bail!("unknown test id `{unknown}`");
    }

    let wanted = test_ids.iter().map(String::as_str).collect::<HashSet<&str>>();
    Ok(cases
        .into_iter()
        .filter(|case| wanted.contains(case.test_id.as_str()))
        .collect())
}

fn build_agent(args: &EvaluateArgs) -> Result<Box<dyn Agent>> {
    match (&args.agent_command, &args.replay) {
        (Some(program), None) => {
            info!(
                program = %program,
                timeout_secs = args.agent_timeout_secs,
                reset = args.agent_reset_command.is_some(),
                "using command agent"
            );
            let agent = CommandAgent::new(program.clone(), args.agent_args.clone())
                .with_env("EVAL_MODEL", args.model.clone())
                .with_env("EVAL_REASONING", args.reasoning.to_string())
                .with_reset_program(args.agent_reset_command.clone())
                .with_timeout_secs(args.agent_timeout_secs);
            Ok(Box::new(agent))
        }
        (None, Some(path)) => {
            let agent = ReplayAgent::from_path(path)?;
            info!(path = %path.display(), transcripts = agent.len(), "using replay agent");
            Ok(Box::new(agent))
        }
        (Some(_), Some(_)) => bail!("--agent-command and --replay are mutually exclusive"),
        (None, None) => bail!("an agent source is required: pass --agent-command or --replay"),
    }
}
