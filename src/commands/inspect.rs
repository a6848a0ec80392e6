use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::agent::parse_transcript_stream;
use crate::cli::InspectArgs;
use crate::extract::TranscriptExtractor;
use crate::model::{ExtractedArtifacts, Transcript};

#[derive(Debug, Serialize)]
struct InspectReport {
    turns: usize,
    speakers: Vec<String>,
    response: String,
    artifacts: ExtractedArtifacts,
}

pub fn run(args: InspectArgs) -> Result<()> {
    let raw = fs::read(&args.transcript)
        .with_context(|| format!("failed to read {}", args.transcript.display()))?;
    let transcript = parse_transcript_stream(&raw)
        .with_context(|| format!("failed to parse transcript {}", args.transcript.display()))?;
    info!(
        path = %args.transcript.display(),
        turns = transcript.messages.len(),
        "loaded transcript"
    );

    let report = inspect(&transcript)?;
    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        serde_json::to_writer_pretty(&mut output, &report)
            .context("failed to serialize inspect json output")?;
        writeln!(output)?;
    } else {
        write_text(&mut output, &report)?;
    }
    output.flush()?;
    Ok(())
}

fn inspect(transcript: &Transcript) -> Result<InspectReport> {
    let extractor = TranscriptExtractor::new()?;
    let response = extractor.response_text(transcript);
    let artifacts = extractor.extract(transcript, &response);

    Ok(InspectReport {
        turns: transcript.messages.len(),
        speakers: transcript
            .messages
            .iter()
            .map(|turn| turn.speaker().to_string())
            .collect(),
        response,
        artifacts,
    })
}

fn write_text(output: &mut impl Write, report: &InspectReport) -> Result<()> {
    writeln!(
        output,
        "Turns: {} ({})",
        report.turns,
        report.speakers.join(", ")
    )?;

    let sql = &report.artifacts.generated_sql;
    writeln!(
        output,
        "SQL: {}",
        if sql.is_empty() { "(none)" } else { sql.as_str() }
    )?;

    writeln!(
        output,
        "Semantic search calls: {}",
        report.artifacts.semantic_search_calls.len()
    )?;
    for call in &report.artifacts.semantic_search_calls {
        writeln!(output, "\t{:?} n_results={}", call.query, call.n_results)?;
    }

    writeln!(output, "Amounts: {:?}", report.artifacts.response_amounts)?;
    writeln!(
        output,
        "Referenced ids: {:?}",
        report.artifacts.referenced_ids
    )?;
    writeln!(output, "Response: {}", report.response)?;
    Ok(())
}
