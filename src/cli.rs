use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::scoring::{DEFAULT_ID_COLUMN, DEFAULT_OWNER_COLUMN};

#[derive(Parser, Debug)]
#[command(
    name = "sqlrag-eval",
    version,
    about = "Multi-tier evaluation harness for SQL/RAG conversational agents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Evaluate(EvaluateArgs),
    Inspect(InspectArgs),
    CheckSql(CheckSqlArgs),
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = "evaluation/ground_truth_test_cases.json")]
    pub test_cases: PathBuf,

    #[arg(long, default_value = "transactions.db")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "qwen3:4b")]
    pub model: String,

    #[arg(long, default_value_t = false)]
    pub reasoning: bool,

    #[arg(long, conflicts_with = "replay")]
    pub agent_command: Option<String>,

    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    pub agent_args: Vec<String>,

    #[arg(long)]
    pub replay: Option<PathBuf>,

    #[arg(long)]
    pub agent_reset_command: Option<String>,

    #[arg(long, default_value_t = 300)]
    pub agent_timeout_secs: u64,

    #[arg(long, default_value = "evaluation/evaluation_report.txt")]
    pub report_path: PathBuf,

    #[arg(long, default_value = "evaluation/evaluation_results.json")]
    pub results_path: PathBuf,

    #[arg(long, default_value = DEFAULT_OWNER_COLUMN)]
    pub owner_column: String,

    #[arg(long, default_value = DEFAULT_ID_COLUMN)]
    pub id_column: String,

    #[arg(long = "test-id")]
    pub test_ids: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[arg(long)]
    pub transcript: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckSqlArgs {
    #[arg(long)]
    pub sql: String,

    #[arg(long)]
    pub owner_id: i64,

    #[arg(long, default_value = DEFAULT_OWNER_COLUMN)]
    pub owner_column: String,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
