use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use emissor_types::{Environment, Money};

#[derive(Parser, Debug)]
#[command(
    name = "emissor",
    about = "Emit, sign, submit and audit NFS-e service invoices",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file.
    #[arg(long, global = true, env = "EMISSOR_CONFIG", default_value = "emissor.toml")]
    pub config: PathBuf,

    /// Overrides `data_dir` from the configuration file.
    #[arg(long, global = true, env = "EMISSOR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Overrides `environment` from the configuration file.
    #[arg(long = "env", global = true)]
    pub environment: Option<Environment>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build, sign and submit a document for a configured client
    Emit(EmitArgs),
    /// List ledger entries
    List(ListArgs),
    /// Show the most recent entry for a client
    LastOverride(LastOverrideArgs),
    /// Inspect or move the sequence counter
    Sequence(SequenceArgs),
    /// Compare the counter with the ledger
    Audit,
    /// Create a development signing credential and trust store
    Keygen(KeygenArgs),
}

#[derive(Args, Debug)]
pub struct EmitArgs {
    /// Client id as configured under `[[clients]]`.
    #[arg(long)]
    pub client: String,

    /// Intermediary, given as a client id from `[[clients]]`.
    #[arg(long)]
    pub intermediary: Option<String>,

    /// Service description for a single-line invoice.
    #[arg(long, requires = "amount")]
    pub description: Option<String>,

    /// Amount in BRL, e.g. `1500.00`.
    #[arg(long, requires_all = ["description", "foreign_amount"])]
    pub amount: Option<Money>,

    /// Amount in the foreign currency.
    #[arg(long)]
    pub foreign_amount: Option<Money>,

    /// Extra line as `DESCRIPTION:AMOUNT:FOREIGN_AMOUNT`. Repeatable.
    #[arg(long = "line", value_parser = parse_line)]
    pub lines: Vec<LineSpec>,

    /// Competence date (`YYYY-MM-DD`). Defaults to today.
    #[arg(long)]
    pub competence: Option<NaiveDate>,

    /// Override as `KEY=VALUE`. Repeatable.
    #[arg(long = "set", value_parser = parse_override)]
    pub overrides: Vec<(String, String)>,

    /// Do not start from the client's previous overrides.
    #[arg(long)]
    pub fresh: bool,

    /// Sign and export without submitting; the number is withdrawn.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,

    /// Where dry-run exports are written. Defaults to `export_dir` from the configuration.
    #[arg(long)]
    pub export_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineSpec {
    pub description: String,
    pub amount: Money,
    pub foreign_amount: Money,
}

fn parse_line(raw: &str) -> Result<LineSpec, String> {
    let mut parts = raw.rsplitn(3, ':');
    let (Some(foreign), Some(amount), Some(description)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err("expected DESCRIPTION:AMOUNT:FOREIGN_AMOUNT".to_string());
    };
    if description.trim().is_empty() {
        return Err("line description is empty".to_string());
    }
    Ok(LineSpec {
        description: description.trim().to_string(),
        amount: amount.parse().map_err(|e| format!("{e}"))?,
        foreign_amount: foreign.parse().map_err(|e| format!("{e}"))?,
    })
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err("expected KEY=VALUE".to_string()),
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub client: Option<String>,

    /// Only entries in this state (`draft`, `confirmed`, `failed`).
    #[arg(long)]
    pub status: Option<String>,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct LastOverrideArgs {
    pub client: String,
}

#[derive(Args, Debug)]
pub struct SequenceArgs {
    #[command(subcommand)]
    pub action: SequenceAction,
}

#[derive(Subcommand, Debug)]
pub enum SequenceAction {
    /// Print the last allocated number and the next one
    Show,
    /// Move the counter forward; the next document gets VALUE + 1
    Set { value: u64 },
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Directory for `credential.json` and `trust.json`.
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Certificate subject. Defaults to the configured issuer's legal name.
    #[arg(long)]
    pub subject: Option<String>,

    #[arg(long, default_value_t = 365)]
    pub days: i64,

    /// Replace existing files.
    #[arg(long)]
    pub force: bool,
}
