use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::{config::DEFAULT_CONFIG_DIR, sanitize::CasePolicy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Normalize SaaS exports and reconcile warehouse table schemas before loading",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sanitize column labels (or a CSV header row) into warehouse identifiers
    Sanitize(SanitizeArgs),
    /// Resolve a logical table name against the objects in the store
    Match(MatchArgs),
    /// Infer warehouse column types for a CSV file
    Infer(InferArgs),
    /// Compare mapped source files with their target tables
    Diff(DiffArgs),
    /// Reconcile target schemas and load every mapped table
    Sync(SyncArgs),
    /// Clean raw exports in the object store
    Clean(StageArgs),
    /// Pull records from configured HTTP sources into the object store
    Extract(StageArgs),
    /// Run extract, clean, and sync as separate processes
    Run(RunArgs),
    /// Serve the control API
    Serve(ServeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Directory holding settings.json, table_mapping.json, and sources.json
    #[arg(long = "config-dir", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct SanitizeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Labels to sanitize, disambiguated as one header row
    pub labels: Vec<String>,
    /// Read the labels from this CSV file's header row instead
    #[arg(short = 'i', long = "input", conflicts_with = "labels")]
    pub input: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Identifier case policy; overrides IDENTIFIER_CASE
    #[arg(long = "case", value_parser = parse_case_policy)]
    pub case: Option<CasePolicy>,
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Logical table name, e.g. `projects`
    pub name: String,
    /// Candidate object names; the object store is listed when omitted
    #[arg(long = "candidates", value_delimiter = ',')]
    pub candidates: Vec<String>,
}

#[derive(Debug, Args)]
pub struct InferArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Input CSV file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Maximum values sampled per column; overrides INFER_SAMPLE_SIZE
    #[arg(long = "sample-size")]
    pub sample_size: Option<usize>,
    /// Sampling seed; overrides INFER_SEED
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Restrict to these target tables (DATABASE.SCHEMA.TABLE)
    #[arg(long = "table", action = clap::ArgAction::Append)]
    pub tables: Vec<String>,
    /// Write the comparison as CSV instead of printing a table
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Restrict to these target tables (DATABASE.SCHEMA.TABLE)
    #[arg(long = "table", action = clap::ArgAction::Append)]
    pub tables: Vec<String>,
    /// Print planned statements without altering or loading anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Drop target columns absent from the incoming data (snapshot taken first)
    #[arg(long = "allow-drop")]
    pub allow_drop: bool,
    /// Write the run summary as JSON to this path
    #[arg(long = "summary")]
    pub summary: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StageArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Stages to run, in order
    #[arg(long = "stages", value_delimiter = ',', default_value = "extract,clean,sync")]
    pub stages: Vec<String>,
    /// Forward --allow-drop to the sync stage
    #[arg(long = "allow-drop")]
    pub allow_drop: bool,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,
}

pub fn parse_case_policy(value: &str) -> Result<CasePolicy, String> {
    value.parse().map_err(|err: anyhow::Error| err.to_string())
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_names_and_characters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("|"), Ok(b'|'));
        assert_eq!(parse_delimiter("#"), Ok(b'#'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "cloudpipe",
            "sync",
            "--config-dir",
            "cfg",
            "--dry-run",
            "--table",
            "LWS.PUBLIC.LEADS",
        ])
        .unwrap();
        let Commands::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert!(args.dry_run);
        assert!(!args.allow_drop);
        assert_eq!(args.config.config_dir, PathBuf::from("cfg"));
        assert_eq!(args.tables, ["LWS.PUBLIC.LEADS"]);
    }

    #[test]
    fn run_defaults_to_all_stages() {
        let cli = Cli::try_parse_from(["cloudpipe", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.stages, ["extract", "clean", "sync"]);
        assert_eq!(args.config.config_dir, PathBuf::from(DEFAULT_CONFIG_DIR));
    }
}
