pub mod clean;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod extract;
pub mod infer;
pub mod io_utils;
pub mod journal;
pub mod loader;
pub mod matcher;
pub mod orchestrator;
pub mod payload;
pub mod pipeline;
pub mod reconcile;
pub mod sanitize;
pub mod server;
pub mod store;
pub mod table;
pub mod warehouse;

use std::{env, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use encoding_rs::UTF_8;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::{PipelineConfig, Settings},
    journal::FacadeLog,
    matcher::{MatchOutcome, find_match},
    payload::Table,
    pipeline::{SyncContext, SyncOptions, TableComparison},
    reconcile::ReconcilePolicy,
    store::{DirectoryStore, ObjectStore},
    warehouse::DirectoryWarehouse,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("cloudpipe", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sanitize(args) => handle_sanitize(&args),
        Commands::Match(args) => handle_match(&args),
        Commands::Infer(args) => handle_infer(&args),
        Commands::Diff(args) => handle_diff(&args),
        Commands::Sync(args) => handle_sync(&args),
        Commands::Clean(args) => handle_clean(&args),
        Commands::Extract(args) => handle_extract(&args),
        Commands::Run(args) => handle_run(&args),
        Commands::Serve(args) => handle_serve(&args),
    }
}

fn load_config(args: &cli::ConfigArgs) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(&args.config_dir)
        .with_context(|| format!("Loading configuration from {:?}", args.config_dir))?;
    debug!(
        "Loaded {} mapping(s) and {} source(s) from {:?}",
        config.mappings.len(),
        config.sources.len(),
        config.dir
    );
    Ok(config)
}

fn handle_sanitize(args: &cli::SanitizeArgs) -> Result<()> {
    let settings = Settings::load_optional(&args.config.config_dir)?;
    let mut rules = settings.sanitize_rules()?;
    if let Some(case) = args.case {
        rules = rules.with_case_policy(case);
    }
    let labels = match &args.input {
        Some(path) => {
            let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
            let delimiter = io_utils::resolve_input_delimiter(path, args.delimiter);
            let mut reader =
                io_utils::open_csv_reader(io_utils::open_input(path)?, delimiter, true);
            io_utils::reader_headers(&mut reader, encoding)
                .with_context(|| format!("Reading headers from {path:?}"))?
        }
        None if args.labels.is_empty() => bail!("Provide labels or --input"),
        None => args.labels.clone(),
    };
    let identifiers = sanitize::sanitize_headers(&labels, &rules);
    let rows = labels
        .iter()
        .zip(&identifiers)
        .enumerate()
        .map(|(idx, (label, identifier))| {
            vec![(idx + 1).to_string(), label.clone(), identifier.to_string()]
        })
        .collect::<Vec<_>>();
    table::print_table(&["#", "label", "identifier"], &rows);
    Ok(())
}

fn handle_match(args: &cli::MatchArgs) -> Result<()> {
    let candidates = if args.candidates.is_empty() {
        let settings = Settings::load_optional(&args.config.config_dir)?;
        let store = DirectoryStore::new(args.config.config_dir.join(settings.blob_root()));
        store.list()?
    } else {
        args.candidates.clone()
    };
    match find_match(&args.name, &candidates) {
        MatchOutcome::Found { name, rule } => {
            println!("{name}\t{}", rule.as_str());
            Ok(())
        }
        MatchOutcome::NotFound => Err(anyhow!(
            "No object matches '{}' among {} candidate(s)",
            args.name,
            candidates.len()
        )),
    }
}

fn handle_infer(args: &cli::InferArgs) -> Result<()> {
    let settings = Settings::load_optional(&args.config.config_dir)?;
    let mut rules = settings.inference_rules()?;
    if let Some(size) = args.sample_size {
        rules = rules.with_sample_size(size);
    }
    if let Some(seed) = args.seed {
        rules = rules.with_seed(seed);
    }
    let sanitize_rules = settings.sanitize_rules()?;
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let mut table = Table::read_path(&args.input, args.delimiter, encoding)?;
    let labels = table.headers.clone();
    let identifiers = table.sanitize_headers(&sanitize_rules);
    info!(
        "Inferring {} column(s) from {} row(s) of {:?}",
        identifiers.len(),
        table.row_count(),
        args.input
    );
    let rows = identifiers
        .iter()
        .enumerate()
        .map(|(idx, identifier)| {
            let values = table.column_values(idx);
            vec![
                labels[idx].clone(),
                identifier.to_string(),
                infer::infer_type(identifier, &values, &rules).to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&["label", "identifier", "type"], &rows);
    Ok(())
}

fn handle_diff(args: &cli::DiffArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let mappings = config.select_mappings(&args.tables)?;
    let store = DirectoryStore::new(config.blob_root());
    let warehouse = DirectoryWarehouse::new(config.warehouse_root());
    let sanitize_rules = config.settings.sanitize_rules()?;
    let inference_rules = config.settings.inference_rules()?;

    let mut headers = vec!["target".to_string()];
    headers.extend(TableComparison::report_headers());
    let mut rows = Vec::new();
    let mut failures = 0usize;
    for mapping in &mappings {
        match pipeline::compare_table(&warehouse, &store, mapping, &sanitize_rules, &inference_rules)
        {
            Ok(comparison) => {
                if !comparison.target_exists {
                    warn!("{} does not exist yet", comparison.target);
                }
                for row in comparison.report_rows() {
                    let mut line = vec![comparison.target.clone()];
                    line.extend(row);
                    rows.push(line);
                }
            }
            Err(err) => {
                failures += 1;
                warn!("{}: {err}", mapping.target);
            }
        }
    }

    match &args.output {
        Some(path) => {
            let report = Table::new(
                headers,
                rows.into_iter()
                    .map(|row| row.into_iter().map(Some).collect())
                    .collect(),
            );
            let delimiter = io_utils::resolve_output_delimiter(Some(path), None);
            report.write_path(Some(path), delimiter, UTF_8)?;
            info!("Comparison written to {path:?}");
        }
        None => table::print_table(&headers, &rows),
    }
    if failures > 0 && failures == mappings.len() {
        bail!("No table could be compared");
    }
    Ok(())
}

fn handle_sync(args: &cli::SyncArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let mappings = config.select_mappings(&args.tables)?;
    let store = DirectoryStore::new(config.blob_root());
    let warehouse = DirectoryWarehouse::new(config.warehouse_root());
    let sanitize_rules = config.settings.sanitize_rules()?;
    let inference_rules = config.settings.inference_rules()?;
    let options = SyncOptions {
        policy: ReconcilePolicy {
            allow_drop: args.allow_drop || config.settings.allow_drop()?,
        },
        dry_run: args.dry_run,
    };
    let log = FacadeLog;
    let ctx = SyncContext {
        warehouse: &warehouse,
        store: &store,
        sanitize_rules: &sanitize_rules,
        inference_rules: &inference_rules,
        options,
        log: &log,
    };
    let summary = pipeline::run_sync(&ctx, &mappings);

    if summary.dry_run {
        for outcome in &summary.tables {
            for statement in &outcome.planned {
                println!("{statement};");
            }
        }
    }
    print!("{}", summary.render());
    if let Some(path) = &args.summary {
        summary.write_json(path)?;
        info!("Run summary written to {path:?}");
    }
    if summary.status.exit_code() != 0 {
        bail!("Schema sync failed for every table");
    }
    Ok(())
}

fn handle_clean(args: &cli::StageArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let store = DirectoryStore::new(config.blob_root());
    let outcomes = clean::run_clean(&store, &config.mappings, &FacadeLog)
        .with_context(|| format!("Cleaning objects in {:?}", store.root()))?;
    let failed = outcomes.iter().filter(|(_, o)| o.is_failure()).count();
    let rows = outcomes
        .iter()
        .map(|(target, outcome)| match outcome {
            clean::CleanOutcome::Cleaned { output, report, .. } => vec![
                target.clone(),
                "cleaned".to_string(),
                output.clone(),
                format!("{} of {}", report.output_rows, report.input_rows),
                format!(
                    "{} date(s), {} number(s)",
                    report.dates_converted, report.numbers_repaired
                ),
            ],
            clean::CleanOutcome::Skipped { reason } => vec![
                target.clone(),
                "skipped".to_string(),
                String::new(),
                reason.clone(),
                String::new(),
            ],
            clean::CleanOutcome::Failed { error } => vec![
                target.clone(),
                "failed".to_string(),
                String::new(),
                error.clone(),
                String::new(),
            ],
        })
        .collect::<Vec<_>>();
    table::print_table(&["target", "status", "output", "rows", "repaired"], &rows);
    if failed > 0 {
        bail!("{failed} table(s) could not be cleaned");
    }
    Ok(())
}

fn handle_extract(args: &cli::StageArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    if config.sources.is_empty() {
        info!("No extraction sources configured");
        return Ok(());
    }
    let store = DirectoryStore::new(config.blob_root());
    let outcomes = extract::run_extract(&config.sources, &config.settings, &store, &FacadeLog);
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    let rows = outcomes
        .iter()
        .map(|o| {
            vec![
                o.source.clone(),
                o.output.clone(),
                o.rows.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                o.error.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&["source", "output", "rows", "error"], &rows);
    if failed > 0 {
        bail!("{failed} source(s) failed to extract");
    }
    Ok(())
}

fn handle_run(args: &cli::RunArgs) -> Result<()> {
    let mut orchestrator = orchestrator::Orchestrator::for_current_exe(&args.config.config_dir)?
        .with_stages(args.stages.iter().map(|s| s.trim().to_string()));
    if args.allow_drop {
        orchestrator = orchestrator.with_sync_args(["--allow-drop"]);
    }
    let results = orchestrator.run(&FacadeLog);
    let rows = results
        .iter()
        .map(|r| {
            vec![
                r.stage.clone(),
                if r.success { "ok" } else { "failed" }.to_string(),
                r.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                format!("{} ms", r.duration_ms),
                r.stderr_tail.lines().last().unwrap_or_default().to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&["stage", "status", "exit", "duration", "last error"], &rows);
    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{failed} of {} stage(s) failed", results.len());
    }
    Ok(())
}

fn handle_serve(args: &cli::ServeArgs) -> Result<()> {
    let program = orchestrator::Orchestrator::for_current_exe(&args.config.config_dir)?
        .program()
        .to_path_buf();
    let config_dir = &args.config.config_dir;
    let settings = Settings::load_optional(config_dir)
        .with_context(|| format!("Loading configuration from {config_dir:?}"))?;
    let store = DirectoryStore::new(config_dir.join(settings.blob_root()));
    let state = server::AppState::new(
        server::Launcher {
            program,
            config_dir: config_dir.clone(),
        },
        Arc::new(store),
        Arc::new(FacadeLog),
    );
    server::run_blocking(args.bind, state)
}
