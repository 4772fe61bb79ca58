//! Schema-sync stage: for every mapped table, resolve its source file, shape
//! the payload, reconcile the target schema, load, and verify.
//!
//! Tables are processed one after another and independently. Whatever goes
//! wrong with one table is recorded in its [`TableOutcome`] and the next table
//! is still attempted; the [`RunSummary`] rolls these up into a run status.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use encoding_rs::UTF_8;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::TableMapping,
    diff::{SchemaDiff, diff},
    error::PipelineError,
    infer::{ColumnType, InferenceRules, infer_type},
    io_utils::DEFAULT_CSV_DELIMITER,
    journal::{PipelineLog, Stage},
    loader::{LoadReport, load_table},
    matcher::{MatchOutcome, MatchRule, find_match},
    payload::Table,
    reconcile::{ReconcilePolicy, ReconciliationOutcome, plan, reconcile},
    sanitize::{CanonicalIdentifier, SanitizeRules},
    store::ObjectStore,
    table::render_table,
    warehouse::{ColumnDef, TableRef, Warehouse, sql},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub policy: ReconcilePolicy,
    /// Plan and report without altering or loading anything.
    pub dry_run: bool,
}

/// Collaborators and rules for one schema-sync run.
pub struct SyncContext<'a> {
    pub warehouse: &'a dyn Warehouse,
    pub store: &'a dyn ObjectStore,
    pub sanitize_rules: &'a SanitizeRules,
    pub inference_rules: &'a InferenceRules,
    pub options: SyncOptions,
    pub log: &'a dyn PipelineLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    Partial,
    Failed,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Success => "success",
            TableStatus::Partial => "partial",
            TableStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial_success",
            RunStatus::Failure => "failure",
        }
    }

    /// Process exit code: only a run in which no table succeeded fails.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Failure => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&PipelineError> for ItemError {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub logical_name: String,
    pub target: String,
    pub source: Option<String>,
    pub match_rule: Option<MatchRule>,
    pub status: TableStatus,
    pub created: bool,
    /// Statements a dry run would have issued.
    pub planned: Vec<String>,
    pub reconciliation: Option<ReconciliationOutcome>,
    pub load: Option<LoadReport>,
    pub error: Option<ItemError>,
}

impl TableOutcome {
    fn new(mapping: &TableMapping) -> Self {
        Self {
            logical_name: mapping.source_name.clone(),
            target: mapping.target.to_string(),
            source: None,
            match_rule: None,
            status: TableStatus::Success,
            created: false,
            planned: Vec::new(),
            reconciliation: None,
            load: None,
            error: None,
        }
    }

    fn fail(mut self, err: PipelineError) -> Self {
        self.status = TableStatus::Failed;
        self.error = Some(ItemError::from(&err));
        self
    }

    fn settle_status(&mut self) {
        if self.error.is_some() {
            self.status = TableStatus::Failed;
        } else if self
            .reconciliation
            .as_ref()
            .is_some_and(|outcome| !outcome.is_complete())
        {
            self.status = TableStatus::Partial;
        } else {
            self.status = TableStatus::Success;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub status: RunStatus,
    pub tables: Vec<TableOutcome>,
}

impl RunSummary {
    pub fn status_for(tables: &[TableOutcome]) -> RunStatus {
        if tables.is_empty() || tables.iter().all(|t| t.status == TableStatus::Failed) {
            RunStatus::Failure
        } else if tables.iter().all(|t| t.status == TableStatus::Success) {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        }
    }

    pub fn failed_tables(&self) -> Vec<&TableOutcome> {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Success)
            .collect()
    }

    pub fn render(&self) -> String {
        let headers = ["target", "source", "status", "added", "dropped", "failed", "rows", "note"]
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();
        let rows = self
            .tables
            .iter()
            .map(|t| {
                let (added, dropped, failed) = t
                    .reconciliation
                    .as_ref()
                    .map(|r| (r.added.len(), r.dropped.len(), r.failed.len()))
                    .unwrap_or((0, 0, 0));
                let rows = t
                    .load
                    .as_ref()
                    .map(|l| l.rows_written.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let note = match (&t.error, t.created, self.dry_run) {
                    (Some(err), _, _) => err.message.clone(),
                    (None, true, _) => "created".to_string(),
                    (None, false, true) => format!("{} planned statement(s)", t.planned.len()),
                    _ => String::new(),
                };
                vec![
                    t.target.clone(),
                    t.source.clone().unwrap_or_else(|| "-".to_string()),
                    t.status.as_str().to_string(),
                    added.to_string(),
                    dropped.to_string(),
                    failed.to_string(),
                    rows,
                    note,
                ]
            })
            .collect::<Vec<_>>();
        let mut rendered = render_table(&headers, &rows);
        rendered.push_str(&format!(
            "run {} finished with status {}\n",
            self.run_id,
            self.status.as_str()
        ));
        rendered
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Serializing run summary")?;
        std::fs::write(path, json).with_context(|| format!("Writing run summary to {path:?}"))
    }
}

/// A source payload matched, read, and given canonical headers.
pub struct PreparedPayload {
    pub source: String,
    pub rule: MatchRule,
    pub table: Table,
    pub identifiers: Vec<CanonicalIdentifier>,
}

/// Resolves, reads, and sanitizes the source file for `mapping`.
pub fn prepare_payload(
    store: &dyn ObjectStore,
    available: &[String],
    mapping: &TableMapping,
    rules: &SanitizeRules,
) -> Result<PreparedPayload, PipelineError> {
    let (source, rule) = match find_match(&mapping.source_name, available) {
        MatchOutcome::Found { name, rule } => (name, rule),
        MatchOutcome::NotFound => {
            return Err(PipelineError::NameResolution {
                logical_name: mapping.source_name.clone(),
            });
        }
    };
    let payload_error = |err: anyhow::Error| PipelineError::Payload {
        name: source.clone(),
        message: format!("{err:#}"),
    };
    let bytes = store.get(&source).map_err(payload_error)?;
    let mut table = Table::from_bytes(&bytes, DEFAULT_CSV_DELIMITER, UTF_8).map_err(payload_error)?;
    let identifiers = table.sanitize_headers(rules);
    Ok(PreparedPayload {
        source,
        rule,
        table,
        identifiers,
    })
}

/// Type decisions for `columns`, inferred from the payload.
pub fn infer_decisions<'a>(
    payload: &PreparedPayload,
    columns: impl IntoIterator<Item = &'a CanonicalIdentifier>,
    rules: &InferenceRules,
) -> BTreeMap<CanonicalIdentifier, ColumnType> {
    columns
        .into_iter()
        .filter_map(|column| {
            let idx = payload.identifiers.iter().position(|id| id == column)?;
            let values = payload.table.column_values(idx);
            Some((column.clone(), infer_type(column, &values, rules)))
        })
        .collect()
}

pub fn run_sync(ctx: &SyncContext<'_>, mappings: &[TableMapping]) -> RunSummary {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    ctx.log.info(
        Stage::SchemaSync,
        &format!(
            "Run {run_id}: syncing {} table(s){}",
            mappings.len(),
            if ctx.options.dry_run { " (dry run)" } else { "" }
        ),
    );

    let tables: Vec<TableOutcome> = match ctx.store.list() {
        Ok(available) => mappings
            .iter()
            .map(|mapping| sync_table(ctx, mapping, &available))
            .collect(),
        Err(err) => {
            ctx.log
                .error(Stage::SchemaSync, &format!("Object store unavailable: {err:#}"));
            mappings
                .iter()
                .map(|mapping| {
                    TableOutcome::new(mapping).fail(PipelineError::Connectivity {
                        system: "object store".to_string(),
                        message: format!("{err:#}"),
                    })
                })
                .collect()
        }
    };

    let status = RunSummary::status_for(&tables);
    ctx.log.info(
        Stage::SchemaSync,
        &format!("Run {run_id} finished: {}", status.as_str()),
    );
    RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        dry_run: ctx.options.dry_run,
        status,
        tables,
    }
}

fn sync_table(ctx: &SyncContext<'_>, mapping: &TableMapping, available: &[String]) -> TableOutcome {
    let mut outcome = TableOutcome::new(mapping);
    let target = &mapping.target;

    let payload = match prepare_payload(ctx.store, available, mapping, ctx.sanitize_rules) {
        Ok(payload) => payload,
        Err(err) => {
            ctx.log.error(Stage::SchemaSync, &err.to_string());
            return outcome.fail(err);
        }
    };
    ctx.log.info(
        Stage::SchemaSync,
        &format!(
            "{target}: using {} ({} match, {} row(s), {} column(s))",
            payload.source,
            payload.rule.as_str(),
            payload.table.row_count(),
            payload.identifiers.len()
        ),
    );
    outcome.source = Some(payload.source.clone());
    outcome.match_rule = Some(payload.rule);

    let exists = match ctx.warehouse.table_exists(target) {
        Ok(exists) => exists,
        Err(err) => {
            let err = PipelineError::Connectivity {
                system: "warehouse".to_string(),
                message: err.to_string(),
            };
            ctx.log.error(Stage::SchemaSync, &err.to_string());
            return outcome.fail(err);
        }
    };

    if exists {
        if let Err(err) = reconcile_existing(ctx, target, &payload, &mut outcome) {
            ctx.log.error(Stage::SchemaSync, &err.to_string());
            return outcome.fail(err);
        }
    } else if let Err(err) = create_target(ctx, target, &payload, &mut outcome) {
        ctx.log.error(Stage::SchemaSync, &err.to_string());
        return outcome.fail(err);
    }

    if !ctx.options.dry_run {
        match load_table(
            ctx.warehouse,
            target,
            &payload.table,
            mapping.estimated_row_count,
            ctx.log,
        ) {
            Ok(report) => outcome.load = Some(report),
            Err(err) => {
                ctx.log.error(Stage::Load, &err.to_string());
                outcome.error = Some(ItemError::from(&err));
            }
        }
    }

    outcome.settle_status();
    outcome
}

fn create_target(
    ctx: &SyncContext<'_>,
    target: &TableRef,
    payload: &PreparedPayload,
    outcome: &mut TableOutcome,
) -> Result<(), PipelineError> {
    let decisions = infer_decisions(payload, &payload.identifiers, ctx.inference_rules);
    let columns: Vec<ColumnDef> = payload
        .identifiers
        .iter()
        .map(|id| {
            let data_type = decisions.get(id).copied().unwrap_or(ColumnType::Varchar {
                length: crate::infer::DEFAULT_VARCHAR_LENGTH,
            });
            ColumnDef::new(id.clone(), data_type)
        })
        .collect();
    let statement = sql::create_table(target, &columns);
    if ctx.options.dry_run {
        outcome.planned.push(statement);
        return Ok(());
    }
    ctx.warehouse
        .create_table(target, &columns)
        .map_err(|source| PipelineError::TableCreation {
            table: target.to_string(),
            source,
        })?;
    ctx.log
        .info(Stage::SchemaSync, &format!("Applied: {statement}"));
    outcome.created = true;
    Ok(())
}

fn reconcile_existing(
    ctx: &SyncContext<'_>,
    target: &TableRef,
    payload: &PreparedPayload,
    outcome: &mut TableOutcome,
) -> Result<(), PipelineError> {
    let current = current_columns(ctx.warehouse, target)?;
    let diff_result = diff(&current, &payload.identifiers);
    ctx.log.info(
        Stage::SchemaSync,
        &format!(
            "{target}: {} matching, {} missing in target, {} extra in target",
            diff_result.matching_count(),
            diff_result.missing_count(),
            diff_result.extra_count()
        ),
    );
    let decisions = infer_decisions(
        payload,
        &diff_result.missing_in_target,
        ctx.inference_rules,
    );

    if ctx.options.dry_run {
        outcome.planned = plan(&diff_result, &decisions, ctx.options.policy).statements(target);
        return Ok(());
    }
    if diff_result.is_aligned() {
        outcome.reconciliation = Some(ReconciliationOutcome {
            residual: Some(diff_result),
            ..Default::default()
        });
        return Ok(());
    }
    outcome.reconciliation = Some(reconcile(
        ctx.warehouse,
        target,
        &diff_result,
        &decisions,
        &payload.identifiers,
        ctx.options.policy,
        ctx.log,
    ));
    Ok(())
}

fn current_columns(
    warehouse: &dyn Warehouse,
    target: &TableRef,
) -> Result<Vec<CanonicalIdentifier>, PipelineError> {
    let columns = warehouse
        .list_columns(target)
        .map_err(|err| PipelineError::Connectivity {
            system: "warehouse".to_string(),
            message: err.to_string(),
        })?;
    Ok(columns.into_iter().map(|column| column.name).collect())
}

/// Per-column comparison status used by the `diff` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnStatus {
    Match,
    MissingInTarget,
    ExtraInTarget,
}

impl ColumnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnStatus::Match => "MATCH",
            ColumnStatus::MissingInTarget => "MISSING_IN_TARGET",
            ColumnStatus::ExtraInTarget => "EXTRA_IN_TARGET",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnComparison {
    pub column: CanonicalIdentifier,
    pub status: ColumnStatus,
    pub target_type: Option<ColumnType>,
    pub inferred_type: Option<ColumnType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableComparison {
    pub target: String,
    pub source: String,
    pub target_exists: bool,
    pub diff: SchemaDiff,
    pub columns: Vec<ColumnComparison>,
}

/// Compares a mapping's source file against its target table without changing either.
pub fn compare_table(
    warehouse: &dyn Warehouse,
    store: &dyn ObjectStore,
    mapping: &TableMapping,
    sanitize_rules: &SanitizeRules,
    inference_rules: &InferenceRules,
) -> Result<TableComparison, PipelineError> {
    let available = store.list().map_err(|err| PipelineError::Connectivity {
        system: "object store".to_string(),
        message: format!("{err:#}"),
    })?;
    let payload = prepare_payload(store, &available, mapping, sanitize_rules)?;
    let target = &mapping.target;
    let target_exists = warehouse
        .table_exists(target)
        .map_err(|err| PipelineError::Connectivity {
            system: "warehouse".to_string(),
            message: err.to_string(),
        })?;
    let declared: Vec<ColumnDef> = if target_exists {
        warehouse
            .list_columns(target)
            .map_err(|err| PipelineError::Connectivity {
                system: "warehouse".to_string(),
                message: err.to_string(),
            })?
    } else {
        Vec::new()
    };
    let current: Vec<CanonicalIdentifier> = declared.iter().map(|c| c.name.clone()).collect();
    let diff_result = diff(&current, &payload.identifiers);
    let inferred = infer_decisions(&payload, &payload.identifiers, inference_rules);
    let declared_type = |column: &CanonicalIdentifier| {
        declared
            .iter()
            .find(|c| &c.name == column)
            .map(|c| c.data_type)
    };

    let mut columns = Vec::new();
    for (set, status) in [
        (&diff_result.matching, ColumnStatus::Match),
        (&diff_result.missing_in_target, ColumnStatus::MissingInTarget),
        (&diff_result.extra_in_target, ColumnStatus::ExtraInTarget),
    ] {
        for column in set {
            columns.push(ColumnComparison {
                column: column.clone(),
                status,
                target_type: declared_type(column),
                inferred_type: inferred.get(column).copied(),
            });
        }
    }
    columns.sort_by(|a, b| a.column.cmp(&b.column));

    Ok(TableComparison {
        target: target.to_string(),
        source: payload.source,
        target_exists,
        diff: diff_result,
        columns,
    })
}

impl TableComparison {
    pub fn report_headers() -> Vec<String> {
        ["column", "status", "target_type", "inferred_type"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    pub fn report_rows(&self) -> Vec<Vec<String>> {
        self.columns
            .iter()
            .map(|c| {
                vec![
                    c.column.to_string(),
                    c.status.as_str().to_string(),
                    c.target_type.map(|t| t.to_string()).unwrap_or_default(),
                    c.inferred_type.map(|t| t.to_string()).unwrap_or_default(),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        journal::MemoryLog,
        loader::Verification,
        store::DirectoryStore,
        warehouse::MemoryWarehouse,
    };
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        store: DirectoryStore,
        warehouse: MemoryWarehouse,
        sanitize_rules: SanitizeRules,
        inference_rules: InferenceRules,
        log: MemoryLog,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().expect("temp dir");
            let store = DirectoryStore::new(dir.path());
            Self {
                _dir: dir,
                store,
                warehouse: MemoryWarehouse::new(),
                sanitize_rules: SanitizeRules::default(),
                inference_rules: InferenceRules::default(),
                log: MemoryLog::new(),
            }
        }

        fn run(&self, mappings: &[TableMapping], options: SyncOptions) -> RunSummary {
            let ctx = SyncContext {
                warehouse: &self.warehouse,
                store: &self.store,
                sanitize_rules: &self.sanitize_rules,
                inference_rules: &self.inference_rules,
                options,
                log: &self.log,
            };
            run_sync(&ctx, mappings)
        }
    }

    fn mapping(target: &str, source: &str) -> TableMapping {
        TableMapping::new(target.parse().unwrap(), source)
    }

    #[test]
    fn row_count_mismatch_is_reported_but_table_succeeds() {
        let fixture = Fixture::new();
        fixture
            .store
            .put("projects.csv", b"Scoop ID\n1\n2\n")
            .unwrap();
        let target: TableRef = "LWS.PUBLIC.PROJECTS".parse().unwrap();
        fixture.warehouse.override_row_count(&target, 99);
        let mut projects = mapping("LWS.PUBLIC.PROJECTS", "projects");
        projects.estimated_row_count = Some(2);

        let summary = fixture.run(&[projects], SyncOptions::default());
        assert_eq!(summary.status, RunStatus::Success);
        let outcome = &summary.tables[0];
        assert_eq!(outcome.status, TableStatus::Success);
        assert_eq!(outcome.load.as_ref().unwrap().rows_written, 2);
        assert_eq!(
            outcome.load.as_ref().unwrap().verification,
            Verification::Mismatch {
                expected: 2,
                actual: 99
            }
        );
        assert!(fixture.log.contains("expected 2, found 99"));
    }

    #[test]
    fn creates_missing_table_from_inferred_types() {
        let fixture = Fixture::new();
        fixture
            .store
            .put(
                "Projects.csv",
                b"Scoop ID,Install Date,Contract Amount\n1,2024-01-05,1200\n2,2024-02-10,950\n",
            )
            .unwrap();
        let summary = fixture.run(
            &[mapping("LWS.PUBLIC.PROJECTS", "projects")],
            SyncOptions::default(),
        );

        assert_eq!(summary.status, RunStatus::Success);
        let outcome = &summary.tables[0];
        assert!(outcome.created);
        assert_eq!(outcome.source.as_deref(), Some("Projects.csv"));
        let columns = fixture
            .warehouse
            .list_columns(&"LWS.PUBLIC.PROJECTS".parse().unwrap())
            .unwrap();
        assert_eq!(
            columns
                .iter()
                .map(|c| (c.name.as_str(), c.data_type))
                .collect::<Vec<_>>(),
            vec![
                ("Scoop_ID", ColumnType::Number { precision: 1 }),
                ("Install_Date", ColumnType::Date),
                ("Contract_Amount", ColumnType::Number { precision: 4 }),
            ]
        );
        assert_eq!(outcome.load.as_ref().unwrap().rows_written, 2);
    }

    #[test]
    fn unmatched_source_fails_only_that_table() {
        let fixture = Fixture::new();
        fixture.store.put("leads.csv", b"id\n1\n").unwrap();
        let summary = fixture.run(
            &[
                mapping("LWS.PUBLIC.GHOST", "ghost_table"),
                mapping("LWS.PUBLIC.LEADS", "leads"),
            ],
            SyncOptions::default(),
        );
        assert_eq!(summary.status, RunStatus::PartialSuccess);
        assert_eq!(summary.tables[0].status, TableStatus::Failed);
        assert_eq!(
            summary.tables[0].error.as_ref().unwrap().kind,
            "name_resolution"
        );
        assert_eq!(summary.tables[1].status, TableStatus::Success);
        assert_eq!(summary.failed_tables().len(), 1);
    }

    #[test]
    fn all_failed_is_total_failure() {
        let fixture = Fixture::new();
        let summary = fixture.run(
            &[mapping("LWS.PUBLIC.GHOST", "ghost")],
            SyncOptions::default(),
        );
        assert_eq!(summary.status, RunStatus::Failure);
        assert_eq!(summary.status.exit_code(), 1);
        assert_eq!(RunSummary::status_for(&[]), RunStatus::Failure);
    }

    #[test]
    fn rejected_column_makes_table_partial() {
        let fixture = Fixture::new();
        let target: TableRef = "LWS.PUBLIC.LEADS".parse().unwrap();
        let fixture = Fixture {
            warehouse: MemoryWarehouse::new().with_table(
                &target,
                vec![ColumnDef::new(
                    CanonicalIdentifier::from_existing("ID"),
                    ColumnType::Number { precision: 10 },
                )],
                Vec::new(),
            ),
            ..fixture
        };
        fixture.warehouse.reject_column(&target, "NOTES", "blocked by view");
        fixture
            .store
            .put("leads.csv", b"id,notes,owner\n1,hello,Ann\n")
            .unwrap();
        let summary = fixture.run(&[mapping("LWS.PUBLIC.LEADS", "leads")], SyncOptions::default());

        let outcome = &summary.tables[0];
        assert_eq!(outcome.status, TableStatus::Partial);
        assert_eq!(summary.status, RunStatus::PartialSuccess);
        let reconciliation = outcome.reconciliation.as_ref().unwrap();
        assert_eq!(reconciliation.added.len(), 1);
        assert_eq!(reconciliation.failed.len(), 1);
        let load = outcome.load.as_ref().unwrap();
        assert_eq!(load.skipped_columns, ["notes"]);
        assert_eq!(
            fixture.warehouse.rows(&target).unwrap(),
            vec![vec![Some("1".to_string()), Some("Ann".to_string())]]
        );
    }

    #[test]
    fn dry_run_plans_without_mutating() {
        let fixture = Fixture::new();
        fixture.store.put("leads.csv", b"id,name\n1,Ann\n").unwrap();
        let summary = fixture.run(
            &[mapping("LWS.PUBLIC.LEADS", "leads")],
            SyncOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        let outcome = &summary.tables[0];
        assert!(summary.dry_run);
        assert_eq!(outcome.planned.len(), 1);
        assert!(outcome.planned[0].starts_with("CREATE TABLE LWS.PUBLIC.LEADS"));
        assert!(outcome.load.is_none());
        assert!(fixture.warehouse.table_names().is_empty());
    }

    #[test]
    fn comparison_reports_each_column() {
        let fixture = Fixture::new();
        let target: TableRef = "LWS.PUBLIC.LEADS".parse().unwrap();
        let fixture = Fixture {
            warehouse: MemoryWarehouse::new().with_table(
                &target,
                vec![
                    ColumnDef::new(
                        CanonicalIdentifier::from_existing("ID"),
                        ColumnType::Number { precision: 10 },
                    ),
                    ColumnDef::new(
                        CanonicalIdentifier::from_existing("LEGACY"),
                        ColumnType::Varchar { length: 50 },
                    ),
                ],
                Vec::new(),
            ),
            ..fixture
        };
        fixture.store.put("leads.csv", b"id,notes\n1,hi\n").unwrap();
        let comparison = compare_table(
            &fixture.warehouse,
            &fixture.store,
            &mapping("LWS.PUBLIC.LEADS", "leads"),
            &fixture.sanitize_rules,
            &fixture.inference_rules,
        )
        .unwrap();
        let rows = comparison.report_rows();
        assert_eq!(
            rows,
            vec![
                vec!["ID", "MATCH", "NUMBER(10)", "NUMBER(1)"],
                vec!["LEGACY", "EXTRA_IN_TARGET", "VARCHAR(50)", ""],
                vec!["notes", "MISSING_IN_TARGET", "", "VARCHAR(50)"],
            ]
        );
    }

    #[test]
    fn summary_serializes_and_renders() {
        let fixture = Fixture::new();
        fixture.store.put("leads.csv", b"id\n1\n").unwrap();
        let summary = fixture.run(&[mapping("LWS.PUBLIC.LEADS", "leads")], SyncOptions::default());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["tables"][0]["target"], "LWS.PUBLIC.LEADS");
        let rendered = summary.render();
        assert!(rendered.contains("LWS.PUBLIC.LEADS"));
        assert!(rendered.contains("finished with status success"));
    }
}
