//! Schema reconciliation: bringing a target table's columns in line with an
//! incoming column set.
//!
//! Adds run before drops and each group runs in lexicographic order of the
//! comparison key, so two runs against the same inputs issue the same
//! statements. A failed alteration is recorded and the remaining ones are
//! still attempted. Before the first drop the table is snapshotted; when the
//! snapshot cannot be taken no column is dropped.
//!
//! There is no transaction around the alterations. A table can be left
//! partially altered, which the returned [`ReconciliationOutcome`] reports
//! together with a residual diff computed from a fresh listing of the target.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    diff::{SchemaDiff, diff},
    error::PipelineError,
    infer::{ColumnType, DEFAULT_VARCHAR_LENGTH},
    journal::{PipelineLog, Stage},
    sanitize::CanonicalIdentifier,
    warehouse::{ColumnDef, TableRef, Warehouse, sql},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePolicy {
    /// Drop target columns absent from the incoming data. Off by default.
    pub allow_drop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterationKind {
    AddColumn,
    DropColumn,
}

impl AlterationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlterationKind::AddColumn => "add column",
            AlterationKind::DropColumn => "drop column",
        }
    }
}

/// The alterations a reconciliation pass would issue, in issue order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub adds: Vec<ColumnDef>,
    pub drops: Vec<CanonicalIdentifier>,
    /// Extra target columns kept because dropping is disabled.
    pub retained: Vec<CanonicalIdentifier>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.drops.is_empty()
    }

    /// SQL for every planned alteration; a clone statement precedes drops.
    ///
    /// The clone is named as a snapshot taken now would be.
    pub fn statements(&self, table: &TableRef) -> Vec<String> {
        self.statements_at(table, &crate::warehouse::snapshot_stamp())
    }

    /// Like [`ReconcilePlan::statements`] with the snapshot stamped `stamp`.
    pub fn statements_at(&self, table: &TableRef, stamp: &str) -> Vec<String> {
        let mut statements: Vec<String> = self
            .adds
            .iter()
            .map(|column| sql::add_column(table, column))
            .collect();
        if !self.drops.is_empty() {
            let snapshot = crate::warehouse::snapshot_ref(table, stamp, 0);
            statements.push(sql::clone_table(&snapshot, table));
            statements.extend(self.drops.iter().map(|column| sql::drop_column(table, column)));
        }
        statements
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlterationFailure {
    pub column: CanonicalIdentifier,
    pub operation: AlterationKind,
    pub statement: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub added: Vec<ColumnDef>,
    pub dropped: Vec<CanonicalIdentifier>,
    pub retained: Vec<CanonicalIdentifier>,
    pub failed: Vec<AlterationFailure>,
    /// Backup taken before dropping, if any drop was attempted.
    pub snapshot: Option<TableRef>,
    /// Diff against the target as listed after all alterations.
    pub residual: Option<SchemaDiff>,
    /// Why the residual could not be computed.
    pub residual_error: Option<String>,
}

impl ReconciliationOutcome {
    /// Every planned alteration succeeded and the residual shows no missing
    /// column. Retained extras do not count against completeness.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
            && self.residual_error.is_none()
            && self
                .residual
                .as_ref()
                .is_some_and(|residual| residual.missing_in_target.is_empty())
    }
}

/// Works out which alterations a diff calls for.
///
/// Added columns take their type from `decisions`; a column without a decision
/// is added as `VARCHAR(255)`.
pub fn plan(
    diff: &SchemaDiff,
    decisions: &BTreeMap<CanonicalIdentifier, ColumnType>,
    policy: ReconcilePolicy,
) -> ReconcilePlan {
    let adds = diff
        .missing_in_target
        .iter()
        .map(|column| {
            let data_type = decisions.get(column).copied().unwrap_or(ColumnType::Varchar {
                length: DEFAULT_VARCHAR_LENGTH,
            });
            ColumnDef::new(column.clone(), data_type)
        })
        .collect();
    let extras: Vec<CanonicalIdentifier> = diff.extra_in_target.iter().cloned().collect();
    let (drops, retained) = if policy.allow_drop {
        (extras, Vec::new())
    } else {
        (Vec::new(), extras)
    };
    ReconcilePlan {
        adds,
        drops,
        retained,
    }
}

/// Applies `plan(diff, decisions, policy)` to `table` and reports the result.
pub fn reconcile(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    diff_result: &SchemaDiff,
    decisions: &BTreeMap<CanonicalIdentifier, ColumnType>,
    incoming: &[CanonicalIdentifier],
    policy: ReconcilePolicy,
    log: &dyn PipelineLog,
) -> ReconciliationOutcome {
    let plan = plan(diff_result, decisions, policy);
    let mut outcome = ReconciliationOutcome {
        retained: plan.retained.clone(),
        ..Default::default()
    };

    for column in &plan.adds {
        let statement = sql::add_column(table, column);
        match warehouse.add_column(table, column) {
            Ok(()) => {
                log.info(Stage::SchemaSync, &format!("Applied: {statement}"));
                outcome.added.push(column.clone());
            }
            Err(source) => {
                let error = PipelineError::SchemaAlteration {
                    table: table.to_string(),
                    column: column.name.to_string(),
                    operation: AlterationKind::AddColumn.as_str(),
                    source,
                };
                log.error(Stage::SchemaSync, &error.to_string());
                outcome.failed.push(AlterationFailure {
                    column: column.name.clone(),
                    operation: AlterationKind::AddColumn,
                    statement,
                    error: error.to_string(),
                });
            }
        }
    }

    if !plan.drops.is_empty() {
        match warehouse.snapshot_table(table) {
            Ok(snapshot) => {
                log.info(
                    Stage::SchemaSync,
                    &format!("Snapshot of {table} saved as {snapshot}"),
                );
                outcome.snapshot = Some(snapshot);
                for column in &plan.drops {
                    apply_drop(warehouse, table, column, log, &mut outcome);
                }
            }
            Err(err) => {
                let message = format!("snapshot of {table} failed, no columns dropped: {err}");
                log.error(Stage::SchemaSync, &message);
                for column in &plan.drops {
                    outcome.failed.push(AlterationFailure {
                        column: column.clone(),
                        operation: AlterationKind::DropColumn,
                        statement: sql::drop_column(table, column),
                        error: message.clone(),
                    });
                }
            }
        }
    }

    for column in &plan.retained {
        log.warn(
            Stage::SchemaSync,
            &format!("Column {column} exists in {table} but not in the incoming data; retained"),
        );
    }

    match warehouse.list_columns(table) {
        Ok(columns) => {
            let current: Vec<CanonicalIdentifier> =
                columns.into_iter().map(|column| column.name).collect();
            let residual = diff(&current, incoming);
            if !residual.missing_in_target.is_empty() {
                log.warn(
                    Stage::SchemaSync,
                    &format!(
                        "{table} still lacks {} incoming column(s) after reconciliation",
                        residual.missing_count()
                    ),
                );
            }
            outcome.residual = Some(residual);
        }
        Err(err) => {
            log.error(
                Stage::SchemaSync,
                &format!("Could not re-read columns of {table}: {err}"),
            );
            outcome.residual_error = Some(err.to_string());
        }
    }
    outcome
}

fn apply_drop(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    column: &CanonicalIdentifier,
    log: &dyn PipelineLog,
    outcome: &mut ReconciliationOutcome,
) {
    let statement = sql::drop_column(table, column);
    match warehouse.drop_column(table, column) {
        Ok(()) => {
            log.info(Stage::SchemaSync, &format!("Applied: {statement}"));
            outcome.dropped.push(column.clone());
        }
        Err(source) => {
            let error = PipelineError::SchemaAlteration {
                table: table.to_string(),
                column: column.to_string(),
                operation: AlterationKind::DropColumn.as_str(),
                source,
            };
            log.error(Stage::SchemaSync, &error.to_string());
            outcome.failed.push(AlterationFailure {
                column: column.clone(),
                operation: AlterationKind::DropColumn,
                statement,
                error: error.to_string(),
            });
        }
    }
}
