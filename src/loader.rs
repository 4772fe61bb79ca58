//! Truncate-and-reload of a target table from a prepared payload.

use serde::Serialize;

use crate::{
    error::PipelineError,
    journal::{PipelineLog, Stage},
    payload::Table,
    warehouse::{TableRef, Warehouse, sql},
};

/// Outcome of the post-load row count comparison. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    Matched { count: u64 },
    Mismatch { expected: u64, actual: u64 },
    NotChecked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub rows_written: u64,
    pub truncated_cells: u64,
    /// Payload columns with no counterpart in the target; their values are not loaded.
    pub skipped_columns: Vec<String>,
    pub verification: Verification,
}

/// Replaces every row of `table` with `payload`.
///
/// Payload columns are matched to target columns case-insensitively and
/// reordered to the target's declared order; target columns absent from the
/// payload load as null. Values longer than a `VARCHAR` column's declared
/// length are cut to that many characters. Afterwards the table's row count
/// is compared with `expected` (or the payload size when no expectation is
/// configured); a disagreement is logged as a warning and does not fail the
/// load.
pub fn load_table(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    payload: &Table,
    expected: Option<u64>,
    log: &dyn PipelineLog,
) -> Result<LoadReport, PipelineError> {
    let load_error = |source| PipelineError::Load {
        table: table.to_string(),
        source,
    };
    let columns = warehouse.list_columns(table).map_err(load_error)?;

    let sources: Vec<Option<usize>> = columns
        .iter()
        .map(|column| payload.column_index(column.name.as_str()))
        .collect();
    let skipped_columns: Vec<String> = payload
        .headers
        .iter()
        .filter(|header| {
            !columns
                .iter()
                .any(|column| column.name.as_str().eq_ignore_ascii_case(header))
        })
        .cloned()
        .collect();
    for header in &skipped_columns {
        log.warn(
            Stage::Load,
            &format!("Column {header} is not in {table}; its values are not loaded"),
        );
    }

    let mut truncated_cells = 0u64;
    let rows = payload
        .rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .zip(&sources)
                .map(|(column, source)| {
                    let value = source.and_then(|idx| row.get(idx).cloned().flatten())?;
                    match column.data_type.max_length() {
                        Some(limit) if value.chars().count() > limit => {
                            truncated_cells += 1;
                            Some(value.chars().take(limit).collect())
                        }
                        _ => Some(value),
                    }
                })
                .collect::<Vec<Option<String>>>()
        })
        .collect();
    let aligned = Table::new(
        columns.iter().map(|column| column.name.to_string()).collect(),
        rows,
    );

    log.debug(Stage::Load, &format!("Applying: {}", sql::truncate_table(table)));
    let rows_written = warehouse.replace_rows(table, &aligned).map_err(load_error)?;
    log.info(
        Stage::Load,
        &format!("Loaded {rows_written} row(s) into {table}"),
    );
    if truncated_cells > 0 {
        log.warn(
            Stage::Load,
            &format!("Truncated {truncated_cells} value(s) to their column length in {table}"),
        );
    }

    let expected = expected.unwrap_or(payload.row_count() as u64);
    let verification = match warehouse.row_count(table) {
        Ok(actual) if actual == expected => Verification::Matched { count: actual },
        Ok(actual) => {
            log.warn(
                Stage::Load,
                &format!("Row count mismatch for {table}: expected {expected}, found {actual}"),
            );
            Verification::Mismatch { expected, actual }
        }
        Err(err) => {
            log.warn(
                Stage::Load,
                &format!("Could not verify row count of {table}: {err}"),
            );
            Verification::NotChecked
        }
    };

    Ok(LoadReport {
        rows_written,
        truncated_cells,
        skipped_columns,
        verification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        infer::ColumnType,
        journal::MemoryLog,
        sanitize::CanonicalIdentifier,
        warehouse::{ColumnDef, MemoryWarehouse},
    };

    fn table() -> TableRef {
        TableRef::new("LWS", "PUBLIC", "LEADS")
    }

    fn column(name: &str, data_type: ColumnType) -> ColumnDef {
        ColumnDef::new(CanonicalIdentifier::from_existing(name), data_type)
    }

    fn row(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn aligns_columns_and_truncates_long_values() {
        let warehouse = MemoryWarehouse::new().with_table(
            &table(),
            vec![
                column("ID", ColumnType::Number { precision: 5 }),
                column("CODE", ColumnType::Varchar { length: 3 }),
                column("NOTES", ColumnType::Varchar { length: 50 }),
            ],
            vec![row(&[Some("old"), None, None])],
        );
        let payload = Table::new(
            vec!["code".into(), "id".into(), "extra".into()],
            vec![
                row(&[Some("ABCDE"), Some("1"), Some("x")]),
                row(&[Some("AB"), Some("2"), None]),
            ],
        );
        let log = MemoryLog::new();
        let report = load_table(&warehouse, &table(), &payload, None, &log).unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(report.truncated_cells, 1);
        assert_eq!(report.skipped_columns, ["extra"]);
        assert_eq!(report.verification, Verification::Matched { count: 2 });
        assert_eq!(
            warehouse.rows(&table()).unwrap(),
            vec![
                row(&[Some("1"), Some("ABC"), None]),
                row(&[Some("2"), Some("AB"), None]),
            ]
        );
    }

    #[test]
    fn row_count_mismatch_is_a_warning() {
        let warehouse = MemoryWarehouse::new().with_table(
            &table(),
            vec![column("ID", ColumnType::Float)],
            Vec::new(),
        );
        let payload = Table::new(vec!["ID".into()], vec![row(&[Some("1.5")])]);
        let log = MemoryLog::new();
        let report = load_table(&warehouse, &table(), &payload, Some(10), &log).unwrap();
        assert_eq!(
            report.verification,
            Verification::Mismatch {
                expected: 10,
                actual: 1
            }
        );
        assert!(log.contains("Row count mismatch"));
    }

    #[test]
    fn rejected_load_is_an_error() {
        let warehouse = MemoryWarehouse::new().with_table(
            &table(),
            vec![column("ID", ColumnType::Float)],
            Vec::new(),
        );
        warehouse.fail_loads("warehouse suspended");
        let payload = Table::new(vec!["ID".into()], Vec::new());
        let err = load_table(&warehouse, &table(), &payload, None, &MemoryLog::new()).unwrap_err();
        assert_eq!(err.kind(), "load");
        assert!(err.to_string().contains("warehouse suspended"));
    }
}
