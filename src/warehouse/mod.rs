//! Target schema and bulk-load interface.
//!
//! The pipeline only ever asks a warehouse to describe a table, add or drop a
//! single column, create a table, snapshot it, replace all of its rows, and
//! count them. Renames and in-place type changes are not part of the interface;
//! a type change is a drop followed by an add and loses the column's data.

mod directory;
mod memory;
pub mod sql;

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

pub use directory::DirectoryWarehouse;
pub use memory::MemoryWarehouse;

use crate::{
    error::WarehouseError, infer::ColumnType, payload::Table, sanitize::CanonicalIdentifier,
};

/// Fully qualified `DATABASE.SCHEMA.TABLE` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Upper-cased qualified name used as a lookup key.
    pub fn key(&self) -> String {
        self.to_string().to_ascii_uppercase()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

impl FromStr for TableRef {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split('.').map(str::trim).collect();
        match parts.as_slice() {
            [database, schema, table]
                if !database.is_empty() && !schema.is_empty() && !table.is_empty() =>
            {
                Ok(TableRef::new(*database, *schema, *table))
            }
            _ => Err(anyhow!(
                "Table name '{value}' must be fully qualified as database.schema.table"
            )),
        }
    }
}

impl TryFrom<String> for TableRef {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TableRef> for String {
    fn from(value: TableRef) -> Self {
        value.to_string()
    }
}

/// A declared column of a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: CanonicalIdentifier,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: CanonicalIdentifier, data_type: ColumnType) -> Self {
        Self { name, data_type }
    }
}

pub trait Warehouse: Send + Sync {
    fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError>;

    /// Current columns in declared order.
    fn list_columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>, WarehouseError>;

    fn create_table(&self, table: &TableRef, columns: &[ColumnDef]) -> Result<(), WarehouseError>;

    fn add_column(&self, table: &TableRef, column: &ColumnDef) -> Result<(), WarehouseError>;

    fn drop_column(
        &self,
        table: &TableRef,
        column: &CanonicalIdentifier,
    ) -> Result<(), WarehouseError>;

    /// Copies schema and rows to a new table and returns its qualified name.
    fn snapshot_table(&self, table: &TableRef) -> Result<TableRef, WarehouseError>;

    /// Truncates the table and inserts `rows`, whose headers must equal the
    /// table's column list. Returns the number of rows written.
    fn replace_rows(&self, table: &TableRef, rows: &Table) -> Result<u64, WarehouseError>;

    fn row_count(&self, table: &TableRef) -> Result<u64, WarehouseError>;
}

/// Name of the backup table for `table` taken at `stamp`.
pub(crate) fn snapshot_ref(table: &TableRef, stamp: &str, attempt: usize) -> TableRef {
    let name = if attempt == 0 {
        format!("{}_BACKUP_{stamp}", table.table)
    } else {
        format!("{}_BACKUP_{stamp}_{attempt}", table.table)
    };
    TableRef::new(&table.database, &table.schema, name)
}

pub(crate) fn snapshot_stamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Verifies a replacement payload lines up with the declared columns.
pub(crate) fn check_row_shape(
    table: &TableRef,
    columns: &[ColumnDef],
    rows: &Table,
) -> Result<(), WarehouseError> {
    let aligned = columns.len() == rows.headers.len()
        && columns
            .iter()
            .zip(&rows.headers)
            .all(|(column, header)| column.name.as_str().eq_ignore_ascii_case(header));
    if !aligned {
        return Err(WarehouseError::Rejected {
            table: table.to_string(),
            reason: format!(
                "payload columns [{}] do not match table columns [{}]",
                rows.headers.join(", "),
                columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });
    }
    if let Some(bad) = rows.rows.iter().position(|row| row.len() != columns.len()) {
        return Err(WarehouseError::Rejected {
            table: table.to_string(),
            reason: format!(
                "row {} has {} values but the table has {} columns",
                bad + 1,
                rows.rows[bad].len(),
                columns.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ref_requires_three_parts() {
        let parsed: TableRef = "LWS.PUBLIC.PROJECTS".parse().unwrap();
        assert_eq!(parsed.database, "LWS");
        assert_eq!(parsed.table, "PROJECTS");
        assert!("PUBLIC.PROJECTS".parse::<TableRef>().is_err());
        assert!("a..b".parse::<TableRef>().is_err());
    }

    #[test]
    fn table_ref_key_ignores_case() {
        let lower: TableRef = "lws.public.projects".parse().unwrap();
        let upper: TableRef = "LWS.PUBLIC.PROJECTS".parse().unwrap();
        assert_eq!(lower.key(), upper.key());
    }

    #[test]
    fn snapshot_names_are_derived_from_table() {
        let table = TableRef::new("LWS", "PUBLIC", "LEADS");
        assert_eq!(
            snapshot_ref(&table, "20240101_000000", 0).to_string(),
            "LWS.PUBLIC.LEADS_BACKUP_20240101_000000"
        );
        assert_eq!(
            snapshot_ref(&table, "20240101_000000", 2).table,
            "LEADS_BACKUP_20240101_000000_2"
        );
    }
}
