use std::{
    fs,
    path::{Path, PathBuf},
};

use encoding_rs::UTF_8;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ColumnDef, TableRef, Warehouse, check_row_shape, snapshot_ref, snapshot_stamp};
use crate::{
    error::WarehouseError, io_utils::DEFAULT_CSV_DELIMITER, payload::Table,
    sanitize::CanonicalIdentifier,
};

#[derive(Debug, Serialize, Deserialize)]
struct TableDefinition {
    table: String,
    columns: Vec<ColumnDef>,
}

/// Warehouse kept on the local file system.
///
/// Each table `DB.SCHEMA.T` is `<root>/DB/SCHEMA/T.yaml` (column definitions)
/// next to `<root>/DB/SCHEMA/T.csv` (rows). Path components are upper-cased,
/// so lookups are case-insensitive like an unquoted warehouse identifier.
#[derive(Debug)]
pub struct DirectoryWarehouse {
    root: PathBuf,
    guard: Mutex<()>,
}

impl DirectoryWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(table.database.to_ascii_uppercase())
            .join(table.schema.to_ascii_uppercase())
    }

    fn definition_path(&self, table: &TableRef) -> PathBuf {
        self.table_dir(table)
            .join(format!("{}.yaml", table.table.to_ascii_uppercase()))
    }

    fn data_path(&self, table: &TableRef) -> PathBuf {
        self.table_dir(table)
            .join(format!("{}.csv", table.table.to_ascii_uppercase()))
    }

    fn read_definition(&self, table: &TableRef) -> Result<TableDefinition, WarehouseError> {
        let path = self.definition_path(table);
        if !path.exists() {
            return Err(WarehouseError::TableNotFound(table.to_string()));
        }
        let text = fs::read_to_string(&path)?;
        serde_yaml::from_str(&text)
            .map_err(|err| WarehouseError::Format(format!("{}: {err}", path.display())))
    }

    fn write_definition(
        &self,
        table: &TableRef,
        definition: &TableDefinition,
    ) -> Result<(), WarehouseError> {
        let text = serde_yaml::to_string(definition)
            .map_err(|err| WarehouseError::Format(err.to_string()))?;
        fs::write(self.definition_path(table), text)?;
        Ok(())
    }

    fn read_rows(&self, table: &TableRef) -> Result<Table, WarehouseError> {
        let path = self.data_path(table);
        if !path.exists() {
            return Ok(Table::default());
        }
        let bytes = fs::read(&path)?;
        Table::from_bytes(&bytes, DEFAULT_CSV_DELIMITER, UTF_8)
            .map_err(|err| WarehouseError::Format(format!("{}: {err:#}", path.display())))
    }

    fn write_rows(&self, table: &TableRef, rows: &Table) -> Result<(), WarehouseError> {
        let bytes = rows
            .to_csv_bytes()
            .map_err(|err| WarehouseError::Format(err.to_string()))?;
        fs::write(self.data_path(table), bytes)?;
        Ok(())
    }

    fn header_row(columns: &[ColumnDef]) -> Vec<String> {
        columns.iter().map(|c| c.name.to_string()).collect()
    }
}

impl Warehouse for DirectoryWarehouse {
    fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        Ok(self.definition_path(table).exists())
    }

    fn list_columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>, WarehouseError> {
        let _guard = self.guard.lock();
        Ok(self.read_definition(table)?.columns)
    }

    fn create_table(&self, table: &TableRef, columns: &[ColumnDef]) -> Result<(), WarehouseError> {
        let _guard = self.guard.lock();
        if self.definition_path(table).exists() {
            return Err(WarehouseError::TableExists(table.to_string()));
        }
        fs::create_dir_all(self.table_dir(table))?;
        self.write_definition(
            table,
            &TableDefinition {
                table: table.to_string(),
                columns: columns.to_vec(),
            },
        )?;
        self.write_rows(table, &Table::new(Self::header_row(columns), Vec::new()))
    }

    fn add_column(&self, table: &TableRef, column: &ColumnDef) -> Result<(), WarehouseError> {
        let _guard = self.guard.lock();
        let mut definition = self.read_definition(table)?;
        if definition.columns.iter().any(|c| c.name == column.name) {
            return Err(WarehouseError::ColumnExists {
                table: table.to_string(),
                column: column.name.to_string(),
            });
        }
        let mut rows = self.read_rows(table)?;
        definition.columns.push(column.clone());
        rows.headers = Self::header_row(&definition.columns);
        for row in &mut rows.rows {
            row.resize(definition.columns.len(), None);
        }
        self.write_rows(table, &rows)?;
        self.write_definition(table, &definition)
    }

    fn drop_column(
        &self,
        table: &TableRef,
        column: &CanonicalIdentifier,
    ) -> Result<(), WarehouseError> {
        let _guard = self.guard.lock();
        let mut definition = self.read_definition(table)?;
        let idx = definition
            .columns
            .iter()
            .position(|c| &c.name == column)
            .ok_or_else(|| WarehouseError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })?;
        let mut rows = self.read_rows(table)?;
        definition.columns.remove(idx);
        rows.headers = Self::header_row(&definition.columns);
        for row in &mut rows.rows {
            if idx < row.len() {
                row.remove(idx);
            }
        }
        self.write_rows(table, &rows)?;
        self.write_definition(table, &definition)
    }

    fn snapshot_table(&self, table: &TableRef) -> Result<TableRef, WarehouseError> {
        let _guard = self.guard.lock();
        let definition = self.read_definition(table)?;
        let rows = self.read_rows(table)?;
        let stamp = snapshot_stamp();
        let snapshot = (0..)
            .map(|attempt| snapshot_ref(table, &stamp, attempt))
            .find(|candidate| !self.definition_path(candidate).exists())
            .unwrap_or_else(|| snapshot_ref(table, &stamp, 0));
        self.write_rows(&snapshot, &rows)?;
        self.write_definition(
            &snapshot,
            &TableDefinition {
                table: snapshot.to_string(),
                columns: definition.columns,
            },
        )?;
        Ok(snapshot)
    }

    fn replace_rows(&self, table: &TableRef, rows: &Table) -> Result<u64, WarehouseError> {
        let _guard = self.guard.lock();
        let definition = self.read_definition(table)?;
        check_row_shape(table, &definition.columns, rows)?;
        let stored = Table::new(Self::header_row(&definition.columns), rows.rows.clone());
        self.write_rows(table, &stored)?;
        Ok(stored.rows.len() as u64)
    }

    fn row_count(&self, table: &TableRef) -> Result<u64, WarehouseError> {
        let _guard = self.guard.lock();
        self.read_definition(table)?;
        Ok(self.read_rows(table)?.row_count() as u64)
    }
}
