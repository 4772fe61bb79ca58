use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;

use super::{ColumnDef, TableRef, Warehouse, check_row_shape, snapshot_ref, snapshot_stamp};
use crate::{error::WarehouseError, payload::Table, sanitize::CanonicalIdentifier};

#[derive(Debug, Clone)]
struct StoredTable {
    name: TableRef,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, StoredTable>,
    rejected_columns: HashMap<(String, String), String>,
    snapshot_failure: Option<String>,
    load_failure: Option<String>,
    row_count_override: HashMap<String, u64>,
}

/// In-process warehouse.
///
/// Besides holding tables it can be told to reject specific column
/// alterations, snapshots, or loads, which is how failure handling is tested.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table with columns and rows.
    pub fn with_table(self, table: &TableRef, columns: Vec<ColumnDef>, rows: Vec<Vec<Option<String>>>) -> Self {
        self.state.lock().tables.insert(
            table.key(),
            StoredTable {
                name: table.clone(),
                columns,
                rows,
            },
        );
        self
    }

    /// Makes every add or drop of `column` on `table` fail with `reason`.
    pub fn reject_column(&self, table: &TableRef, column: &str, reason: impl Into<String>) {
        self.state
            .lock()
            .rejected_columns
            .insert((table.key(), column.to_ascii_uppercase()), reason.into());
    }

    pub fn fail_snapshots(&self, reason: impl Into<String>) {
        self.state.lock().snapshot_failure = Some(reason.into());
    }

    pub fn fail_loads(&self, reason: impl Into<String>) {
        self.state.lock().load_failure = Some(reason.into());
    }

    /// Makes `row_count` report `count` for `table` regardless of its contents.
    pub fn override_row_count(&self, table: &TableRef, count: u64) {
        self.state.lock().row_count_override.insert(table.key(), count);
    }

    pub fn rows(&self, table: &TableRef) -> Option<Vec<Vec<Option<String>>>> {
        self.state.lock().tables.get(&table.key()).map(|t| t.rows.clone())
    }

    pub fn table_names(&self) -> Vec<TableRef> {
        self.state
            .lock()
            .tables
            .values()
            .map(|t| t.name.clone())
            .collect()
    }
}

impl State {
    fn table(&self, table: &TableRef) -> Result<&StoredTable, WarehouseError> {
        self.tables
            .get(&table.key())
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))
    }

    fn table_mut(&mut self, table: &TableRef) -> Result<&mut StoredTable, WarehouseError> {
        self.tables
            .get_mut(&table.key())
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))
    }

    fn check_rejection(&self, table: &TableRef, column: &str) -> Result<(), WarehouseError> {
        match self
            .rejected_columns
            .get(&(table.key(), column.to_ascii_uppercase()))
        {
            Some(reason) => Err(WarehouseError::Rejected {
                table: table.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Warehouse for MemoryWarehouse {
    fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        Ok(self.state.lock().tables.contains_key(&table.key()))
    }

    fn list_columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>, WarehouseError> {
        Ok(self.state.lock().table(table)?.columns.clone())
    }

    fn create_table(&self, table: &TableRef, columns: &[ColumnDef]) -> Result<(), WarehouseError> {
        let mut state = self.state.lock();
        if state.tables.contains_key(&table.key()) {
            return Err(WarehouseError::TableExists(table.to_string()));
        }
        for column in columns {
            state.check_rejection(table, column.name.as_str())?;
        }
        state.tables.insert(
            table.key(),
            StoredTable {
                name: table.clone(),
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn add_column(&self, table: &TableRef, column: &ColumnDef) -> Result<(), WarehouseError> {
        let mut state = self.state.lock();
        state.check_rejection(table, column.name.as_str())?;
        let stored = state.table_mut(table)?;
        if stored.columns.iter().any(|c| c.name == column.name) {
            return Err(WarehouseError::ColumnExists {
                table: table.to_string(),
                column: column.name.to_string(),
            });
        }
        stored.columns.push(column.clone());
        for row in &mut stored.rows {
            row.push(None);
        }
        Ok(())
    }

    fn drop_column(
        &self,
        table: &TableRef,
        column: &CanonicalIdentifier,
    ) -> Result<(), WarehouseError> {
        let mut state = self.state.lock();
        state.check_rejection(table, column.as_str())?;
        let stored = state.table_mut(table)?;
        let idx = stored
            .columns
            .iter()
            .position(|c| &c.name == column)
            .ok_or_else(|| WarehouseError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })?;
        stored.columns.remove(idx);
        for row in &mut stored.rows {
            if idx < row.len() {
                row.remove(idx);
            }
        }
        Ok(())
    }

    fn snapshot_table(&self, table: &TableRef) -> Result<TableRef, WarehouseError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.snapshot_failure {
            return Err(WarehouseError::Rejected {
                table: table.to_string(),
                reason: reason.clone(),
            });
        }
        let source = state.table(table)?.clone();
        let stamp = snapshot_stamp();
        let used: HashSet<String> = state.tables.keys().cloned().collect();
        let snapshot = (0..)
            .map(|attempt| snapshot_ref(table, &stamp, attempt))
            .find(|candidate| !used.contains(&candidate.key()))
            .unwrap_or_else(|| snapshot_ref(table, &stamp, 0));
        state.tables.insert(
            snapshot.key(),
            StoredTable {
                name: snapshot.clone(),
                ..source
            },
        );
        Ok(snapshot)
    }

    fn replace_rows(&self, table: &TableRef, rows: &Table) -> Result<u64, WarehouseError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.load_failure {
            return Err(WarehouseError::Rejected {
                table: table.to_string(),
                reason: reason.clone(),
            });
        }
        let stored = state.table_mut(table)?;
        check_row_shape(table, &stored.columns, rows)?;
        stored.rows = rows.rows.clone();
        Ok(stored.rows.len() as u64)
    }

    fn row_count(&self, table: &TableRef) -> Result<u64, WarehouseError> {
        let state = self.state.lock();
        if let Some(count) = state.row_count_override.get(&table.key()) {
            return Ok(*count);
        }
        Ok(state.table(table)?.rows.len() as u64)
    }
}
