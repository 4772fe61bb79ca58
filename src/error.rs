//! Error taxonomy shared by the pipeline stages.
//!
//! Most failures in a run are per-table or per-column and are carried as
//! values inside [`crate::pipeline::RunSummary`]. The variants here are the
//! typed form of those failures; only [`PipelineError::Configuration`] is
//! fatal at process start.

use thiserror::Error;

/// Failures reported by a [`crate::warehouse::Warehouse`] implementation.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("table {0} does not exist")]
    TableNotFound(String),
    #[error("table {0} already exists")]
    TableExists(String),
    #[error("column '{column}' already exists in {table}")]
    ColumnExists { table: String, column: String },
    #[error("column '{column}' does not exist in {table}")]
    ColumnNotFound { table: String, column: String },
    #[error("warehouse rejected operation on {table}: {reason}")]
    Rejected { table: String, reason: String },
    #[error("warehouse storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("warehouse metadata error: {0}")]
    Format(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no source file matched logical name '{logical_name}'")]
    NameResolution { logical_name: String },
    #[error("{operation} of column '{column}' on {table} failed: {source}")]
    SchemaAlteration {
        table: String,
        column: String,
        operation: &'static str,
        #[source]
        source: WarehouseError,
    },
    #[error("creating {table} failed: {source}")]
    TableCreation {
        table: String,
        #[source]
        source: WarehouseError,
    },
    #[error("{system} is unreachable: {message}")]
    Connectivity { system: String, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("loading {table} failed: {source}")]
    Load {
        table: String,
        #[source]
        source: WarehouseError,
    },
    #[error("payload '{name}' could not be read: {message}")]
    Payload { name: String, message: String },
}

impl PipelineError {
    /// Short machine-friendly category used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NameResolution { .. } => "name_resolution",
            PipelineError::SchemaAlteration { .. } => "schema_alteration",
            PipelineError::TableCreation { .. } => "table_creation",
            PipelineError::Connectivity { .. } => "connectivity",
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Load { .. } => "load",
            PipelineError::Payload { .. } => "payload",
        }
    }
}
