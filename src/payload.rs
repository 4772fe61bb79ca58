//! In-memory tabular payload exchanged between pipeline stages.
//!
//! A [`Table`] is ordered rows under named columns. Empty cells are `None`;
//! nothing else about the values is interpreted here.

use std::{io::Read, path::Path};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;

use crate::{
    io_utils,
    sanitize::{CanonicalIdentifier, SanitizeRules, sanitize_headers},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Case-insensitive header lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    }

    pub fn column_values(&self, index: usize) -> Vec<Option<&str>> {
        self.rows
            .iter()
            .map(|row| row.get(index).and_then(|cell| cell.as_deref()))
            .collect()
    }

    /// Reads delimited text. Short rows are padded with nulls; long rows are
    /// rejected.
    pub fn from_reader<R: Read>(
        reader: R,
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let mut csv_reader = io_utils::open_csv_reader(reader, delimiter, true);
        let headers = io_utils::reader_headers(&mut csv_reader, encoding)?;
        let width = headers.len();
        let mut rows = Vec::new();
        for (row_idx, record) in csv_reader.byte_records().enumerate() {
            let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
            let decoded = io_utils::decode_record(&record, encoding)?;
            if decoded.len() > width {
                return Err(anyhow!(
                    "Row {} has {} fields but the header has {}",
                    row_idx + 2,
                    decoded.len(),
                    width
                ));
            }
            let mut row: Vec<Option<String>> = decoded
                .into_iter()
                .map(|value| if value.is_empty() { None } else { Some(value) })
                .collect();
            row.resize(width, None);
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn from_bytes(bytes: &[u8], delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        Self::from_reader(bytes, delimiter, encoding)
    }

    pub fn read_path(path: &Path, delimiter: Option<u8>, encoding: &'static Encoding) -> Result<Self> {
        let delimiter = io_utils::resolve_input_delimiter(path, delimiter);
        let reader = io_utils::open_input(path)?;
        Self::from_reader(reader, delimiter, encoding)
            .with_context(|| format!("Reading table from {path:?}"))
    }

    /// Writes the table to `path`, or stdout when `path` is `None` or `-`.
    pub fn write_path(
        &self,
        path: Option<&Path>,
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<()> {
        let bytes = self.to_delimited_bytes(delimiter)?;
        io_utils::write_encoded(path, &bytes, encoding)
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        self.to_delimited_bytes(io_utils::DEFAULT_CSV_DELIMITER)
    }

    pub fn to_delimited_bytes(&self, delimiter: u8) -> Result<Vec<u8>> {
        let mut writer = io_utils::csv_writer_builder(delimiter).from_writer(Vec::new());
        self.write_records(&mut writer)?;
        writer
            .into_inner()
            .map_err(|err| anyhow!("Finalizing CSV buffer: {}", err.error()))
    }

    fn write_records<W: std::io::Write>(&self, writer: &mut csv::Writer<W>) -> Result<()> {
        writer
            .write_record(&self.headers)
            .context("Writing CSV headers")?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))
                .context("Writing CSV row")?;
        }
        Ok(())
    }

    /// Replaces headers with their sanitized, de-duplicated identifiers.
    pub fn sanitize_headers(&mut self, rules: &SanitizeRules) -> Vec<CanonicalIdentifier> {
        let identifiers = sanitize_headers(&self.headers, rules);
        self.headers = identifiers.iter().map(|id| id.to_string()).collect();
        identifiers
    }
}
