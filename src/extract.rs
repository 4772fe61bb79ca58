//! Extraction adapters that turn a source system's records into a [`Table`].
//!
//! Adapters share no state; each one runs to completion or fails on its own.
//! `http://` and `https://` sources are fetched as JSON. `file://` sources are
//! read from disk: `.csv`/`.tsv` files pass through unchanged, anything else is
//! parsed as JSON.

use std::{path::Path, time::Duration};

use encoding_rs::UTF_8;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    config::{Settings, SourceConfig},
    error::PipelineError,
    journal::{PipelineLog, Stage},
    payload::Table,
    store::ObjectStore,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub trait Extractor {
    fn name(&self) -> &str;

    fn extract(&self) -> Result<Table, PipelineError>;
}

pub struct HttpJsonSource {
    config: SourceConfig,
    token: Option<String>,
    client: Client,
}

impl HttpJsonSource {
    pub fn new(config: SourceConfig, token: Option<String>) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .user_agent(concat!("cloudpipe/", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| PipelineError::Connectivity {
                system: config.name.clone(),
                message: format!("cannot create HTTP client: {err}"),
            })?;
        Ok(Self {
            config,
            token,
            client,
        })
    }

    fn connectivity(&self, message: String) -> PipelineError {
        PipelineError::Connectivity {
            system: self.config.name.clone(),
            message,
        }
    }
}

impl Extractor for HttpJsonSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn extract(&self) -> Result<Table, PipelineError> {
        let mut request = self
            .client
            .get(&self.config.url)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|err| self.connectivity(err.to_string()))?;
        if !response.status().is_success() {
            return Err(self.connectivity(format!("HTTP {}", response.status())));
        }
        let document: Value = response.json().map_err(|err| PipelineError::Payload {
            name: self.config.name.clone(),
            message: format!("response is not JSON: {err}"),
        })?;
        records_to_table(
            &document,
            self.config.records_pointer.as_deref(),
            &self.config.name,
        )
    }
}

/// Reads a local file named by a `file://` URL.
pub struct FileSource {
    config: SourceConfig,
}

impl FileSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn path(&self) -> &Path {
        Path::new(self.config.url.trim_start_matches("file://"))
    }
}

impl Extractor for FileSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn extract(&self) -> Result<Table, PipelineError> {
        let path = self.path();
        let payload_error = |message: String| PipelineError::Payload {
            name: self.config.name.clone(),
            message,
        };
        let delimited = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("tsv"));
        if delimited {
            return Table::read_path(path, None, UTF_8).map_err(|err| payload_error(format!("{err:#}")));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| payload_error(format!("cannot read {}: {err}", path.display())))?;
        let document: Value = serde_json::from_str(&text)
            .map_err(|err| payload_error(format!("invalid JSON: {err}")))?;
        records_to_table(
            &document,
            self.config.records_pointer.as_deref(),
            &self.config.name,
        )
    }
}

/// Builds the adapter for a configured source.
pub fn source_for(
    config: &SourceConfig,
    settings: &Settings,
) -> Result<Box<dyn Extractor>, PipelineError> {
    let url = config.url.trim();
    if url.starts_with("file://") {
        return Ok(Box::new(FileSource::new(config.clone())));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(PipelineError::Configuration(format!(
            "source '{}' has unsupported URL '{url}'",
            config.name
        )));
    }
    let token = match &config.token_setting {
        Some(key) => Some(settings.require(key)?.to_string()),
        None => None,
    };
    Ok(Box::new(HttpJsonSource::new(config.clone(), token)?))
}

/// Flattens an array of JSON objects into a table.
///
/// Columns are the union of object keys in first-seen order. Strings load
/// as-is, numbers and booleans as their JSON text, nulls as null, and nested
/// arrays or objects as compact JSON.
pub fn records_to_table(
    document: &Value,
    pointer: Option<&str>,
    source: &str,
) -> Result<Table, PipelineError> {
    let payload_error = |message: String| PipelineError::Payload {
        name: source.to_string(),
        message,
    };
    let records = match pointer.filter(|p| !p.is_empty()) {
        Some(pointer) => document
            .pointer(pointer)
            .ok_or_else(|| payload_error(format!("no value at {pointer}")))?,
        None => document,
    };
    let records = records
        .as_array()
        .ok_or_else(|| payload_error("records are not a JSON array".to_string()))?;

    let mut headers: Vec<String> = Vec::new();
    let mut objects: Vec<&Map<String, Value>> = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let object = record
            .as_object()
            .ok_or_else(|| payload_error(format!("record {idx} is not a JSON object")))?;
        for key in object.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
        objects.push(object);
    }

    let rows = objects
        .into_iter()
        .map(|object| {
            headers
                .iter()
                .map(|header| object.get(header).and_then(cell_text))
                .collect()
        })
        .collect();
    Ok(Table::new(headers, rows))
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractOutcome {
    pub source: String,
    pub output: String,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

/// Runs every configured source and writes each result to the store.
pub fn run_extract(
    sources: &[SourceConfig],
    settings: &Settings,
    store: &dyn ObjectStore,
    log: &dyn PipelineLog,
) -> Vec<ExtractOutcome> {
    sources
        .iter()
        .map(|config| {
            let output = config.output_name();
            let result = source_for(config, settings)
                .and_then(|adapter| adapter.extract())
                .and_then(|table| {
                    let bytes = table.to_csv_bytes().map_err(|err| PipelineError::Payload {
                        name: config.name.clone(),
                        message: format!("{err:#}"),
                    })?;
                    store
                        .put(&output, &bytes)
                        .map_err(|err| PipelineError::Connectivity {
                            system: "object store".to_string(),
                            message: format!("{err:#}"),
                        })?;
                    Ok(table.row_count())
                });
            match result {
                Ok(rows) => {
                    log.info(
                        Stage::Extract,
                        &format!("{}: wrote {rows} row(s) to {output}", config.name),
                    );
                    ExtractOutcome {
                        source: config.name.clone(),
                        output,
                        rows: Some(rows),
                        error: None,
                    }
                }
                Err(err) => {
                    log.error(Stage::Extract, &format!("{}: {err}", config.name));
                    ExtractOutcome {
                        source: config.name.clone(),
                        output,
                        rows: None,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect()
}
