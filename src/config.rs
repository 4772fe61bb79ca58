//! Static configuration read once at process start.
//!
//! A configuration directory holds `settings.json` (a flat map of connection
//! parameters and pipeline switches), `table_mapping.json` (one entry per
//! logical table), and optionally `sources.json` (HTTP extraction sources).
//! Failing to load any of them is the only fatal error in a run.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::PipelineError,
    infer::InferenceRules,
    sanitize::{CasePolicy, SanitizeRules},
    warehouse::TableRef,
};

pub const DEFAULT_CONFIG_DIR: &str = "config_files";
pub const SETTINGS_FILE: &str = "settings.json";
pub const TABLE_MAPPING_FILE: &str = "table_mapping.json";
pub const SOURCES_FILE: &str = "sources.json";

pub const BLOB_ROOT: &str = "BLOB_ROOT";
pub const WAREHOUSE_ROOT: &str = "WAREHOUSE_ROOT";
pub const IDENTIFIER_CASE: &str = "IDENTIFIER_CASE";
pub const RESERVED_WORDS: &str = "RESERVED_WORDS";
pub const IDENTIFIER_PUNCTUATION: &str = "IDENTIFIER_PUNCTUATION";
pub const ALLOW_DROP_COLUMNS: &str = "ALLOW_DROP_COLUMNS";
pub const INFER_SAMPLE_SIZE: &str = "INFER_SAMPLE_SIZE";
pub const INFER_SEED: &str = "INFER_SEED";

const DEFAULT_BLOB_ROOT: &str = "blob_store";
const DEFAULT_WAREHOUSE_ROOT: &str = "warehouse";

fn configuration(message: impl Into<String>) -> PipelineError {
    PipelineError::Configuration(message.into())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, PipelineError> {
    let text = fs::read_to_string(path)
        .map_err(|err| configuration(format!("cannot read {}: {err}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|err| configuration(format!("cannot parse {}: {err}", path.display())))
}

/// Flat string settings. Non-string JSON values are kept in their JSON text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw: BTreeMap<String, Value> = read_json(path)?;
        Ok(Self::from_values(raw))
    }

    /// Loads `settings.json` from `dir` when present; empty settings otherwise.
    pub fn load_optional(dir: &Path) -> Result<Self, PipelineError> {
        let path = dir.join(SETTINGS_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_values(raw: BTreeMap<String, Value>) -> Self {
        let values = raw
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(text) => text,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect();
        Self { values }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Non-blank value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, PipelineError> {
        self.get(key)
            .ok_or_else(|| configuration(format!("setting {key} is missing")))
    }

    pub fn blob_root(&self) -> PathBuf {
        PathBuf::from(self.get(BLOB_ROOT).unwrap_or(DEFAULT_BLOB_ROOT))
    }

    pub fn warehouse_root(&self) -> PathBuf {
        PathBuf::from(self.get(WAREHOUSE_ROOT).unwrap_or(DEFAULT_WAREHOUSE_ROOT))
    }

    pub fn allow_drop(&self) -> Result<bool, PipelineError> {
        match self.get(ALLOW_DROP_COLUMNS) {
            None => Ok(false),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Ok(true),
                "false" | "0" | "no" | "n" => Ok(false),
                _ => Err(configuration(format!(
                    "{ALLOW_DROP_COLUMNS} must be true or false, found '{value}'"
                ))),
            },
        }
    }

    pub fn sanitize_rules(&self) -> Result<SanitizeRules, PipelineError> {
        let mut rules = SanitizeRules::default();
        if let Some(policy) = self.get(IDENTIFIER_CASE) {
            let policy: CasePolicy = policy
                .parse()
                .map_err(|err: anyhow::Error| configuration(err.to_string()))?;
            rules = rules.with_case_policy(policy);
        }
        if let Some(words) = self.get(RESERVED_WORDS) {
            rules = rules.with_reserved_words(words.split(','));
        }
        if let Some(punctuation) = self.values.get(IDENTIFIER_PUNCTUATION) {
            if let Some(word) = punctuation
                .chars()
                .find(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            {
                return Err(configuration(format!(
                    "{IDENTIFIER_PUNCTUATION} may not contain letters, digits, or '_', found '{word}'"
                )));
            }
            rules = rules.with_punctuation(punctuation);
        }
        Ok(rules)
    }

    pub fn inference_rules(&self) -> Result<InferenceRules, PipelineError> {
        let mut rules = InferenceRules::default();
        if let Some(size) = self.get(INFER_SAMPLE_SIZE) {
            let size: usize = size.parse().map_err(|_| {
                configuration(format!("{INFER_SAMPLE_SIZE} must be a positive integer"))
            })?;
            rules = rules.with_sample_size(size);
        }
        if let Some(seed) = self.get(INFER_SEED) {
            let seed: u64 = seed
                .parse()
                .map_err(|_| configuration(format!("{INFER_SEED} must be an integer")))?;
            rules = rules.with_seed(seed);
        }
        Ok(rules)
    }
}

/// Binding of one logical table to its source file and warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    #[serde(rename = "snowflake_table", alias = "target_table")]
    pub target: TableRef,
    #[serde(rename = "azure_csv_name", alias = "source_name")]
    pub source_name: String,
    /// Advisory only; compared with the loaded row count.
    #[serde(default)]
    pub estimated_row_count: Option<u64>,
    #[serde(default)]
    pub raw_csv_name: Option<String>,
    #[serde(default)]
    pub cleaned_csv_name: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub composite: bool,
    #[serde(default)]
    pub header_renames: BTreeMap<String, String>,
}

impl TableMapping {
    pub fn new(target: TableRef, source_name: impl Into<String>) -> Self {
        Self {
            target,
            source_name: source_name.into(),
            estimated_row_count: None,
            raw_csv_name: None,
            cleaned_csv_name: None,
            primary_key: None,
            composite: false,
            header_renames: BTreeMap::new(),
        }
    }

    pub fn load_all(path: &Path) -> Result<Vec<Self>, PipelineError> {
        read_json(path)
    }
}

/// An HTTP endpoint returning JSON records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    /// JSON pointer to the record array, e.g. `/data/items`; the root when absent.
    #[serde(default)]
    pub records_pointer: Option<String>,
    /// Settings key holding a bearer token.
    #[serde(default)]
    pub token_setting: Option<String>,
    /// Object name written to the store; `<name>_raw.csv` when absent.
    #[serde(default)]
    pub output_name: Option<String>,
}

impl SourceConfig {
    pub fn output_name(&self) -> String {
        self.output_name
            .clone()
            .unwrap_or_else(|| format!("{}_raw.csv", self.name))
    }
}

/// Everything loaded from one configuration directory.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dir: PathBuf,
    pub settings: Settings,
    pub mappings: Vec<TableMapping>,
    pub sources: Vec<SourceConfig>,
}

impl PipelineConfig {
    pub fn load(dir: &Path) -> Result<Self, PipelineError> {
        if !dir.is_dir() {
            return Err(configuration(format!(
                "configuration directory {} does not exist",
                dir.display()
            )));
        }
        let settings = Settings::load(&dir.join(SETTINGS_FILE))?;
        let mappings = TableMapping::load_all(&dir.join(TABLE_MAPPING_FILE))?;
        let sources_path = dir.join(SOURCES_FILE);
        let sources = if sources_path.exists() {
            read_json(&sources_path)?
        } else {
            Vec::new()
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
            mappings,
            sources,
        })
    }

    /// Relative paths in settings are taken from the configuration directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.dir.join(path)
    }

    pub fn blob_root(&self) -> PathBuf {
        self.resolve(&self.settings.blob_root())
    }

    pub fn warehouse_root(&self) -> PathBuf {
        self.resolve(&self.settings.warehouse_root())
    }

    /// Mappings whose target matches one of `targets` (case-insensitive), or all when empty.
    pub fn select_mappings(&self, targets: &[String]) -> Result<Vec<TableMapping>, PipelineError> {
        if targets.is_empty() {
            return Ok(self.mappings.clone());
        }
        targets
            .iter()
            .map(|target| {
                self.mappings
                    .iter()
                    .find(|m| m.target.key() == target.trim().to_ascii_uppercase())
                    .cloned()
                    .ok_or_else(|| configuration(format!("no mapping for table {target}")))
            })
            .collect()
    }
}
