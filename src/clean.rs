//! Cleaning stage: scrubs raw exports before schema sync.

use std::{
    collections::{BTreeMap, HashSet},
    sync::LazyLock,
};

use chrono::{DateTime, Duration, NaiveDate};
use encoding_rs::UTF_8;
use regex::Regex;
use serde::Serialize;

use crate::{
    config::TableMapping,
    infer::InferenceRules,
    io_utils::DEFAULT_CSV_DELIMITER,
    journal::{PipelineLog, Stage},
    matcher::{MatchOutcome, find_match},
    payload::Table,
    sanitize::CanonicalIdentifier,
    store::ObjectStore,
};

const CSV_SUFFIX: &str = ".csv";

/// Header keywords marking columns whose bare numbers are serial dates.
pub const DATE_REPAIR_KEYWORDS: &[&str] = &["date", "signed"];
/// Excel serials at or above this are read as unix seconds instead.
const EXCEL_SERIAL_LIMIT: f64 = 100_000.0;
const UNIX_SECONDS_FLOOR: f64 = 1_000_000_000.0;

static UNSIGNED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("unsigned number pattern is valid"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(\d+\.?\d*|\.\d+)$").expect("number pattern is valid")
});
static NUMBER_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?\d+(\.\d+)?").expect("number fragment pattern is valid")
});
static ALPHABETIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]+$").expect("alphabetic pattern is valid"));

/// Which columns get their values repaired before loading.
///
/// A header mentioning a date keyword has bare numbers converted to ISO
/// dates. A header mentioning a number keyword, whose values are mostly
/// numeric once `$` and `,` are stripped, has every value reduced to its
/// numeric part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRepair {
    pub date_keywords: Vec<String>,
    pub number_keywords: Vec<String>,
}

impl Default for TypeRepair {
    fn default() -> Self {
        Self {
            date_keywords: DATE_REPAIR_KEYWORDS.iter().map(|w| w.to_string()).collect(),
            number_keywords: InferenceRules::default().number_keywords,
        }
    }
}

impl TypeRepair {
    pub fn disabled() -> Self {
        Self {
            date_keywords: Vec::new(),
            number_keywords: Vec::new(),
        }
    }

    fn is_date_column(&self, header: &str) -> bool {
        mentions_any(header, &self.date_keywords)
    }

    fn is_number_column(&self, header: &str) -> bool {
        mentions_any(header, &self.number_keywords)
    }
}

fn mentions_any(header: &str, keywords: &[String]) -> bool {
    let header = header.to_ascii_lowercase();
    keywords
        .iter()
        .any(|keyword| !keyword.is_empty() && header.contains(&keyword.to_ascii_lowercase()))
}

/// Primary key, value repair, and header handling for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanSpec {
    pub primary_key: Vec<String>,
    pub header_renames: BTreeMap<String, String>,
    pub repair: TypeRepair,
}

impl CleanSpec {
    /// Reads the key from a mapping; composite keys are written `"A + B"`.
    pub fn from_mapping(mapping: &TableMapping) -> Self {
        let primary_key = match mapping.primary_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && mapping.composite => key
                .split('+')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
            Some(key) if !key.is_empty() => vec![key.to_string()],
            _ => Vec::new(),
        };
        Self {
            primary_key,
            header_renames: mapping.header_renames.clone(),
            repair: TypeRepair::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub input_rows: usize,
    pub blank_rows_removed: usize,
    pub null_key_rows_removed: usize,
    pub duplicate_rows_removed: usize,
    pub output_rows: usize,
    pub missing_key_columns: Vec<String>,
    pub renamed_headers: usize,
    pub dates_converted: usize,
    pub numbers_repaired: usize,
    pub repaired_columns: Vec<String>,
    /// Headers that are not valid identifiers and will be renamed on load.
    pub flagged_headers: Vec<String>,
}

/// Strips surrounding whitespace and ASCII control characters; blank becomes null.
pub fn scrub_value(value: &str) -> Option<String> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|ch| !ch.is_ascii_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Reads a bare number as an Excel serial date or unix seconds.
///
/// Serials below 100000 count days from 1899-12-31, skipping the phantom
/// 1900-02-29; numbers above 10^9 are seconds since the epoch. Anything else,
/// including numbers between the two ranges, is `None`.
pub fn numeric_to_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if !UNSIGNED_NUMBER.is_match(value) {
        return None;
    }
    let number: f64 = value.parse().ok()?;
    if number > 0.0 && number < EXCEL_SERIAL_LIMIT {
        let days = number.floor() as i64;
        let epoch = if days >= 61 {
            NaiveDate::from_ymd_opt(1899, 12, 30)?
        } else {
            NaiveDate::from_ymd_opt(1899, 12, 31)?
        };
        return epoch.checked_add_signed(Duration::days(days));
    }
    if number > UNIX_SECONDS_FLOOR {
        return DateTime::from_timestamp(number.floor() as i64, 0).map(|dt| dt.date_naive());
    }
    None
}

fn strip_currency(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !matches!(ch, '$' | ','))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Reduces a value in a numeric column to its numeric part.
///
/// `$` and `,` are dropped; otherwise the first number inside the value is
/// kept. Purely alphabetic values become null and anything else is returned
/// unchanged.
pub fn repair_number(value: &str) -> Option<String> {
    let stripped = strip_currency(value);
    if NUMBER.is_match(&stripped) {
        return Some(stripped);
    }
    if let Some(found) = NUMBER_FRAGMENT.find(&stripped) {
        return Some(found.as_str().to_string());
    }
    if ALPHABETIC.is_match(value.trim()) {
        return None;
    }
    Some(value.to_string())
}

/// Applies [`TypeRepair`] to every column of `table`.
pub fn repair_types(
    table: &mut Table,
    repair: &TypeRepair,
    report: &mut CleanReport,
    log: &dyn PipelineLog,
) {
    for (idx, header) in table.headers.iter().enumerate() {
        if !CanonicalIdentifier::from_existing(header.trim()).is_well_formed() {
            report.flagged_headers.push(header.clone());
        }

        let mut changed = 0usize;
        if repair.is_date_column(header) {
            for row in &mut table.rows {
                let Some(value) = row[idx].as_deref() else {
                    continue;
                };
                if let Some(date) = numeric_to_date(value) {
                    row[idx] = Some(date.format("%Y-%m-%d").to_string());
                    changed += 1;
                }
            }
            report.dates_converted += changed;
        } else if repair.is_number_column(header) && mostly_numeric(table, idx) {
            for row in &mut table.rows {
                let Some(value) = row[idx].as_deref() else {
                    continue;
                };
                let repaired = repair_number(value);
                if repaired.as_deref() != Some(value) {
                    row[idx] = repaired;
                    changed += 1;
                }
            }
            report.numbers_repaired += changed;
        }
        if changed > 0 {
            log.info(
                Stage::Clean,
                &format!("Repaired {changed} value(s) in column {header}"),
            );
            report.repaired_columns.push(header.clone());
        }
    }
    if !report.flagged_headers.is_empty() {
        log.info(
            Stage::Clean,
            &format!(
                "Header(s) {} will be renamed to valid identifiers on load",
                report.flagged_headers.join(", ")
            ),
        );
    }
}

fn mostly_numeric(table: &Table, idx: usize) -> bool {
    let (numeric, present) = table
        .rows
        .iter()
        .filter_map(|row| row[idx].as_deref())
        .fold((0usize, 0usize), |(numeric, present), value| {
            let numeric = numeric + usize::from(NUMBER.is_match(&strip_currency(value)));
            (numeric, present + 1)
        });
    present > 0 && numeric * 2 > present
}

/// Cleans `table` in place.
///
/// Values are scrubbed, rows left with no value are removed, date and number
/// columns are repaired per [`TypeRepair`], then rows with a
/// null key component are removed and the rest de-duplicated on the key,
/// keeping the first occurrence. When any key column is missing from the
/// headers, key handling is skipped. Header renames apply last, so keys refer
/// to raw header names.
pub fn clean_table(table: &mut Table, spec: &CleanSpec, log: &dyn PipelineLog) -> CleanReport {
    let mut report = CleanReport {
        input_rows: table.row_count(),
        ..Default::default()
    };

    for row in &mut table.rows {
        for cell in row.iter_mut() {
            *cell = cell.as_deref().and_then(scrub_value);
        }
    }
    table.rows.retain(|row| row.iter().any(Option::is_some));
    report.blank_rows_removed = report.input_rows - table.row_count();
    repair_types(table, &spec.repair, &mut report, log);

    if !spec.primary_key.is_empty() {
        let key_indexes: Vec<Option<usize>> = spec
            .primary_key
            .iter()
            .map(|key| table.headers.iter().position(|header| header.trim() == key))
            .collect();
        report.missing_key_columns = spec
            .primary_key
            .iter()
            .zip(&key_indexes)
            .filter(|(_, idx)| idx.is_none())
            .map(|(key, _)| key.clone())
            .collect();

        if report.missing_key_columns.is_empty() {
            let indexes: Vec<usize> = key_indexes.into_iter().flatten().collect();
            let before = table.row_count();
            table
                .rows
                .retain(|row| indexes.iter().all(|idx| row[*idx].is_some()));
            report.null_key_rows_removed = before - table.row_count();

            let before = table.row_count();
            let mut seen: HashSet<Vec<String>> = HashSet::with_capacity(before);
            table.rows.retain(|row| {
                let key: Vec<String> = indexes
                    .iter()
                    .map(|idx| row[*idx].clone().unwrap_or_default())
                    .collect();
                seen.insert(key)
            });
            report.duplicate_rows_removed = before - table.row_count();
        } else {
            log.warn(
                Stage::Clean,
                &format!(
                    "Primary key column(s) {} not found; skipping de-duplication",
                    report.missing_key_columns.join(", ")
                ),
            );
        }
    }

    for header in &mut table.headers {
        if let Some(renamed) = spec.header_renames.get(header.trim()) {
            *header = renamed.clone();
            report.renamed_headers += 1;
        }
    }

    report.output_rows = table.row_count();
    report
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanOutcome {
    Cleaned {
        source: String,
        output: String,
        report: CleanReport,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

impl CleanOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CleanOutcome::Failed { .. })
    }
}

/// Cleans the raw object of every mapping that names one.
///
/// Mappings without `raw_csv_name`/`cleaned_csv_name` are skipped. One
/// table's failure does not stop the others.
pub fn run_clean(
    store: &dyn ObjectStore,
    mappings: &[TableMapping],
    log: &dyn PipelineLog,
) -> anyhow::Result<Vec<(String, CleanOutcome)>> {
    let available = store.list()?;
    let outcomes = mappings
        .iter()
        .map(|mapping| {
            let label = mapping.target.to_string();
            let outcome = clean_mapping(store, mapping, &available, log);
            match &outcome {
                CleanOutcome::Cleaned {
                    source,
                    output,
                    report,
                } => log.info(
                    Stage::Clean,
                    &format!(
                        "{source} -> {output}: {} of {} row(s) kept",
                        report.output_rows, report.input_rows
                    ),
                ),
                CleanOutcome::Skipped { reason } => {
                    log.info(Stage::Clean, &format!("{label}: skipped, {reason}"))
                }
                CleanOutcome::Failed { error } => log.error(Stage::Clean, &format!("{label}: {error}")),
            }
            (label, outcome)
        })
        .collect();
    Ok(outcomes)
}

fn clean_mapping(
    store: &dyn ObjectStore,
    mapping: &TableMapping,
    available: &[String],
    log: &dyn PipelineLog,
) -> CleanOutcome {
    let (Some(raw_name), Some(cleaned_name)) = (&mapping.raw_csv_name, &mapping.cleaned_csv_name)
    else {
        return CleanOutcome::Skipped {
            reason: "no raw_csv_name/cleaned_csv_name configured".to_string(),
        };
    };
    let source = match find_match(raw_name, available) {
        MatchOutcome::Found { name, .. } => name,
        MatchOutcome::NotFound => {
            return CleanOutcome::Failed {
                error: format!("raw object '{raw_name}' not found"),
            };
        }
    };
    let output = if cleaned_name.to_ascii_lowercase().ends_with(CSV_SUFFIX) {
        cleaned_name.clone()
    } else {
        format!("{cleaned_name}{CSV_SUFFIX}")
    };

    let result = store.get(&source).and_then(|bytes| {
        let mut table = Table::from_bytes(&bytes, DEFAULT_CSV_DELIMITER, UTF_8)?;
        let report = clean_table(&mut table, &CleanSpec::from_mapping(mapping), log);
        store.put(&output, &table.to_csv_bytes()?)?;
        Ok(report)
    });
    match result {
        Ok(report) => CleanOutcome::Cleaned {
            source,
            output,
            report,
        },
        Err(err) => CleanOutcome::Failed {
            error: format!("{err:#}"),
        },
    }
}
