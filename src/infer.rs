//! Heuristic column typing from identifier keywords and sampled values.
//!
//! Decisions are advisory: once a warehouse table exists its declared column
//! types are authoritative, and inferred decisions are only used for columns
//! being added or tables being created.

use std::{collections::BTreeSet, fmt, str::FromStr};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rand::{SeedableRng, rngs::StdRng, seq::index};
use serde::{Deserialize, Serialize};

use crate::sanitize::CanonicalIdentifier;

pub const DEFAULT_SAMPLE_SIZE: usize = 1000;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const VARCHAR_BUCKETS: &[usize] = &[50, 100, 255, 500, 1000];
pub const DEFAULT_VARCHAR_LENGTH: usize = 255;
/// Length assumed for a declared `VARCHAR`/`TEXT` column with no explicit size.
pub const UNBOUNDED_VARCHAR_LENGTH: usize = 16_777_216;
pub const MAX_NUMBER_PRECISION: u8 = 38;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const BOOLEAN_TOKENS: &[&str] = &["true", "false", "1", "0", "yes", "no", "y", "n"];
const MAX_BOOLEAN_DISTINCT: usize = 4;

/// A coarse warehouse column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Date,
    Timestamp,
    Number { precision: u8 },
    Float,
    Boolean,
    Varchar { length: usize },
}

impl ColumnType {
    /// Maximum character length for string columns.
    pub fn max_length(&self) -> Option<usize> {
        match self {
            ColumnType::Varchar { length } => Some(*length),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Date => f.write_str("DATE"),
            ColumnType::Timestamp => f.write_str("TIMESTAMP"),
            ColumnType::Number { precision } => write!(f, "NUMBER({precision})"),
            ColumnType::Float => f.write_str("FLOAT"),
            ColumnType::Boolean => f.write_str("BOOLEAN"),
            ColumnType::Varchar { length } => write!(f, "VARCHAR({length})"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        let (base, args) = match normalized.split_once('(') {
            Some((base, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| anyhow!("Unbalanced parentheses in column type '{value}'"))?;
                let args = inner
                    .split(',')
                    .map(|part| {
                        part.trim()
                            .parse::<usize>()
                            .with_context(|| format!("Invalid size in column type '{value}'"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                (base.trim().to_string(), args)
            }
            None => (normalized.clone(), Vec::new()),
        };

        let parsed = match base.as_str() {
            "DATE" => ColumnType::Date,
            "TIMESTAMP" | "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" | "DATETIME" => {
                ColumnType::Timestamp
            }
            "NUMBER" | "NUMERIC" | "DECIMAL" => match args.as_slice() {
                [] => ColumnType::Number {
                    precision: MAX_NUMBER_PRECISION,
                },
                [_, scale, ..] if *scale > 0 => ColumnType::Float,
                [precision, ..] => ColumnType::Number {
                    precision: clamp_precision(*precision),
                },
            },
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => ColumnType::Number {
                precision: MAX_NUMBER_PRECISION,
            },
            "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" => {
                ColumnType::Float
            }
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "VARCHAR" | "STRING" | "TEXT" | "CHAR" | "CHARACTER" => ColumnType::Varchar {
                length: args.first().copied().unwrap_or(UNBOUNDED_VARCHAR_LENGTH),
            },
            _ => return Err(anyhow!("Unsupported column type '{value}'")),
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

fn clamp_precision(precision: usize) -> u8 {
    precision.clamp(1, MAX_NUMBER_PRECISION as usize) as u8
}

/// Keyword lists and sampling parameters for [`infer_type`].
#[derive(Debug, Clone)]
pub struct InferenceRules {
    pub sample_size: usize,
    pub seed: u64,
    pub date_keywords: Vec<String>,
    pub number_keywords: Vec<String>,
    pub boolean_keywords: Vec<String>,
}

impl Default for InferenceRules {
    fn default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|w| w.to_string()).collect()
        }
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: DEFAULT_SAMPLE_SEED,
            date_keywords: words(&[
                "date",
                "created",
                "modified",
                "updated",
                "signed",
                "timestamp",
                "time",
            ]),
            number_keywords: words(&[
                "amount", "price", "cost", "budget", "total", "sum", "count", "number", "id",
                "quantity", "qty",
            ]),
            boolean_keywords: words(&[
                "flag", "is_", "has_", "active", "enabled", "status", "boolean", "bool",
            ]),
        }
    }
}

impl InferenceRules {
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Picks up to `rules.sample_size` values, deterministically for a given seed.
///
/// Sampled values keep their original relative order.
pub fn sample_values<'a, S: AsRef<str>>(
    values: &'a [Option<S>],
    rules: &InferenceRules,
) -> Vec<Option<&'a str>> {
    if values.len() <= rules.sample_size {
        return values.iter().map(|v| v.as_ref().map(AsRef::as_ref)).collect();
    }
    let mut rng = StdRng::seed_from_u64(rules.seed);
    let mut picked = index::sample(&mut rng, values.len(), rules.sample_size).into_vec();
    picked.sort_unstable();
    picked
        .into_iter()
        .map(|idx| values[idx].as_ref().map(AsRef::as_ref))
        .collect()
}

/// Infers the column type for one identifier from its values.
///
/// Heuristics are evaluated in order (date, number, boolean) and the first one
/// whose keyword and value checks both pass wins; everything else becomes a
/// `VARCHAR` sized to the smallest bucket holding the longest sampled value.
/// Blank strings count as null.
pub fn infer_type<S: AsRef<str>>(
    identifier: &CanonicalIdentifier,
    values: &[Option<S>],
    rules: &InferenceRules,
) -> ColumnType {
    let sample = sample_values(values, rules);
    let present: Vec<&str> = sample
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    let name = identifier.as_str().to_ascii_lowercase();

    if !present.is_empty() {
        if mentions_any(&name, &rules.date_keywords)
            && let Some(decision) = classify_temporal(&present)
        {
            return decision;
        }
        if mentions_any(&name, &rules.number_keywords)
            && let Some(decision) = classify_numeric(&present)
        {
            return decision;
        }
        if mentions_any(&name, &rules.boolean_keywords) && is_boolean_column(&present) {
            return ColumnType::Boolean;
        }
    }
    varchar_for(&present)
}

fn mentions_any(name: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .any(|keyword| !keyword.is_empty() && name.contains(&keyword.to_ascii_lowercase()))
}

fn classify_temporal(values: &[&str]) -> Option<ColumnType> {
    let mut saw_time = false;
    for value in values {
        if parse_date(value).is_some() {
            continue;
        }
        if parse_datetime(value).is_some() {
            saw_time = true;
            continue;
        }
        return None;
    }
    Some(if saw_time {
        ColumnType::Timestamp
    } else {
        ColumnType::Date
    })
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn classify_numeric(values: &[&str]) -> Option<ColumnType> {
    let mut max_digits = 0usize;
    let mut integral = true;
    for value in values {
        if !value.bytes().any(|b| b.is_ascii_digit()) {
            return None;
        }
        if let Some(digits) = integer_digits(value) {
            max_digits = max_digits.max(digits);
            continue;
        }
        value.parse::<f64>().ok().filter(|v| v.is_finite())?;
        integral = false;
    }
    Some(if integral {
        ColumnType::Number {
            precision: clamp_precision(max_digits),
        }
    } else {
        ColumnType::Float
    })
}

/// Significant digit count of an optionally signed integer literal of any length.
fn integer_digits(value: &str) -> Option<usize> {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(unsigned.trim_start_matches('0').len().max(1))
}

fn is_boolean_column(values: &[&str]) -> bool {
    let distinct: BTreeSet<String> = values.iter().map(|v| v.to_ascii_lowercase()).collect();
    distinct.len() <= MAX_BOOLEAN_DISTINCT
        && distinct
            .iter()
            .all(|token| BOOLEAN_TOKENS.contains(&token.as_str()))
}

fn varchar_for(values: &[&str]) -> ColumnType {
    let Some(longest) = values.iter().map(|v| v.chars().count()).max() else {
        return ColumnType::Varchar {
            length: DEFAULT_VARCHAR_LENGTH,
        };
    };
    let length = VARCHAR_BUCKETS
        .iter()
        .copied()
        .find(|bucket| longest <= *bucket)
        .unwrap_or(VARCHAR_BUCKETS[VARCHAR_BUCKETS.len() - 1]);
    ColumnType::Varchar { length }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> CanonicalIdentifier {
        CanonicalIdentifier::from_existing(name)
    }

    fn infer(name: &str, values: &[&str]) -> ColumnType {
        let values: Vec<Option<&str>> = values.iter().map(|v| Some(*v)).collect();
        infer_type(&id(name), &values, &InferenceRules::default())
    }

    #[test]
    fn date_keyword_with_dates_yields_date() {
        assert_eq!(
            infer("created_date", &["2023-01-05", "2023-02-10"]),
            ColumnType::Date
        );
    }

    #[test]
    fn date_keyword_with_times_yields_timestamp() {
        assert_eq!(
            infer("updated_at", &["2023-01-05 10:00:00", "2023-01-06"]),
            ColumnType::Timestamp
        );
        assert_eq!(
            infer("Signed_On", &["2024-03-01T08:15:00Z"]),
            ColumnType::Timestamp
        );
    }

    #[test]
    fn unparseable_dates_fall_through() {
        assert_eq!(
            infer("created_by", &["alice", "bob"]),
            ColumnType::Varchar { length: 50 }
        );
    }

    #[test]
    fn numeric_keyword_with_integers_yields_sized_number() {
        assert_eq!(
            infer("amount", &["12", "300", "4"]),
            ColumnType::Number { precision: 3 }
        );
        assert_eq!(
            infer("Line_Total", &["-12000", "5"]),
            ColumnType::Number { precision: 5 }
        );
    }

    #[test]
    fn integers_wider_than_i64_stay_numbers() {
        assert_eq!(
            infer("order_number", &["12345678901234567890123", "7"]),
            ColumnType::Number { precision: 23 }
        );
        assert_eq!(
            infer("order_number", &["-00042"]),
            ColumnType::Number { precision: 2 }
        );
        let wide = "9".repeat(45);
        assert_eq!(
            infer("order_number", &[wide.as_str()]),
            ColumnType::Number {
                precision: MAX_NUMBER_PRECISION
            }
        );
    }

    #[test]
    fn numeric_keyword_with_decimals_yields_float() {
        assert_eq!(infer("unit_price", &["1.5", "2"]), ColumnType::Float);
    }

    #[test]
    fn alphabetic_numbers_are_rejected() {
        assert_eq!(
            infer("amount", &["inf", "12"]),
            ColumnType::Varchar { length: 50 }
        );
        assert_eq!(
            infer("amount", &["NaN"]),
            ColumnType::Varchar { length: 50 }
        );
    }

    #[test]
    fn blanks_are_null_not_zero() {
        let values = vec![Some("  "), None, Some("7")];
        assert_eq!(
            infer_type(&id("qty"), &values, &InferenceRules::default()),
            ColumnType::Number { precision: 1 }
        );
    }

    #[test]
    fn boolean_keyword_with_tokens_yields_boolean() {
        assert_eq!(
            infer("is_active", &["true", "false", "true"]),
            ColumnType::Boolean
        );
        assert_eq!(infer("Has_Permit", &["Y", "n", "YES"]), ColumnType::Boolean);
    }

    #[test]
    fn boolean_requires_vocabulary_and_small_cardinality() {
        assert_eq!(
            infer("status", &["open", "closed"]),
            ColumnType::Varchar { length: 50 }
        );
        assert_eq!(
            infer("flag", &["true", "false", "yes", "no", "y"]),
            ColumnType::Varchar { length: 50 }
        );
    }

    #[test]
    fn varchar_buckets_follow_longest_value() {
        let long = "x".repeat(120);
        assert_eq!(
            infer("notes", &["short", &long]),
            ColumnType::Varchar { length: 255 }
        );
        let huge = "x".repeat(5000);
        assert_eq!(
            infer("notes", &[&huge]),
            ColumnType::Varchar { length: 1000 }
        );
    }

    #[test]
    fn no_sample_defaults_to_255() {
        let values: Vec<Option<&str>> = vec![None, Some("")];
        assert_eq!(
            infer_type(&id("notes"), &values, &InferenceRules::default()),
            ColumnType::Varchar { length: 255 }
        );
        let none: Vec<Option<&str>> = Vec::new();
        assert_eq!(
            infer_type(&id("amount"), &none, &InferenceRules::default()),
            ColumnType::Varchar { length: 255 }
        );
    }

    #[test]
    fn sampling_is_capped_and_deterministic() {
        let values: Vec<Option<String>> = (0..5000).map(|i| Some(i.to_string())).collect();
        let rules = InferenceRules::default().with_sample_size(100);
        let first = sample_values(&values, &rules);
        let second = sample_values(&values, &rules);
        assert_eq!(first.len(), 100);
        assert_eq!(first, second);
        assert_eq!(
            infer_type(&id("count"), &values, &rules),
            infer_type(&id("count"), &values, &rules)
        );
    }

    #[test]
    fn column_types_round_trip_through_sql_text() {
        for ty in [
            ColumnType::Date,
            ColumnType::Timestamp,
            ColumnType::Number { precision: 10 },
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::Varchar { length: 255 },
        ] {
            assert_eq!(ty.to_string().parse::<ColumnType>().unwrap(), ty);
        }
    }

    #[test]
    fn warehouse_type_synonyms_parse() {
        assert_eq!(
            "number(38,0)".parse::<ColumnType>().unwrap(),
            ColumnType::Number { precision: 38 }
        );
        assert_eq!(
            "NUMBER(12,2)".parse::<ColumnType>().unwrap(),
            ColumnType::Float
        );
        assert_eq!(
            "TEXT".parse::<ColumnType>().unwrap(),
            ColumnType::Varchar {
                length: UNBOUNDED_VARCHAR_LENGTH
            }
        );
        assert_eq!(
            "TIMESTAMP_NTZ".parse::<ColumnType>().unwrap(),
            ColumnType::Timestamp
        );
        assert!("GEOGRAPHY".parse::<ColumnType>().is_err());
    }
}
