//! Column-label normalization into warehouse-safe identifiers.
//!
//! [`sanitize`] turns an arbitrary header label into a [`CanonicalIdentifier`]
//! that contains only ASCII letters, digits, and underscores, starts with a
//! letter or underscore, is never empty, and never collides with a reserved
//! word. The transform is lossy: accented letters, ideographs, and emoji all
//! become underscores and cannot be recovered from the identifier.
//!
//! Identifiers preserve the label's case unless the rules select
//! [`CasePolicy::Upper`]. Equality, ordering, and hashing of identifiers are
//! case-insensitive so that schema comparisons against warehouses which fold
//! unquoted names to upper case stay stable.

use std::{
    collections::{BTreeSet, HashSet},
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::LazyLock,
};

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const UNNAMED_COLUMN: &str = "UNNAMED_COLUMN";
pub const IDENTIFIER_PREFIX: &str = "COL_";
pub const DEFAULT_PUNCTUATION: &str = "(){}[]/?.,:;!@#$%^&*+=|\\`~<>\"'-";

const QUOTE_CHARS: &[char] = &['"', '\''];

pub const DEFAULT_RESERVED_WORDS: &[&str] = &[
    "ALL",
    "ALTER",
    "AND",
    "ANY",
    "AS",
    "BETWEEN",
    "BY",
    "CASE",
    "CAST",
    "CHECK",
    "COLUMN",
    "CONNECT",
    "CONSTRAINT",
    "CREATE",
    "CROSS",
    "CURRENT",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
    "CURRENT_USER",
    "DATABASE",
    "DELETE",
    "DISTINCT",
    "DROP",
    "ELSE",
    "EXISTS",
    "FALSE",
    "FOLLOWING",
    "FOR",
    "FROM",
    "FULL",
    "GRANT",
    "GROUP",
    "HAVING",
    "ILIKE",
    "IN",
    "INCREMENT",
    "INNER",
    "INSERT",
    "INTERSECT",
    "INTO",
    "IS",
    "JOIN",
    "LATERAL",
    "LEFT",
    "LIKE",
    "LOCALTIME",
    "LOCALTIMESTAMP",
    "MINUS",
    "NATURAL",
    "NOT",
    "NULL",
    "OF",
    "ON",
    "OR",
    "ORDER",
    "QUALIFY",
    "REGEXP",
    "REVOKE",
    "RIGHT",
    "RLIKE",
    "ROW",
    "ROWS",
    "SAMPLE",
    "SCHEMA",
    "SELECT",
    "SET",
    "SOME",
    "START",
    "TABLE",
    "TABLESAMPLE",
    "THEN",
    "TO",
    "TRIGGER",
    "TRUE",
    "TRY_CAST",
    "UNION",
    "UNIQUE",
    "UPDATE",
    "USING",
    "VALUES",
    "VIEW",
    "WHEN",
    "WHENEVER",
    "WHERE",
    "WITH",
];

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is a valid regex")
});

/// How emitted identifiers are cased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CasePolicy {
    /// Keep the label's case; comparisons remain case-insensitive.
    #[default]
    Preserve,
    /// Upper-case every identifier, matching warehouses that fold unquoted names.
    Upper,
}

impl FromStr for CasePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "preserve" | "original" => Ok(CasePolicy::Preserve),
            "upper" | "uppercase" => Ok(CasePolicy::Upper),
            other => Err(anyhow!(
                "Unknown identifier case policy '{other}'. Supported: preserve, upper"
            )),
        }
    }
}

/// The configurable rule set applied by [`sanitize`].
#[derive(Debug, Clone)]
pub struct SanitizeRules {
    punctuation: BTreeSet<char>,
    reserved_words: HashSet<String>,
    case_policy: CasePolicy,
}

impl Default for SanitizeRules {
    fn default() -> Self {
        Self {
            punctuation: DEFAULT_PUNCTUATION.chars().collect(),
            reserved_words: DEFAULT_RESERVED_WORDS
                .iter()
                .map(|word| word.to_string())
                .collect(),
            case_policy: CasePolicy::default(),
        }
    }
}

impl SanitizeRules {
    pub fn with_case_policy(mut self, policy: CasePolicy) -> Self {
        self.case_policy = policy;
        self
    }

    /// Adds words to the reserved list; comparison is case-insensitive.
    pub fn with_reserved_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            let word = word.as_ref().trim();
            if !word.is_empty() {
                self.reserved_words.insert(word.to_ascii_uppercase());
            }
        }
        self
    }

    /// Replaces the punctuation set mapped to underscores in step 3.
    ///
    /// Letters, digits, and `_` are ignored so that [`IDENTIFIER_PREFIX`] and
    /// [`UNNAMED_COLUMN`] survive a second pass unchanged.
    pub fn with_punctuation(mut self, punctuation: &str) -> Self {
        self.punctuation = punctuation
            .chars()
            .filter(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
            .collect();
        self
    }

    pub fn punctuation(&self) -> String {
        self.punctuation.iter().collect()
    }

    pub fn case_policy(&self) -> CasePolicy {
        self.case_policy
    }

    pub fn is_reserved(&self, candidate: &str) -> bool {
        self.reserved_words
            .contains(&candidate.to_ascii_uppercase())
    }

    fn maps_to_underscore(&self, ch: char) -> bool {
        ch == ' ' || self.punctuation.contains(&ch) || !(ch.is_ascii_alphanumeric() || ch == '_')
    }
}

/// A warehouse-safe column name.
///
/// Compares, orders, and hashes case-insensitively; [`fmt::Display`] renders
/// the emitted spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalIdentifier(String);

impl CanonicalIdentifier {
    /// Wraps a name reported by a live warehouse without re-sanitizing it.
    ///
    /// Live names are authoritative; a name that is not well formed still
    /// participates in diffs under its own spelling.
    pub fn from_existing(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Upper-cased key used for every comparison between identifiers.
    pub fn comparison_key(&self) -> String {
        self.0.to_ascii_uppercase()
    }

    pub fn is_well_formed(&self) -> bool {
        IDENTIFIER_PATTERN.is_match(&self.0)
    }

    fn with_suffix(&self, suffix: usize) -> Self {
        Self(format!("{}_{suffix}", self.0))
    }

    fn key_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b.to_ascii_uppercase())
    }
}

impl PartialEq for CanonicalIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CanonicalIdentifier {}

impl Hash for CanonicalIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.key_bytes() {
            state.write_u8(byte);
        }
        state.write_u8(0xff);
    }
}

impl Ord for CanonicalIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_bytes().cmp(other.key_bytes())
    }
}

impl PartialOrd for CanonicalIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the canonical identifier for one source label.
///
/// Steps, in order: trim whitespace and surrounding quotes; map spaces, the
/// configured punctuation, and every other non-ASCII-word character to `_`;
/// collapse underscore runs; trim underscores; fall back to
/// [`UNNAMED_COLUMN`]; prefix [`IDENTIFIER_PREFIX`] when the first character
/// is not a letter or underscore, and again while the result is reserved;
/// finally apply the case policy. The result is a fixed point:
/// `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(label: &str, rules: &SanitizeRules) -> CanonicalIdentifier {
    let trimmed = label.trim().trim_matches(QUOTE_CHARS).trim();

    let mut replaced = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let mapped = if rules.maps_to_underscore(ch) { '_' } else { ch };
        if mapped == '_' && replaced.ends_with('_') {
            continue;
        }
        replaced.push(mapped);
    }

    let core = replaced.trim_matches('_');
    let mut identifier = if core.is_empty() {
        UNNAMED_COLUMN.to_string()
    } else {
        core.to_string()
    };

    if !identifier
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
        identifier.insert_str(0, IDENTIFIER_PREFIX);
    }
    while rules.is_reserved(&identifier) {
        identifier.insert_str(0, IDENTIFIER_PREFIX);
    }

    if rules.case_policy == CasePolicy::Upper {
        identifier.make_ascii_uppercase();
    }
    CanonicalIdentifier(identifier)
}

/// Sanitizes a full header row and makes the identifiers unique.
///
/// Collisions are detected case-insensitively. A label whose identifier is
/// already taken receives the suffix `_<position>` (1-based column position);
/// if that is taken too, further `_<n>` suffixes are tried until unique.
pub fn sanitize_headers<S: AsRef<str>>(
    labels: &[S],
    rules: &SanitizeRules,
) -> Vec<CanonicalIdentifier> {
    let mut seen: HashSet<CanonicalIdentifier> = HashSet::with_capacity(labels.len());
    let mut identifiers = Vec::with_capacity(labels.len());
    for (idx, label) in labels.iter().enumerate() {
        let base = sanitize(label.as_ref(), rules);
        let mut candidate = base.clone();
        let mut attempt = idx + 1;
        while seen.contains(&candidate) {
            candidate = base.with_suffix(attempt);
            attempt += 1;
        }
        seen.insert(candidate.clone());
        identifiers.push(candidate);
    }
    identifiers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> SanitizeRules {
        SanitizeRules::default()
    }

    #[test]
    fn empty_and_blank_labels_fall_back_to_placeholder() {
        assert_eq!(sanitize("", &rules()).as_str(), UNNAMED_COLUMN);
        assert_eq!(sanitize("   ", &rules()).as_str(), UNNAMED_COLUMN);
        assert_eq!(sanitize("\"\"", &rules()).as_str(), UNNAMED_COLUMN);
    }

    #[test]
    fn punctuation_only_labels_fall_back_to_placeholder() {
        assert_eq!(sanitize("?!/()", &rules()).as_str(), UNNAMED_COLUMN);
        assert_eq!(sanitize("---", &rules()).as_str(), UNNAMED_COLUMN);
    }

    #[test]
    fn digit_only_labels_receive_prefix() {
        assert_eq!(sanitize("2024", &rules()).as_str(), "COL_2024");
        assert_eq!(sanitize("1st Payment", &rules()).as_str(), "COL_1st_Payment");
    }

    #[test]
    fn reserved_words_are_prefixed_in_any_case() {
        assert_eq!(sanitize("select", &rules()).as_str(), "COL_select");
        assert_eq!(sanitize("Table", &rules()).as_str(), "COL_Table");
        assert_eq!(sanitize("\"FROM\"", &rules()).as_str(), "COL_FROM");
    }

    #[test]
    fn spaces_and_punctuation_collapse_to_single_underscores() {
        assert_eq!(sanitize(" Scoop ID ", &rules()).as_str(), "Scoop_ID");
        assert_eq!(
            sanitize("Contract Signed? (Y/N)", &rules()).as_str(),
            "Contract_Signed_Y_N"
        );
        assert_eq!(sanitize("kW - DC", &rules()).as_str(), "kW_DC");
    }

    #[test]
    fn non_ascii_characters_are_replaced() {
        assert_eq!(sanitize("Café ☕ Notes", &rules()).as_str(), "Caf_Notes");
        assert_eq!(sanitize("📅 Install Date", &rules()).as_str(), "Install_Date");
        assert_eq!(sanitize("金额", &rules()).as_str(), UNNAMED_COLUMN);
    }

    #[test]
    fn upper_case_policy_upper_cases_output() {
        let rules = rules().with_case_policy(CasePolicy::Upper);
        assert_eq!(sanitize("Scoop ID", &rules).as_str(), "SCOOP_ID");
        assert_eq!(sanitize("order", &rules).as_str(), "COL_ORDER");
    }

    #[test]
    fn comparison_is_case_insensitive_while_spelling_is_preserved() {
        let spaced = sanitize("Scoop ID", &rules());
        let snake = sanitize("scoop_id", &rules());
        assert_ne!(spaced.as_str(), snake.as_str());
        assert_eq!(spaced, snake);
        assert_eq!(spaced.comparison_key(), snake.comparison_key());
    }

    #[test]
    fn custom_reserved_words_extend_defaults() {
        let rules = rules().with_reserved_words(["status"]);
        assert_eq!(sanitize("Status", &rules).as_str(), "COL_Status");
        assert_eq!(sanitize("select", &rules).as_str(), "COL_select");
    }

    #[test]
    fn colliding_labels_are_suffixed_with_position() {
        let labels = ["Scoop ID", "scoop-id", "Name", "Scoop_ID"];
        let identifiers = sanitize_headers(&labels, &rules());
        let rendered: Vec<&str> = identifiers.iter().map(|id| id.as_str()).collect();
        assert_eq!(rendered, ["Scoop_ID", "scoop_id_2", "Name", "Scoop_ID_4"]);
    }

    #[test]
    fn suffix_collisions_keep_searching() {
        let labels = ["a", "a_2", "a"];
        let identifiers = sanitize_headers(&labels, &rules());
        let rendered: Vec<&str> = identifiers.iter().map(|id| id.as_str()).collect();
        assert_eq!(rendered, ["a", "a_2", "a_3"]);

        let labels = ["a", "a", "a_2"];
        let identifiers = sanitize_headers(&labels, &rules());
        let unique: HashSet<_> = identifiers.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn well_formed_check_matches_identifier_shape() {
        assert!(CanonicalIdentifier::from_existing("ORDER_ID").is_well_formed());
        assert!(!CanonicalIdentifier::from_existing("c-test").is_well_formed());
        assert!(!CanonicalIdentifier::from_existing("9lives").is_well_formed());
    }

    #[test]
    fn case_policy_parses_from_settings() {
        assert_eq!(CasePolicy::from_str("UPPER").unwrap(), CasePolicy::Upper);
        assert_eq!(CasePolicy::from_str("preserve").unwrap(), CasePolicy::Preserve);
        assert!(CasePolicy::from_str("snake").is_err());
    }
}
