//! Resolution of a configured logical table name to an available source file.

use serde::Serialize;

const CSV_EXTENSION: &str = ".csv";

/// The rule that produced a match, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Exact,
    CsvExtension,
    CaseInsensitive,
    Substring,
}

impl MatchRule {
    const ORDER: [MatchRule; 4] = [
        MatchRule::Exact,
        MatchRule::CsvExtension,
        MatchRule::CaseInsensitive,
        MatchRule::Substring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::Exact => "exact",
            MatchRule::CsvExtension => "csv_extension",
            MatchRule::CaseInsensitive => "case_insensitive",
            MatchRule::Substring => "substring",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Found { name: String, rule: MatchRule },
    NotFound,
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Found { name, .. } => Some(name),
            MatchOutcome::NotFound => None,
        }
    }
}

struct MatchKeys<'a> {
    logical: &'a str,
    with_extension: String,
    lowered: String,
}

impl MatchKeys<'_> {
    fn satisfies(&self, rule: MatchRule, candidate: &str) -> bool {
        match rule {
            MatchRule::Exact => candidate == self.logical,
            MatchRule::CsvExtension => candidate == self.with_extension,
            MatchRule::CaseInsensitive => candidate.eq_ignore_ascii_case(self.logical)
                || candidate.eq_ignore_ascii_case(&self.with_extension)
                || candidate.to_lowercase() == self.lowered,
            MatchRule::Substring => {
                let candidate = candidate.to_lowercase();
                !candidate.is_empty()
                    && (candidate.contains(&self.lowered) || self.lowered.contains(&candidate))
            }
        }
    }
}

/// Finds the available name that best matches `logical_name`.
///
/// Rules are tried in order and the first rule with any hit wins; within a
/// rule the earliest available name wins. A blank logical name never matches.
pub fn find_match<S: AsRef<str>>(logical_name: &str, available: &[S]) -> MatchOutcome {
    let logical = logical_name.trim();
    if logical.is_empty() {
        return MatchOutcome::NotFound;
    }

    let keys = MatchKeys {
        logical,
        with_extension: format!("{logical}{CSV_EXTENSION}"),
        lowered: logical.to_lowercase(),
    };

    for rule in MatchRule::ORDER {
        if let Some(hit) = available
            .iter()
            .map(AsRef::as_ref)
            .find(|candidate| keys.satisfies(rule, candidate))
        {
            return MatchOutcome::Found {
                name: hit.to_string(),
                rule,
            };
        }
    }
    MatchOutcome::NotFound
}
