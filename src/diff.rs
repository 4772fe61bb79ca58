//! Set comparison between a target table's columns and an incoming column set.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::sanitize::CanonicalIdentifier;

/// Partition of the union of target and incoming columns.
///
/// `matching` holds the target's spelling of each shared column. All three
/// sets are disjoint under case-insensitive comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub matching: BTreeSet<CanonicalIdentifier>,
    pub missing_in_target: BTreeSet<CanonicalIdentifier>,
    pub extra_in_target: BTreeSet<CanonicalIdentifier>,
}

impl SchemaDiff {
    pub fn matching_count(&self) -> usize {
        self.matching.len()
    }

    pub fn missing_count(&self) -> usize {
        self.missing_in_target.len()
    }

    pub fn extra_count(&self) -> usize {
        self.extra_in_target.len()
    }

    /// True when neither side has columns the other lacks.
    pub fn is_aligned(&self) -> bool {
        self.missing_in_target.is_empty() && self.extra_in_target.is_empty()
    }
}

/// Computes `target ∩ incoming`, `incoming − target`, and `target − incoming`.
///
/// No fuzzy matching happens here; two columns are the same column exactly
/// when their comparison keys are equal.
pub fn diff<'a, T, I>(target: T, incoming: I) -> SchemaDiff
where
    T: IntoIterator<Item = &'a CanonicalIdentifier>,
    I: IntoIterator<Item = &'a CanonicalIdentifier>,
{
    let target: BTreeSet<CanonicalIdentifier> = target.into_iter().cloned().collect();
    let incoming: BTreeSet<CanonicalIdentifier> = incoming.into_iter().cloned().collect();

    SchemaDiff {
        matching: target.intersection(&incoming).cloned().collect(),
        missing_in_target: incoming.difference(&target).cloned().collect(),
        extra_in_target: target.difference(&incoming).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(names: &[&str]) -> Vec<CanonicalIdentifier> {
        names
            .iter()
            .map(|n| CanonicalIdentifier::from_existing(*n))
            .collect()
    }

    fn names(set: &BTreeSet<CanonicalIdentifier>) -> Vec<&str> {
        set.iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn partitions_overlapping_sets() {
        let target = ids(&["A", "B", "C"]);
        let incoming = ids(&["B", "C", "D"]);
        let result = diff(&target, &incoming);
        assert_eq!(names(&result.matching), ["B", "C"]);
        assert_eq!(names(&result.missing_in_target), ["D"]);
        assert_eq!(names(&result.extra_in_target), ["A"]);
        assert_eq!(
            (
                result.matching_count(),
                result.missing_count(),
                result.extra_count()
            ),
            (2, 1, 1)
        );
    }

    #[test]
    fn comparison_ignores_case_and_keeps_target_spelling() {
        let target = ids(&["SCOOP_ID", "NAME"]);
        let incoming = ids(&["Scoop_ID", "name"]);
        let result = diff(&target, &incoming);
        assert!(result.is_aligned());
        assert_eq!(names(&result.matching), ["NAME", "SCOOP_ID"]);
    }

    #[test]
    fn empty_sides() {
        let none: Vec<CanonicalIdentifier> = Vec::new();
        let incoming = ids(&["X"]);
        let result = diff(&none, &incoming);
        assert_eq!(names(&result.missing_in_target), ["X"]);
        assert!(result.matching.is_empty());
        assert!(diff(&none, &none).is_aligned());
    }

    proptest! {
        #[test]
        fn unions_reconstruct_both_sides(
            target in proptest::collection::btree_set("[A-Ea-e]{1,2}", 0..8),
            incoming in proptest::collection::btree_set("[A-Ea-e]{1,2}", 0..8),
        ) {
            let target: BTreeSet<CanonicalIdentifier> =
                target.into_iter().map(CanonicalIdentifier::from_existing).collect();
            let incoming: BTreeSet<CanonicalIdentifier> =
                incoming.into_iter().map(CanonicalIdentifier::from_existing).collect();
            let result = diff(&target, &incoming);

            let incoming_side: BTreeSet<_> =
                result.matching.union(&result.missing_in_target).cloned().collect();
            let target_side: BTreeSet<_> =
                result.matching.union(&result.extra_in_target).cloned().collect();
            prop_assert_eq!(incoming_side, incoming);
            prop_assert_eq!(target_side, target);
            prop_assert!(result.missing_in_target.is_disjoint(&result.extra_in_target));
            prop_assert!(result.matching.is_disjoint(&result.missing_in_target));
        }
    }
}
