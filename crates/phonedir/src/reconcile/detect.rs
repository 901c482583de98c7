//! Numbering conflict detection.

use super::types::{Conflict, ConflictEntry, FeedOrigin};
use crate::model::Extension;
use std::collections::{BTreeMap, BTreeSet};

/// Group records by number and flag every number given different
/// departments by different origins. The result is ordered by number.
pub(crate) fn find_conflicts<'a>(
    records: impl IntoIterator<Item = (&'a Extension, &'a FeedOrigin)>,
) -> Vec<Conflict> {
    let mut by_number: BTreeMap<&str, BTreeSet<(&str, &FeedOrigin)>> = BTreeMap::new();
    for (extension, origin) in records {
        by_number
            .entry(extension.number.as_str())
            .or_default()
            .insert((extension.department.as_str(), origin));
    }

    by_number
        .into_iter()
        .filter(|(_, claims)| is_conflicting(claims))
        .map(|(number, claims)| {
            let entries: BTreeSet<ConflictEntry> = claims
                .iter()
                .map(|(department, origin)| ConflictEntry {
                    department: department.to_string(),
                    feed: origin.feed.clone(),
                    pass: origin.pass,
                })
                .collect();
            let feeds: BTreeSet<String> = claims
                .iter()
                .map(|(_, origin)| origin.feed.clone())
                .collect();
            Conflict {
                number: number.to_string(),
                entries: entries.into_iter().collect(),
                feeds: feeds.into_iter().collect(),
            }
        })
        .collect()
}

fn is_conflicting(claims: &BTreeSet<(&str, &FeedOrigin)>) -> bool {
    claims.iter().enumerate().any(|(i, (dept_a, origin_a))| {
        claims
            .iter()
            .skip(i + 1)
            .any(|(dept_b, origin_b)| dept_a != dept_b && origin_a != origin_b)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(department: &str, number: &str, feed: &str, pass: u32) -> (Extension, FeedOrigin) {
        let origin = FeedOrigin {
            feed: feed.to_string(),
            pass,
        };
        (Extension::new(department, number, None).unwrap(), origin)
    }

    fn detect(claims: &[(Extension, FeedOrigin)]) -> Vec<Conflict> {
        find_conflicts(claims.iter().map(|(e, o)| (e, o)))
    }

    #[test]
    fn test_different_labels_from_different_feeds_conflict() {
        let conflicts = detect(&[
            claim("Sales", "100", "A", 0),
            claim("Support", "100", "B", 0),
            claim("Caja 1", "2201", "A", 0),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].number, "100");
        assert_eq!(conflicts[0].feeds, vec!["A", "B"]);
        assert_eq!(conflicts[0].entries.len(), 2);
    }

    #[test]
    fn test_shared_line_in_one_pass_is_not_a_conflict() {
        let conflicts = detect(&[
            claim("Recepcion", "100", "A", 0),
            claim("Seguridad", "100", "A", 0),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_same_feed_on_two_passes_conflicts() {
        let conflicts = detect(&[claim("Sales", "100", "A", 1), claim("Support", "100", "A", 2)]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].feeds, vec!["A"]);
    }

    #[test]
    fn test_agreeing_feeds_do_not_conflict() {
        let conflicts = detect(&[claim("Sales", "100", "A", 0), claim("Sales", "100", "B", 0)]);
        assert!(conflicts.is_empty());
    }
}
