//! Segment structural diff
//!
//! Compares two ordered collections of segment entries keyed by feed
//! external id and classifies each as added/removed/changed/rank-only-
//! changed/unchanged. Feed sources sometimes reassign a segment's external
//! id while preserving its content (rename/split/merge); a heuristic links
//! such removed/added pairs so callers can preserve the internal id, and
//! with it any on-air part instances, across the rename.

use crate::model::IngestSegment;
use std::collections::{BTreeMap, HashSet};

/// One segment reduced to what the diff compares
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub name: String,
    pub rank: f64,
    /// Feed modification timestamp, milliseconds since epoch
    pub modified: i64,
    /// Ordered part external ids
    pub parts: Vec<String>,
}

/// Segment entries keyed by feed external id
pub type SegmentEntries = BTreeMap<String, SegmentEntry>;

/// Reduce feed segments to diffable entries
pub fn compile_segment_entries(segments: &[IngestSegment]) -> SegmentEntries {
    segments
        .iter()
        .map(|s| {
            (
                s.external_id.clone(),
                SegmentEntry {
                    name: s.name.clone(),
                    rank: s.rank,
                    modified: s.modified,
                    parts: s.parts.iter().map(|p| p.external_id.clone()).collect(),
                },
            )
        })
        .collect()
}

/// Result of diffing two segment entry sets (external ids throughout)
#[derive(Debug, Default, Clone)]
pub struct SegmentChanges {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Subset of `changed` where only the rank differs; callers may apply
    /// a cheap rank update instead of full regeneration
    pub only_rank_changed: BTreeMap<String, f64>,
    /// Rename links: old external id -> new external id
    pub external_id_changed: BTreeMap<String, String>,
}

impl SegmentChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Diff two segment entry sets.
///
/// `old_modified` carries the previously stored `external_modified` per
/// external id; when supplied, a differing feed timestamp alone makes a
/// segment `changed` even with identical content.
pub fn diff_segment_entries(
    old_entries: &SegmentEntries,
    new_entries: &SegmentEntries,
    old_modified: Option<&BTreeMap<String, i64>>,
) -> SegmentChanges {
    let mut changes = SegmentChanges::default();

    for (id, new_entry) in new_entries {
        match old_entries.get(id) {
            None => changes.added.push(id.clone()),
            Some(old_entry) => {
                let content_equal =
                    old_entry.parts == new_entry.parts && old_entry.name == new_entry.name;
                let rank_equal = old_entry.rank == new_entry.rank;
                let modified_equal = match old_modified {
                    Some(map) => map.get(id).copied() == Some(new_entry.modified),
                    None => true,
                };

                if content_equal && rank_equal && modified_equal {
                    changes.unchanged.push(id.clone());
                } else {
                    if content_equal && modified_equal && !rank_equal {
                        changes.only_rank_changed.insert(id.clone(), new_entry.rank);
                    }
                    changes.changed.push(id.clone());
                }
            }
        }
    }

    for id in old_entries.keys() {
        if !new_entries.contains_key(id) {
            changes.removed.push(id.clone());
        }
    }

    detect_renames(&mut changes, old_entries, new_entries);
    changes
}

/// For every removed entry, search the added entries first for an
/// identical name, then for any overlapping part id. The first match
/// records the rename; each added id links at most once. A split or merge
/// surfaces as one removed + several added/changed entries with the
/// heuristic linking at most one pair; the remaining fragments stay
/// ordinary adds/removals.
fn detect_renames(
    changes: &mut SegmentChanges,
    old_entries: &SegmentEntries,
    new_entries: &SegmentEntries,
) {
    let mut used_new: HashSet<&String> = HashSet::new();

    for removed_id in &changes.removed {
        let Some(old_entry) = old_entries.get(removed_id) else {
            continue;
        };

        let by_name = changes.added.iter().find(|added_id| {
            !used_new.contains(*added_id)
                && new_entries
                    .get(*added_id)
                    .map(|e| e.name == old_entry.name)
                    .unwrap_or(false)
        });

        let matched = by_name.or_else(|| {
            changes.added.iter().find(|added_id| {
                !used_new.contains(*added_id)
                    && new_entries
                        .get(*added_id)
                        .map(|e| e.parts.iter().any(|p| old_entry.parts.contains(p)))
                        .unwrap_or(false)
            })
        });

        if let Some(new_id) = matched {
            used_new.insert(new_id);
            changes
                .external_id_changed
                .insert(removed_id.clone(), new_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, rank: f64, modified: i64, parts: &[&str]) -> SegmentEntry {
        SegmentEntry {
            name: name.to_string(),
            rank,
            modified,
            parts: parts.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn entries(items: Vec<(&str, SegmentEntry)>) -> SegmentEntries {
        items
            .into_iter()
            .map(|(id, e)| (id.to_string(), e))
            .collect()
    }

    #[test]
    fn test_diff_against_self_is_all_unchanged() {
        let set = entries(vec![
            ("s1", entry("One", 1.0, 0, &["p1", "p2"])),
            ("s2", entry("Two", 2.0, 0, &["p3"])),
        ]);
        let changes = diff_segment_entries(&set, &set, None);
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged.len(), 2);
        assert!(changes.external_id_changed.is_empty());
    }

    #[test]
    fn test_added_and_removed() {
        let old = entries(vec![("s1", entry("One", 1.0, 0, &["p1"]))]);
        let new = entries(vec![("s2", entry("Two", 1.0, 0, &["p9"]))]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.added, vec!["s2".to_string()]);
        assert_eq!(changes.removed, vec!["s1".to_string()]);
        // Different name, no overlapping parts: not a rename
        assert!(changes.external_id_changed.is_empty());
    }

    #[test]
    fn test_rank_only_change_is_flagged() {
        let old = entries(vec![("s1", entry("One", 1.0, 0, &["p1", "p2"]))]);
        let new = entries(vec![("s1", entry("One", 5.0, 0, &["p1", "p2"]))]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.changed, vec!["s1".to_string()]);
        assert_eq!(changes.only_rank_changed.get("s1"), Some(&5.0));
    }

    #[test]
    fn test_part_content_change_is_full_change() {
        let old = entries(vec![("s1", entry("One", 1.0, 0, &["p1", "p2"]))]);
        let new = entries(vec![("s1", entry("One", 1.0, 0, &["p2", "p1"]))]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.changed, vec!["s1".to_string()]);
        assert!(changes.only_rank_changed.is_empty());
    }

    #[test]
    fn test_modified_timestamp_forces_change_when_tracked() {
        let old = entries(vec![("s1", entry("One", 1.0, 10, &["p1"]))]);
        let new = entries(vec![("s1", entry("One", 1.0, 20, &["p1"]))]);

        // Without stored timestamps the entries compare equal
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.unchanged, vec!["s1".to_string()]);

        let mut stored = BTreeMap::new();
        stored.insert("s1".to_string(), 10i64);
        let changes = diff_segment_entries(&old, &new, Some(&stored));
        assert_eq!(changes.changed, vec!["s1".to_string()]);
        assert!(changes.only_rank_changed.is_empty());
    }

    #[test]
    fn test_rename_detected_by_name() {
        let old = entries(vec![("s1", entry("Weather", 1.0, 0, &["p1", "p2"]))]);
        let new = entries(vec![("sX", entry("Weather", 1.0, 0, &["p1", "p2"]))]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.added, vec!["sX".to_string()]);
        assert_eq!(changes.removed, vec!["s1".to_string()]);
        assert_eq!(
            changes.external_id_changed.get("s1"),
            Some(&"sX".to_string())
        );
    }

    #[test]
    fn test_rename_detected_by_part_overlap() {
        let old = entries(vec![("s1", entry("Old Name", 1.0, 0, &["p1", "p2"]))]);
        let new = entries(vec![("sX", entry("New Name", 1.0, 0, &["p2", "p3"]))]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(
            changes.external_id_changed.get("s1"),
            Some(&"sX".to_string())
        );
    }

    #[test]
    fn test_rename_links_exactly_one_pair() {
        // One removed, two added with the same name: only the first links
        let old = entries(vec![("s1", entry("News", 1.0, 0, &["p1"]))]);
        let new = entries(vec![
            ("sA", entry("News", 1.0, 0, &["p1"])),
            ("sB", entry("News", 2.0, 0, &["p9"])),
        ]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.external_id_changed.len(), 1);
        assert_eq!(
            changes.external_id_changed.get("s1"),
            Some(&"sA".to_string())
        );
    }

    #[test]
    fn test_split_links_one_pair_rest_stays_added() {
        // s1 split into sA (keeps p1) and sB (takes p2)
        let old = entries(vec![("s1", entry("Block", 1.0, 0, &["p1", "p2"]))]);
        let new = entries(vec![
            ("sA", entry("Block A", 1.0, 0, &["p1"])),
            ("sB", entry("Block B", 2.0, 0, &["p2"])),
        ]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.removed, vec!["s1".to_string()]);
        assert_eq!(changes.added.len(), 2);
        assert_eq!(changes.external_id_changed.len(), 1);
        assert_eq!(
            changes.external_id_changed.get("s1"),
            Some(&"sA".to_string())
        );
    }

    #[test]
    fn test_merge_two_into_one() {
        let old = entries(vec![
            ("s1", entry("Block A", 1.0, 0, &["p1"])),
            ("s2", entry("Block B", 2.0, 0, &["p2"])),
        ]);
        let new = entries(vec![("sM", entry("Merged", 1.0, 0, &["p1", "p2"]))]);
        let changes = diff_segment_entries(&old, &new, None);
        assert_eq!(changes.added, vec!["sM".to_string()]);
        assert_eq!(changes.removed.len(), 2);
        // Only one of the removed entries links to the merged segment
        assert_eq!(changes.external_id_changed.len(), 1);
    }

    #[test]
    fn test_compile_segment_entries_preserves_part_order() {
        use crate::model::IngestPart;
        let seg = IngestSegment {
            external_id: "s1".to_string(),
            name: "One".to_string(),
            rank: 1.0,
            modified: 7,
            payload: serde_json::Value::Null,
            parts: vec![
                IngestPart {
                    external_id: "p2".to_string(),
                    name: "B".to_string(),
                    rank: 2.0,
                    payload: serde_json::Value::Null,
                },
                IngestPart {
                    external_id: "p1".to_string(),
                    name: "A".to_string(),
                    rank: 1.0,
                    payload: serde_json::Value::Null,
                },
            ],
        };
        let entries = compile_segment_entries(&[seg]);
        assert_eq!(entries["s1"].parts, vec!["p2".to_string(), "p1".to_string()]);
        assert_eq!(entries["s1"].modified, 7);
    }
}
