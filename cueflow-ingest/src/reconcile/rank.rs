//! Part instance rank reconciliation
//!
//! Parts can be inserted, removed, or reordered by ingest while the
//! PartInstances referencing them must keep a total order that matches the
//! new part order for live instances and keeps orphaned instances at a
//! rank-stable position relative to their former neighbors. The caller
//! captures each changed segment's previous part-id to rank snapshot
//! before applying the ingest change and passes it in here.
//!
//! The pass is idempotent: re-running it with no further part changes
//! marks nothing dirty.

use crate::cache::WriteCollection;
use crate::model::{Part, PartInstance, PartInstanceOrphaned};
use cueflow_common::ids::{PartId, SegmentId};
use std::collections::HashMap;
use tracing::debug;

/// Previous part ranks of one segment, captured before the ingest change
pub type PartRankSnapshot = HashMap<PartId, f64>;

/// Reconcile instance ranks for every changed segment.
pub fn update_part_instance_ranks(
    instances: &mut WriteCollection<PartInstance>,
    parts: &WriteCollection<Part>,
    changed_segments: &[(SegmentId, PartRankSnapshot)],
) {
    for (segment_id, prev_ranks) in changed_segments {
        reconcile_segment(instances, parts, segment_id, prev_ranks);
    }
}

fn reconcile_segment(
    instances: &mut WriteCollection<PartInstance>,
    parts: &WriteCollection<Part>,
    segment_id: &SegmentId,
    prev_ranks: &PartRankSnapshot,
) {
    let new_ranks: HashMap<PartId, f64> = parts
        .find(|p| &p.segment_id == segment_id)
        .into_iter()
        .map(|p| (p.id.clone(), p.rank))
        .collect();

    let instance_ids: Vec<_> = instances
        .find(|i| &i.segment_id == segment_id && !i.reset)
        .into_iter()
        .map(|i| i.id.clone())
        .collect();

    // Step 1+2: relink live instances, orphan the ones whose part vanished
    for id in &instance_ids {
        let part_rank = instances
            .find_one(id)
            .and_then(|i| new_ranks.get(&i.part.id).copied());
        match part_rank {
            Some(rank) => {
                // An adlib-part orphan has no backing part by design and
                // keeps its flag even on an id collision
                let _ = instances.update_one(id, |inst| {
                    inst.part.rank = rank;
                    if inst.orphaned == Some(PartInstanceOrphaned::Deleted) {
                        inst.orphaned = None;
                    }
                });
            }
            None => {
                // Keep the old rank as a placeholder until interpolation
                let _ = instances.update_one(id, |inst| {
                    if inst.orphaned.is_none() {
                        inst.orphaned = Some(PartInstanceOrphaned::Deleted);
                    }
                });
            }
        }
    }

    // Step 3: collect the orphans, in prior relative order (stable by rank)
    let mut orphans: Vec<(cueflow_common::ids::PartInstanceId, PartId, f64)> = instances
        .find(|i| &i.segment_id == segment_id && !i.reset && i.orphaned.is_some())
        .into_iter()
        .map(|i| (i.id.clone(), i.part.id.clone(), i.part.rank))
        .collect();
    if orphans.is_empty() {
        return;
    }
    orphans.sort_by(|a, b| a.2.total_cmp(&b.2).then_with(|| a.0.cmp(&b.0)));

    // Step 4: no live parts left, everything before everything
    if new_ranks.is_empty() {
        for (i, (id, _, _)) in orphans.iter().enumerate() {
            let rank = i as f64;
            let _ = instances.update_one(id, |inst| inst.part.rank = rank);
        }
        debug!(segment_id = %segment_id, orphans = orphans.len(), "segment has no live parts, orphans ranked 0..n");
        return;
    }

    // Step 5: merge the previous rank snapshot with the orphan positions
    // and interpolate between surviving anchors
    enum Entry {
        Anchor { rank: f64, new_rank: f64 },
        Orphan {
            id: cueflow_common::ids::PartInstanceId,
            rank: f64,
        },
    }

    let mut entries: Vec<Entry> = Vec::new();
    let mut anchors: Vec<(&PartId, f64)> = prev_ranks
        .iter()
        .filter(|(id, _)| new_ranks.contains_key(*id))
        .map(|(id, rank)| (id, *rank))
        .collect();
    anchors.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    for (id, rank) in anchors {
        entries.push(Entry::Anchor {
            rank,
            new_rank: new_ranks[id],
        });
    }
    for (id, _, rank) in &orphans {
        entries.push(Entry::Orphan {
            id: id.clone(),
            rank: *rank,
        });
    }
    // Stable sort: an orphan tied with an anchor stays after it, and
    // orphans never cross each other
    entries.sort_by(|a, b| {
        let rank = |e: &Entry| match e {
            Entry::Anchor { rank, .. } => *rank,
            Entry::Orphan { rank, .. } => *rank,
        };
        rank(a).total_cmp(&rank(b))
    });

    let mut before_anchor: Option<f64> = None;
    let mut pending: Vec<cueflow_common::ids::PartInstanceId> = Vec::new();
    for entry in entries {
        match entry {
            Entry::Anchor { new_rank, .. } => {
                assign_interpolated(instances, &pending, before_anchor, Some(new_rank));
                pending.clear();
                before_anchor = Some(new_rank);
            }
            Entry::Orphan { id, .. } => pending.push(id),
        }
    }
    assign_interpolated(instances, &pending, before_anchor, None);
}

/// Space `orphans` evenly between the new ranks of the enclosing anchors.
/// With no anchor before, interpolate into the unit below the following
/// anchor; with none after, into the unit above the preceding one.
fn assign_interpolated(
    instances: &mut WriteCollection<PartInstance>,
    orphans: &[cueflow_common::ids::PartInstanceId],
    before: Option<f64>,
    after: Option<f64>,
) {
    if orphans.is_empty() {
        return;
    }
    let (base, span) = match (before, after) {
        (Some(b), Some(a)) => (b, a - b),
        (None, Some(a)) => (a - 1.0, 1.0),
        (Some(b), None) => (b, 1.0),
        // No anchors at all is the zero-live-parts fallback, handled earlier
        (None, None) => return,
    };
    let n = orphans.len() as f64;
    for (i, id) in orphans.iter().enumerate() {
        let rank = base + ((i + 1) as f64 / (n + 1.0)) * span;
        let _ = instances.update_one(id, |inst| inst.part.rank = rank);
    }
}
