//! Segment document

use crate::cache::doc::CacheDoc;
use cueflow_common::ids::{RundownId, SegmentId};
use serde::{Deserialize, Serialize};

/// Why a segment is retained despite being absent or hidden on the feed side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentOrphaned {
    /// Removed from the feed while protected by an on-air selection
    Deleted,
    /// Hidden by the feed but kept for its instances
    Hidden,
    /// Scratchpad segment, never part of the feed running order
    Scratchpad,
}

/// Ordered group of Parts within a Rundown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub rundown_id: RundownId,
    /// Feed-native key of this segment
    pub external_id: String,
    pub name: String,
    /// Ordering key within the rundown; float, not necessarily contiguous
    pub rank: f64,
    /// Feed timestamp used for change detection, milliseconds since epoch
    pub external_modified: i64,
    pub orphaned: Option<SegmentOrphaned>,
}

impl CacheDoc for Segment {
    type Id = SegmentId;

    fn doc_id(&self) -> &SegmentId {
        &self.id
    }
}
