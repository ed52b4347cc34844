//! Part document

use crate::cache::doc::CacheDoc;
use cueflow_common::ids::{PartId, RundownId, SegmentId};
use serde::{Deserialize, Serialize};

/// Template ordered item within a Segment
///
/// Within one segment all live parts carry pairwise-distinct ranks; the
/// rank is the only ordering key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub rundown_id: RundownId,
    pub segment_id: SegmentId,
    /// Feed-native key of this part
    pub external_id: String,
    pub title: String,
    /// Unique ordering key within the segment
    pub rank: f64,
    /// Marked by the blueprint when the part cannot be played as-is
    #[serde(default)]
    pub invalid: bool,
}

impl CacheDoc for Part {
    type Id = PartId;

    fn doc_id(&self) -> &PartId {
        &self.id
    }
}

impl Part {
    /// Whether the part can be selected as a next part
    pub fn is_playable(&self) -> bool {
        !self.invalid
    }
}
