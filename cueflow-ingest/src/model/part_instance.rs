//! PartInstance document

use crate::cache::doc::CacheDoc;
use crate::model::Part;
use cueflow_common::ids::{ActivationId, PartInstanceId, RundownId, SegmentId};
use serde::{Deserialize, Serialize};

/// Why a part instance has no live backing Part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartInstanceOrphaned {
    /// The source Part was removed by ingest after this instance was taken
    Deleted,
    /// Created from an adlib; never had a backing Part by design
    AdlibPart,
}

/// Realized, potentially on-air, copy of a Part at the time it was
/// selected for playout.
///
/// The embedded `part` is a denormalized copy; its `rank` is the
/// instance's ordering key and is kept in step with the source Part by
/// rank reconciliation. Ingest never recreates an instance; it is only
/// mutated by reconciliation, reset, or orphan-state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInstance {
    pub id: PartInstanceId,
    pub rundown_id: RundownId,
    pub segment_id: SegmentId,
    /// Activation epoch this instance belongs to
    pub playlist_activation_id: ActivationId,
    /// Whether the instance has actually aired
    #[serde(default)]
    pub taken: bool,
    /// Reset instances are history; reconciliation skips them
    #[serde(default)]
    pub reset: bool,
    pub orphaned: Option<PartInstanceOrphaned>,
    /// Denormalized copy of the source Part, including the instance rank
    pub part: Part,
}

impl CacheDoc for PartInstance {
    type Id = PartInstanceId;

    fn doc_id(&self) -> &PartInstanceId {
        &self.id
    }
}

impl PartInstance {
    /// Create a fresh instance from a template part (the "take"-time copy)
    pub fn from_part(activation_id: &ActivationId, part: &Part) -> Self {
        Self {
            id: PartInstanceId::derive(activation_id, &part.id),
            rundown_id: part.rundown_id.clone(),
            segment_id: part.segment_id.clone(),
            playlist_activation_id: activation_id.clone(),
            taken: false,
            reset: false,
            orphaned: None,
            part: part.clone(),
        }
    }

    pub fn rank(&self) -> f64 {
        self.part.rank
    }
}
