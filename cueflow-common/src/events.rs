//! Event types for the Cueflow event system
//!
//! Events are broadcast in-process and mirrored to SSE clients. Orphaning
//! and self-healing repairs are reported here rather than surfaced as job
//! failures.

use crate::ids::{PartInstanceId, PlaylistId, RundownId, SegmentId};
use serde::{Deserialize, Serialize};

/// Cueflow event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CueflowEvent {
    /// A rundown was created or updated by an ingest commit
    RundownUpserted {
        rundown_id: RundownId,
        playlist_id: PlaylistId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A rundown was removed from the document store
    RundownRemoved {
        rundown_id: RundownId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A rundown removal was downgraded to orphaning because its content
    /// is selected in an active playlist
    RundownOrphaned {
        rundown_id: RundownId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Segments changed during an ingest commit
    SegmentsChanged {
        rundown_id: RundownId,
        changed: Vec<SegmentId>,
        removed: Vec<SegmentId>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An ingest commit finished and both caches are persisted
    CommitCompleted {
        rundown_id: RundownId,
        playlist_id: PlaylistId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The deferred next-part check repaired a stale next pointer
    NextPartRepaired {
        playlist_id: PlaylistId,
        part_instance_id: Option<PartInstanceId>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A job was rejected; nothing was persisted
    JobRejected {
        job_name: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl CueflowEvent {
    /// Event name for SSE event framing
    pub fn event_name(&self) -> &'static str {
        match self {
            CueflowEvent::RundownUpserted { .. } => "RundownUpserted",
            CueflowEvent::RundownRemoved { .. } => "RundownRemoved",
            CueflowEvent::RundownOrphaned { .. } => "RundownOrphaned",
            CueflowEvent::SegmentsChanged { .. } => "SegmentsChanged",
            CueflowEvent::CommitCompleted { .. } => "CommitCompleted",
            CueflowEvent::NextPartRepaired { .. } => "NextPartRepaired",
            CueflowEvent::JobRejected { .. } => "JobRejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CueflowEvent::RundownRemoved {
            rundown_id: RundownId::new("r1"),
            timestamp: crate::time::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RundownRemoved");
        assert_eq!(json["rundown_id"], "r1");
    }

    #[test]
    fn test_event_name_matches_variant() {
        let event = CueflowEvent::JobRejected {
            job_name: "update_segment".to_string(),
            reason: "segment not found".to_string(),
            timestamp: crate::time::now(),
        };
        assert_eq!(event.event_name(), "JobRejected");
    }
}
