//! RundownPlaylist document

use crate::cache::doc::CacheDoc;
use cueflow_common::ids::{ActivationId, PartInstanceId, PlaylistId, RundownId};
use serde::{Deserialize, Serialize};

/// Pointer to a selected (current/next/previous) PartInstance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedPartInstance {
    pub part_instance_id: PartInstanceId,
    pub rundown_id: RundownId,
}

/// Groups one or more Rundowns for playout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RundownPlaylist {
    pub id: PlaylistId,
    /// Feed-native key of this playlist (falls back to a rundown external id)
    pub external_id: String,
    pub name: String,
    /// Non-null while the playlist is on-air
    pub activation_id: Option<ActivationId>,
    pub current_part_info: Option<SelectedPartInstance>,
    pub next_part_info: Option<SelectedPartInstance>,
    pub previous_part_info: Option<SelectedPartInstance>,
    pub rundown_ids_in_order: Vec<RundownId>,
    /// When true an operator pinned the order; ingest must not recompute it
    #[serde(default)]
    pub rundown_order_pinned: bool,
    /// Last modification, milliseconds since epoch
    pub modified: i64,
}

impl CacheDoc for RundownPlaylist {
    type Id = PlaylistId;

    fn doc_id(&self) -> &PlaylistId {
        &self.id
    }
}

impl RundownPlaylist {
    pub fn is_active(&self) -> bool {
        self.activation_id.is_some()
    }

    /// Whether any selection pointer references the given rundown
    pub fn has_selected_content_from(&self, rundown_id: &RundownId) -> bool {
        [&self.current_part_info, &self.next_part_info]
            .iter()
            .any(|info| {
                info.as_ref()
                    .map(|i| &i.rundown_id == rundown_id)
                    .unwrap_or(false)
            })
    }
}
