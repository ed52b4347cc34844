//! Rundown document

use crate::cache::doc::CacheDoc;
use cueflow_common::ids::{PlaylistId, RundownId};
use serde::{Deserialize, Serialize};

/// Why a rundown is retained despite its backing feed entity being gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RundownOrphaned {
    /// The feed deleted the rundown while its content was on-air
    Deleted,
    /// Detached by an operator action rather than the feed
    Manual,
}

/// Root of one ingest scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rundown {
    pub id: RundownId,
    /// Feed-native key of this rundown
    pub external_id: String,
    pub name: String,
    /// Playlist currently grouping this rundown
    pub playlist_id: PlaylistId,
    /// Feed-declared playlist external id, if any (fallback: own external id)
    pub playlist_external_id: Option<String>,
    /// Ordering key within the playlist
    pub rank: f64,
    pub orphaned: Option<RundownOrphaned>,
    /// Last modification, milliseconds since epoch
    pub modified: i64,
}

impl CacheDoc for Rundown {
    type Id = RundownId;

    fn doc_id(&self) -> &RundownId {
        &self.id
    }
}
