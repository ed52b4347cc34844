//! Piece document

use crate::cache::doc::CacheDoc;
use cueflow_common::ids::{PartId, PieceId, RundownId};
use serde::{Deserialize, Serialize};

/// Content row generated inside a Part by the blueprint.
///
/// Pieces share their Part's lifecycle: regenerated with it, deleted with
/// it. The payload is blueprint-defined and opaque to the ingest core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub id: PieceId,
    pub part_id: PartId,
    pub rundown_id: RundownId,
    pub name: String,
    pub payload: serde_json::Value,
}

impl CacheDoc for Piece {
    type Id = PieceId;

    fn doc_id(&self) -> &PieceId {
        &self.id
    }
}
