//! Blueprint evaluation seam
//!
//! The blueprint turns feed payloads into playable documents. From the
//! ingest core's perspective it is a pure, possibly-rejecting function;
//! its internals (show styles, templates) live outside this service.

use crate::error::Result;
use crate::model::{IngestPart, IngestRundown, IngestSegment, Part, Piece, Segment};
use cueflow_common::ids::{PartId, PieceId, RundownId, SegmentId};

/// Rundown-level blueprint output
#[derive(Debug, Clone)]
pub struct BlueprintRundown {
    pub name: String,
    /// Ordering key within the playlist
    pub rank: f64,
}

/// Segment-level blueprint output: the segment document plus its
/// generated parts and content pieces
#[derive(Debug, Clone)]
pub struct BlueprintSegment {
    pub segment: Segment,
    pub parts: Vec<Part>,
    pub pieces: Vec<Piece>,
}

/// External blueprint evaluator. May reject a payload; a rejection fails
/// the whole ingest operation before anything is persisted.
pub trait Blueprint: Send + Sync {
    fn get_rundown(&self, ingest: &IngestRundown) -> Result<BlueprintRundown>;

    fn get_segment(
        &self,
        rundown_id: &RundownId,
        ingest: &IngestSegment,
    ) -> Result<BlueprintSegment>;
}

/// Default blueprint mapping the feed snapshot 1:1 onto documents.
///
/// Parts are marked invalid when their payload says so; each part with a
/// payload gets a single content piece carrying it.
#[derive(Debug, Default)]
pub struct PassthroughBlueprint;

impl PassthroughBlueprint {
    fn build_part(rundown_id: &RundownId, segment_id: &SegmentId, ingest: &IngestPart) -> Part {
        let invalid = ingest
            .payload
            .get("invalid")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Part {
            id: PartId::derive(rundown_id, &ingest.external_id),
            rundown_id: rundown_id.clone(),
            segment_id: segment_id.clone(),
            external_id: ingest.external_id.clone(),
            title: ingest.name.clone(),
            rank: ingest.rank,
            invalid,
        }
    }
}

impl Blueprint for PassthroughBlueprint {
    fn get_rundown(&self, ingest: &IngestRundown) -> Result<BlueprintRundown> {
        Ok(BlueprintRundown {
            name: ingest.name.clone(),
            rank: 0.0,
        })
    }

    fn get_segment(
        &self,
        rundown_id: &RundownId,
        ingest: &IngestSegment,
    ) -> Result<BlueprintSegment> {
        let segment_id = SegmentId::derive(rundown_id, &ingest.external_id);
        let segment = Segment {
            id: segment_id.clone(),
            rundown_id: rundown_id.clone(),
            external_id: ingest.external_id.clone(),
            name: ingest.name.clone(),
            rank: ingest.rank,
            external_modified: ingest.modified,
            orphaned: None,
        };

        let parts: Vec<Part> = ingest
            .parts
            .iter()
            .map(|p| Self::build_part(rundown_id, &segment_id, p))
            .collect();

        let pieces: Vec<Piece> = ingest
            .parts
            .iter()
            .filter(|p| !p.payload.is_null())
            .map(|p| {
                let part_id = PartId::derive(rundown_id, &p.external_id);
                Piece {
                    id: PieceId::derive(&part_id, "content"),
                    part_id,
                    rundown_id: rundown_id.clone(),
                    name: p.name.clone(),
                    payload: p.payload.clone(),
                }
            })
            .collect();

        Ok(BlueprintSegment {
            segment,
            parts,
            pieces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest_segment() -> IngestSegment {
        IngestSegment {
            external_id: "seg-1".to_string(),
            name: "Opening".to_string(),
            rank: 1.0,
            modified: 42,
            payload: serde_json::Value::Null,
            parts: vec![
                IngestPart {
                    external_id: "story-1".to_string(),
                    name: "Headlines".to_string(),
                    rank: 0.0,
                    payload: serde_json::json!({ "script": "..." }),
                },
                IngestPart {
                    external_id: "story-2".to_string(),
                    name: "Broken".to_string(),
                    rank: 1.0,
                    payload: serde_json::json!({ "invalid": true }),
                },
            ],
        }
    }

    #[test]
    fn test_passthrough_builds_segment_parts_pieces() {
        let rundown_id = RundownId::from_external("RO1");
        let out = PassthroughBlueprint
            .get_segment(&rundown_id, &ingest_segment())
            .unwrap();

        assert_eq!(out.segment.name, "Opening");
        assert_eq!(out.segment.external_modified, 42);
        assert_eq!(out.parts.len(), 2);
        assert!(!out.parts[0].invalid);
        assert!(out.parts[1].invalid);
        assert_eq!(out.pieces.len(), 2);
        assert_eq!(out.pieces[0].part_id, out.parts[0].id);
    }

    #[test]
    fn test_passthrough_ids_deterministic() {
        let rundown_id = RundownId::from_external("RO1");
        let a = PassthroughBlueprint
            .get_segment(&rundown_id, &ingest_segment())
            .unwrap();
        let b = PassthroughBlueprint
            .get_segment(&rundown_id, &ingest_segment())
            .unwrap();
        assert_eq!(a.segment.id, b.segment.id);
        assert_eq!(a.parts[0].id, b.parts[0].id);
    }
}
