//! Ingest snapshot wire types and the ingest data cache rows
//!
//! The wire types (`IngestRundown`/`IngestSegment`/`IngestPart`) are the
//! feed-shaped snapshot handlers mutate. The cache rows are the persisted
//! last-known snapshot used for diffing on the next update: one rundown
//! row (segments stripped) plus one row per segment (parts embedded),
//! because regeneration is per-segment.

use crate::cache::doc::CacheDoc;
use cueflow_common::ids::{IngestRowId, RundownId, SegmentId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Feed-shaped part snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPart {
    pub external_id: String,
    pub name: String,
    pub rank: f64,
    #[serde(default)]
    pub payload: Value,
}

/// Feed-shaped segment snapshot with its parts embedded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSegment {
    pub external_id: String,
    pub name: String,
    pub rank: f64,
    /// Feed modification timestamp, milliseconds since epoch
    pub modified: i64,
    #[serde(default)]
    pub payload: Value,
    pub parts: Vec<IngestPart>,
}

/// Feed-shaped rundown snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRundown {
    pub external_id: String,
    pub name: String,
    /// Feed-declared playlist grouping, if any
    pub playlist_external_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub segments: Vec<IngestSegment>,
}

impl IngestRundown {
    pub fn segment(&self, external_id: &str) -> Option<&IngestSegment> {
        self.segments.iter().find(|s| s.external_id == external_id)
    }

    pub fn segment_mut(&mut self, external_id: &str) -> Option<&mut IngestSegment> {
        self.segments
            .iter_mut()
            .find(|s| s.external_id == external_id)
    }
}

/// Payload of one ingest data cache row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IngestCacheData {
    /// Rundown-level snapshot with segments stripped
    Rundown(IngestRundown),
    /// One segment's snapshot, parts embedded
    Segment(IngestSegment),
}

/// Persisted last-known feed snapshot row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestDataCacheRow {
    pub id: IngestRowId,
    pub rundown_id: RundownId,
    /// Set on segment rows only
    pub segment_id: Option<SegmentId>,
    /// Row write time, milliseconds since epoch
    pub modified: i64,
    pub data: IngestCacheData,
}

impl CacheDoc for IngestDataCacheRow {
    type Id = IngestRowId;

    fn doc_id(&self) -> &IngestRowId {
        &self.id
    }
}

impl IngestDataCacheRow {
    pub fn rundown_row_id(rundown_id: &RundownId) -> IngestRowId {
        IngestRowId::derive(rundown_id, "rundown")
    }

    pub fn segment_row_id(rundown_id: &RundownId, segment_external_id: &str) -> IngestRowId {
        IngestRowId::derive(rundown_id, &format!("segment_{}", segment_external_id))
    }

    /// Split a wire snapshot into persisted cache rows.
    pub fn rows_from_snapshot(
        rundown_id: &RundownId,
        snapshot: &IngestRundown,
        modified: i64,
    ) -> Vec<IngestDataCacheRow> {
        let mut rows = Vec::with_capacity(snapshot.segments.len() + 1);

        let mut rundown_only = snapshot.clone();
        rundown_only.segments = Vec::new();
        rows.push(IngestDataCacheRow {
            id: Self::rundown_row_id(rundown_id),
            rundown_id: rundown_id.clone(),
            segment_id: None,
            modified,
            data: IngestCacheData::Rundown(rundown_only),
        });

        for segment in &snapshot.segments {
            rows.push(IngestDataCacheRow {
                id: Self::segment_row_id(rundown_id, &segment.external_id),
                rundown_id: rundown_id.clone(),
                segment_id: Some(SegmentId::derive(rundown_id, &segment.external_id)),
                modified,
                data: IngestCacheData::Segment(segment.clone()),
            });
        }

        rows
    }

    /// Reassemble the wire snapshot from cache rows. Returns None when no
    /// rundown row exists (the rundown was never ingested or was removed).
    pub fn snapshot_from_rows(rows: &[IngestDataCacheRow]) -> Option<IngestRundown> {
        let mut rundown = rows.iter().find_map(|row| match &row.data {
            IngestCacheData::Rundown(r) => Some(r.clone()),
            _ => None,
        })?;

        let mut segments: Vec<IngestSegment> = rows
            .iter()
            .filter_map(|row| match &row.data {
                IngestCacheData::Segment(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        segments.sort_by(|a, b| a.rank.total_cmp(&b.rank));
        rundown.segments = segments;
        Some(rundown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> IngestRundown {
        IngestRundown {
            external_id: "RO1".to_string(),
            name: "Morning Show".to_string(),
            playlist_external_id: None,
            payload: Value::Null,
            segments: vec![
                IngestSegment {
                    external_id: "seg-b".to_string(),
                    name: "B".to_string(),
                    rank: 2.0,
                    modified: 10,
                    payload: Value::Null,
                    parts: vec![],
                },
                IngestSegment {
                    external_id: "seg-a".to_string(),
                    name: "A".to_string(),
                    rank: 1.0,
                    modified: 10,
                    payload: Value::Null,
                    parts: vec![IngestPart {
                        external_id: "p1".to_string(),
                        name: "P1".to_string(),
                        rank: 0.0,
                        payload: Value::Null,
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_rows_round_trip_sorted_by_rank() {
        let rundown_id = RundownId::from_external("RO1");
        let rows = IngestDataCacheRow::rows_from_snapshot(&rundown_id, &sample_snapshot(), 99);
        assert_eq!(rows.len(), 3);

        let back = IngestDataCacheRow::snapshot_from_rows(&rows).unwrap();
        assert_eq!(back.external_id, "RO1");
        // Reassembly orders segments by rank, not row order
        assert_eq!(back.segments[0].external_id, "seg-a");
        assert_eq!(back.segments[1].external_id, "seg-b");
        assert_eq!(back.segments[0].parts.len(), 1);
    }

    #[test]
    fn test_snapshot_from_rows_requires_rundown_row() {
        let rundown_id = RundownId::from_external("RO1");
        let rows: Vec<_> = IngestDataCacheRow::rows_from_snapshot(&rundown_id, &sample_snapshot(), 0)
            .into_iter()
            .filter(|r| r.segment_id.is_some())
            .collect();
        assert!(IngestDataCacheRow::snapshot_from_rows(&rows).is_none());
    }

    #[test]
    fn test_row_ids_deterministic() {
        let rundown_id = RundownId::from_external("RO1");
        assert_eq!(
            IngestDataCacheRow::segment_row_id(&rundown_id, "seg-a"),
            IngestDataCacheRow::segment_row_id(&rundown_id, "seg-a")
        );
    }
}
