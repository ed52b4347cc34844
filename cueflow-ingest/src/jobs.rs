//! Ingest job queue
//!
//! Inbound feed events arrive as JSON job payloads and are dispatched as
//! independent units of work. Jobs run on their own tasks; the lock
//! manager is the only thing serializing operations that target the same
//! rundown or playlist, so jobs for different rundowns proceed in
//! parallel.

use crate::error::Result;
use crate::ingest::commit::IngestContext;
use crate::ingest::handlers;
use crate::model::{IngestPart, IngestRundown, IngestSegment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Inbound job payloads, tagged by logical job name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "snake_case")]
pub enum IngestJob {
    UpdateRundown {
        rundown: IngestRundown,
    },
    RemoveRundown {
        rundown_external_id: String,
    },
    RegenerateRundown {
        rundown_external_id: String,
    },
    UpdateRundownMetadata {
        rundown: IngestRundown,
    },
    UpdateSegment {
        rundown_external_id: String,
        segment: IngestSegment,
    },
    RemoveSegment {
        rundown_external_id: String,
        segment_external_id: String,
    },
    UpdateSegmentRanks {
        rundown_external_id: String,
        ranks: BTreeMap<String, f64>,
    },
    RegenerateSegment {
        rundown_external_id: String,
        segment_external_id: String,
    },
    RemoveOrphanedSegments {
        rundown_external_id: String,
    },
    UpdatePart {
        rundown_external_id: String,
        segment_external_id: String,
        part: IngestPart,
    },
    RemovePart {
        rundown_external_id: String,
        segment_external_id: String,
        part_external_id: String,
    },
    /// Feed batch form: insert stories before the given story
    StoriesInserted {
        rundown_external_id: String,
        before_story_id: Option<String>,
        stories: Vec<IngestSegment>,
    },
    StoriesDeleted {
        rundown_external_id: String,
        story_ids: Vec<String>,
    },
    StoriesSwapped {
        rundown_external_id: String,
        story_a: String,
        story_b: String,
    },
    StoriesMoved {
        rundown_external_id: String,
        before_story_id: Option<String>,
        story_ids: Vec<String>,
    },
}

impl IngestJob {
    pub fn name(&self) -> &'static str {
        match self {
            IngestJob::UpdateRundown { .. } => "update_rundown",
            IngestJob::RemoveRundown { .. } => "remove_rundown",
            IngestJob::RegenerateRundown { .. } => "regenerate_rundown",
            IngestJob::UpdateRundownMetadata { .. } => "update_rundown_metadata",
            IngestJob::UpdateSegment { .. } => "update_segment",
            IngestJob::RemoveSegment { .. } => "remove_segment",
            IngestJob::UpdateSegmentRanks { .. } => "update_segment_ranks",
            IngestJob::RegenerateSegment { .. } => "regenerate_segment",
            IngestJob::RemoveOrphanedSegments { .. } => "remove_orphaned_segments",
            IngestJob::UpdatePart { .. } => "update_part",
            IngestJob::RemovePart { .. } => "remove_part",
            IngestJob::StoriesInserted { .. } => "stories_inserted",
            IngestJob::StoriesDeleted { .. } => "stories_deleted",
            IngestJob::StoriesSwapped { .. } => "stories_swapped",
            IngestJob::StoriesMoved { .. } => "stories_moved",
        }
    }

    pub fn rundown_external_id(&self) -> &str {
        match self {
            IngestJob::UpdateRundown { rundown } | IngestJob::UpdateRundownMetadata { rundown } => {
                &rundown.external_id
            }
            IngestJob::RemoveRundown {
                rundown_external_id,
            }
            | IngestJob::RegenerateRundown {
                rundown_external_id,
            }
            | IngestJob::UpdateSegment {
                rundown_external_id,
                ..
            }
            | IngestJob::RemoveSegment {
                rundown_external_id,
                ..
            }
            | IngestJob::UpdateSegmentRanks {
                rundown_external_id,
                ..
            }
            | IngestJob::RegenerateSegment {
                rundown_external_id,
                ..
            }
            | IngestJob::RemoveOrphanedSegments {
                rundown_external_id,
            }
            | IngestJob::UpdatePart {
                rundown_external_id,
                ..
            }
            | IngestJob::RemovePart {
                rundown_external_id,
                ..
            }
            | IngestJob::StoriesInserted {
                rundown_external_id,
                ..
            }
            | IngestJob::StoriesDeleted {
                rundown_external_id,
                ..
            }
            | IngestJob::StoriesSwapped {
                rundown_external_id,
                ..
            }
            | IngestJob::StoriesMoved {
                rundown_external_id,
                ..
            } => rundown_external_id,
        }
    }
}

/// Handle for submitting jobs to the dispatcher.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<IngestJob>,
}

impl JobQueue {
    pub fn enqueue(&self, job: IngestJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| crate::error::Error::Internal("job dispatcher is gone".to_string()))
    }
}

/// Spawn the job dispatcher. Each received job runs on its own task; a
/// failed job is logged and does not affect the dispatcher or other jobs.
pub fn spawn_dispatcher(ctx: IngestContext) -> JobQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<IngestJob>();

    tokio::spawn(async move {
        info!("ingest job dispatcher started");
        while let Some(job) = rx.recv().await {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let name = job.name();
                let rundown = job.rundown_external_id().to_string();
                if let Err(e) = dispatch(&ctx, job).await {
                    warn!(job = name, rundown_external_id = %rundown, error = %e, "job failed");
                }
            });
        }
        error!("ingest job dispatcher channel closed");
    });

    JobQueue { tx }
}

async fn dispatch(ctx: &IngestContext, job: IngestJob) -> Result<()> {
    match job {
        IngestJob::UpdateRundown { rundown } => handlers::handle_updated_rundown(ctx, rundown).await,
        IngestJob::RemoveRundown {
            rundown_external_id,
        } => handlers::handle_removed_rundown(ctx, &rundown_external_id).await,
        IngestJob::RegenerateRundown {
            rundown_external_id,
        } => handlers::handle_regenerate_rundown(ctx, &rundown_external_id).await,
        IngestJob::UpdateRundownMetadata { rundown } => {
            handlers::handle_update_rundown_metadata(ctx, rundown).await
        }
        IngestJob::UpdateSegment {
            rundown_external_id,
            segment,
        } => handlers::handle_updated_segment(ctx, &rundown_external_id, segment).await,
        IngestJob::RemoveSegment {
            rundown_external_id,
            segment_external_id,
        } => {
            handlers::handle_removed_segment(ctx, &rundown_external_id, &segment_external_id).await
        }
        IngestJob::UpdateSegmentRanks {
            rundown_external_id,
            ranks,
        } => handlers::handle_update_segment_ranks(ctx, &rundown_external_id, ranks).await,
        IngestJob::RegenerateSegment {
            rundown_external_id,
            segment_external_id,
        } => {
            handlers::handle_regenerate_segment(ctx, &rundown_external_id, &segment_external_id)
                .await
        }
        IngestJob::RemoveOrphanedSegments {
            rundown_external_id,
        } => handlers::handle_remove_orphaned_segments(ctx, &rundown_external_id).await,
        IngestJob::UpdatePart {
            rundown_external_id,
            segment_external_id,
            part,
        } => {
            handlers::handle_updated_part(ctx, &rundown_external_id, &segment_external_id, part)
                .await
        }
        IngestJob::RemovePart {
            rundown_external_id,
            segment_external_id,
            part_external_id,
        } => {
            handlers::handle_removed_part(
                ctx,
                &rundown_external_id,
                &segment_external_id,
                &part_external_id,
            )
            .await
        }
        IngestJob::StoriesInserted {
            rundown_external_id,
            before_story_id,
            stories,
        } => {
            handlers::handle_stories_inserted(ctx, &rundown_external_id, before_story_id, stories)
                .await
        }
        IngestJob::StoriesDeleted {
            rundown_external_id,
            story_ids,
        } => handlers::handle_stories_deleted(ctx, &rundown_external_id, story_ids).await,
        IngestJob::StoriesSwapped {
            rundown_external_id,
            story_a,
            story_b,
        } => handlers::handle_stories_swapped(ctx, &rundown_external_id, story_a, story_b).await,
        IngestJob::StoriesMoved {
            rundown_external_id,
            before_story_id,
            story_ids,
        } => {
            handlers::handle_stories_moved(ctx, &rundown_external_id, before_story_id, story_ids)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_round_trips_through_json() {
        let job = IngestJob::RemoveSegment {
            rundown_external_id: "RO1".to_string(),
            segment_external_id: "seg-1".to_string(),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"remove_segment\""));
        let back: IngestJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "remove_segment");
        assert_eq!(back.rundown_external_id(), "RO1");
    }

    #[test]
    fn test_job_payload_shape() {
        let json = r#"{
            "name": "update_segment_ranks",
            "payload": {
                "rundown_external_id": "RO1",
                "ranks": { "seg-a": 1.5, "seg-b": 0.5 }
            }
        }"#;
        let job: IngestJob = serde_json::from_str(json).unwrap();
        match job {
            IngestJob::UpdateSegmentRanks { ranks, .. } => {
                assert_eq!(ranks["seg-a"], 1.5);
            }
            _ => panic!("wrong variant"),
        }
    }
}
