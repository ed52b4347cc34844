//! Ingest job handlers
//!
//! Each handler turns one inbound job into a snapshot mutation and hands
//! it to the commit pipeline. Handlers never touch the document store
//! directly except `remove_orphaned_segments`, which cleans documents
//! that no longer have a feed counterpart.

use crate::cache::WriteOp;
use crate::error::{Error, Result};
use crate::ingest::cache::IngestCache;
use crate::ingest::commit::{run_ingest_update, run_ingest_update_forced, ForceRegen, IngestContext};
use crate::model::{IngestPart, IngestRundown, IngestSegment, Segment};
use crate::playout::PlayoutCache;
use cueflow_common::ids::{PlaylistId, RundownId, SegmentId};
use cueflow_common::time;
use std::collections::BTreeMap;
use tracing::{info, warn};

fn require_stored(snapshot: Option<IngestRundown>, rundown_external_id: &str) -> Result<IngestRundown> {
    snapshot.ok_or_else(|| Error::NotFound(format!("rundown {} is not ingested", rundown_external_id)))
}

/// Renumber segment ranks to their array positions. Feed batch operations
/// express order positionally; ranks are rebuilt after every mutation.
fn renumber(snapshot: &mut IngestRundown) {
    for (i, segment) in snapshot.segments.iter_mut().enumerate() {
        segment.rank = i as f64;
    }
}

pub async fn handle_updated_rundown(
    ctx: &IngestContext,
    snapshot: IngestRundown,
) -> Result<()> {
    let ext = snapshot.external_id.clone();
    run_ingest_update(ctx, &ext, move |_| Ok(Some(snapshot))).await
}

pub async fn handle_removed_rundown(ctx: &IngestContext, rundown_external_id: &str) -> Result<()> {
    run_ingest_update(ctx, rundown_external_id, |_| Ok(None)).await
}

/// Rebuild every document of a rundown from its stored feed snapshot,
/// for when blueprint behavior changed underneath the stored data.
pub async fn handle_regenerate_rundown(
    ctx: &IngestContext,
    rundown_external_id: &str,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    run_ingest_update_forced(ctx, rundown_external_id, ForceRegen::All, move |stored| {
        Ok(Some(require_stored(stored, &ext)?))
    })
    .await
}

/// Update rundown-level fields without touching stored segments.
pub async fn handle_update_rundown_metadata(
    ctx: &IngestContext,
    meta: IngestRundown,
) -> Result<()> {
    let ext = meta.external_id.clone();
    run_ingest_update(ctx, &ext.clone(), move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        snapshot.name = meta.name;
        snapshot.payload = meta.payload;
        snapshot.playlist_external_id = meta.playlist_external_id;
        Ok(Some(snapshot))
    })
    .await
}

pub async fn handle_updated_segment(
    ctx: &IngestContext,
    rundown_external_id: &str,
    segment: IngestSegment,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        match snapshot.segment_mut(&segment.external_id) {
            Some(existing) => *existing = segment,
            None => {
                snapshot.segments.push(segment);
                snapshot
                    .segments
                    .sort_by(|a, b| a.rank.total_cmp(&b.rank));
            }
        }
        Ok(Some(snapshot))
    })
    .await
}

pub async fn handle_removed_segment(
    ctx: &IngestContext,
    rundown_external_id: &str,
    segment_external_id: &str,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    let seg_ext = segment_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        let before = snapshot.segments.len();
        snapshot.segments.retain(|s| s.external_id != seg_ext);
        if snapshot.segments.len() == before {
            return Err(Error::NotFound(format!(
                "segment {} not found in rundown {}",
                seg_ext, ext
            )));
        }
        Ok(Some(snapshot))
    })
    .await
}

/// Bulk rank update keyed by segment external id. Unknown ids are logged
/// and skipped; an all-unknown batch is a no-op, not a failure.
pub async fn handle_update_segment_ranks(
    ctx: &IngestContext,
    rundown_external_id: &str,
    ranks: BTreeMap<String, f64>,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        for (seg_ext, rank) in &ranks {
            match snapshot.segment_mut(seg_ext) {
                Some(segment) => segment.rank = *rank,
                None => warn!(
                    rundown_external_id = %ext,
                    segment_external_id = %seg_ext,
                    "rank update for unknown segment, skipping"
                ),
            }
        }
        snapshot.segments.sort_by(|a, b| a.rank.total_cmp(&b.rank));
        Ok(Some(snapshot))
    })
    .await
}

pub async fn handle_regenerate_segment(
    ctx: &IngestContext,
    rundown_external_id: &str,
    segment_external_id: &str,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    let seg_ext = segment_external_id.to_string();
    run_ingest_update_forced(
        ctx,
        rundown_external_id,
        ForceRegen::Segments(vec![segment_external_id.to_string()]),
        move |stored| {
            let snapshot = require_stored(stored, &ext)?;
            if snapshot.segment(&seg_ext).is_none() {
                return Err(Error::NotFound(format!(
                    "segment {} not found in rundown {}",
                    seg_ext, ext
                )));
            }
            Ok(Some(snapshot))
        },
    )
    .await
}

pub async fn handle_updated_part(
    ctx: &IngestContext,
    rundown_external_id: &str,
    segment_external_id: &str,
    part: IngestPart,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    let seg_ext = segment_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        let segment = snapshot.segment_mut(&seg_ext).ok_or_else(|| {
            Error::NotFound(format!("segment {} not found in rundown {}", seg_ext, ext))
        })?;
        match segment
            .parts
            .iter_mut()
            .find(|p| p.external_id == part.external_id)
        {
            Some(existing) => *existing = part,
            None => {
                segment.parts.push(part);
                segment.parts.sort_by(|a, b| a.rank.total_cmp(&b.rank));
            }
        }
        // A rank or payload edit leaves the part id list intact; the
        // segment timestamp is what marks it changed for the diff
        segment.modified = time::now_ms();
        Ok(Some(snapshot))
    })
    .await
}

pub async fn handle_removed_part(
    ctx: &IngestContext,
    rundown_external_id: &str,
    segment_external_id: &str,
    part_external_id: &str,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    let seg_ext = segment_external_id.to_string();
    let part_ext = part_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        let segment = snapshot.segment_mut(&seg_ext).ok_or_else(|| {
            Error::NotFound(format!("segment {} not found in rundown {}", seg_ext, ext))
        })?;
        let before = segment.parts.len();
        segment.parts.retain(|p| p.external_id != part_ext);
        if segment.parts.len() == before {
            return Err(Error::NotFound(format!(
                "part {} not found in segment {}",
                part_ext, seg_ext
            )));
        }
        segment.modified = time::now_ms();
        Ok(Some(snapshot))
    })
    .await
}

/// Insert stories before the given story (or append), feed batch form.
pub async fn handle_stories_inserted(
    ctx: &IngestContext,
    rundown_external_id: &str,
    before_story: Option<String>,
    stories: Vec<IngestSegment>,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        for story in &stories {
            if snapshot.segment(&story.external_id).is_some() {
                return Err(Error::Rejected(format!(
                    "story {} already exists in rundown {}",
                    story.external_id, ext
                )));
            }
        }
        let at = match &before_story {
            Some(before) => snapshot
                .segments
                .iter()
                .position(|s| &s.external_id == before)
                .ok_or_else(|| {
                    Error::NotFound(format!("story {} not found in rundown {}", before, ext))
                })?,
            None => snapshot.segments.len(),
        };
        snapshot.segments.splice(at..at, stories);
        renumber(&mut snapshot);
        Ok(Some(snapshot))
    })
    .await
}

pub async fn handle_stories_deleted(
    ctx: &IngestContext,
    rundown_external_id: &str,
    story_ids: Vec<String>,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        for id in &story_ids {
            if snapshot.segment(id).is_none() {
                return Err(Error::NotFound(format!(
                    "story {} not found in rundown {}",
                    id, ext
                )));
            }
        }
        snapshot
            .segments
            .retain(|s| !story_ids.contains(&s.external_id));
        renumber(&mut snapshot);
        Ok(Some(snapshot))
    })
    .await
}

pub async fn handle_stories_swapped(
    ctx: &IngestContext,
    rundown_external_id: &str,
    story_a: String,
    story_b: String,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        let pos = |snapshot: &IngestRundown, id: &str| {
            snapshot
                .segments
                .iter()
                .position(|s| s.external_id == id)
                .ok_or_else(|| Error::NotFound(format!("story {} not found in rundown {}", id, ext)))
        };
        let a = pos(&snapshot, &story_a)?;
        let b = pos(&snapshot, &story_b)?;
        snapshot.segments.swap(a, b);
        renumber(&mut snapshot);
        Ok(Some(snapshot))
    })
    .await
}

/// Move stories to before the given story (or the end), preserving their
/// relative order.
pub async fn handle_stories_moved(
    ctx: &IngestContext,
    rundown_external_id: &str,
    before_story: Option<String>,
    story_ids: Vec<String>,
) -> Result<()> {
    let ext = rundown_external_id.to_string();
    run_ingest_update(ctx, rundown_external_id, move |stored| {
        let mut snapshot = require_stored(stored, &ext)?;
        let mut moved: Vec<IngestSegment> = Vec::with_capacity(story_ids.len());
        for id in &story_ids {
            let at = snapshot
                .segments
                .iter()
                .position(|s| &s.external_id == id)
                .ok_or_else(|| {
                    Error::NotFound(format!("story {} not found in rundown {}", id, ext))
                })?;
            moved.push(snapshot.segments.remove(at));
        }
        let at = match &before_story {
            Some(before) => snapshot
                .segments
                .iter()
                .position(|s| &s.external_id == before)
                .ok_or_else(|| {
                    Error::NotFound(format!("story {} not found in rundown {}", before, ext))
                })?,
            None => snapshot.segments.len(),
        };
        snapshot.segments.splice(at..at, moved);
        renumber(&mut snapshot);
        Ok(Some(snapshot))
    })
    .await
}

/// Drop segments that were orphaned on behalf of on-air content once no
/// selection references them anymore.
pub async fn handle_remove_orphaned_segments(
    ctx: &IngestContext,
    rundown_external_id: &str,
) -> Result<()> {
    let rundown_id = RundownId::from_external(rundown_external_id);
    let mut rundown_lock = ctx.locks.acquire_rundown(rundown_id.as_str()).await;

    let result = remove_orphaned_segments_locked(ctx, rundown_external_id, &rundown_id, &rundown_lock).await;

    rundown_lock.release(&ctx.locks);
    result
}

async fn remove_orphaned_segments_locked(
    ctx: &IngestContext,
    rundown_external_id: &str,
    rundown_id: &RundownId,
    rundown_lock: &crate::locks::LockHandle,
) -> Result<()> {
    let mut cache = IngestCache::load(&ctx.store, rundown_lock, rundown_external_id).await?;
    let Some(rundown) = cache.rundown.get() else {
        return Err(Error::NotFound(format!(
            "rundown {} is not ingested",
            rundown_external_id
        )));
    };
    let playlist_id: PlaylistId = rundown.playlist_id.clone();

    let orphaned: Vec<SegmentId> = cache
        .segments
        .find(|s: &Segment| s.orphaned.is_some())
        .into_iter()
        .map(|s| s.id.clone())
        .collect();
    if orphaned.is_empty() {
        cache.discard_changes();
        return Ok(());
    }

    let mut playlist_lock = ctx.locks.acquire_playlist(playlist_id.as_str()).await;
    let playout = PlayoutCache::load(
        &ctx.store,
        &playlist_lock,
        &playlist_id,
        &[rundown_id.clone()],
    )
    .await?;

    let selected: Vec<SegmentId> = playout
        .selected_instance_ids()
        .iter()
        .filter_map(|id| playout.part_instances.find_one(id))
        .map(|i| i.segment_id.clone())
        .collect();

    let mut removed = 0usize;
    for seg_id in orphaned {
        if selected.contains(&seg_id) {
            continue;
        }
        cache.segments.remove_by_id(&seg_id);
        removed += 1;
    }

    if removed > 0 {
        let ops: Vec<WriteOp<Segment>> = cache.segments.take_write_ops()?;
        ctx.store.apply_ops(ops).await?;
        info!(rundown_id = %rundown_id, removed, "purged orphaned segments");
    }
    cache.discard_changes();

    playlist_lock.release(&ctx.locks);
    Ok(())
}
