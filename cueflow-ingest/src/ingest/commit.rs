//! Lock-and-commit ingest pipeline
//!
//! Every ingest mutation runs through `run_ingest_update`: take the
//! rundown lock, load the ingest cache, apply the snapshot mutation,
//! regenerate documents for the segments the diff flagged, then commit
//! against playout state under the playlist lock. Rejections and errors
//! leave the stored state untouched.
//!
//! Persistence ordering: ingest documents are saved before playout
//! documents so a crash in between can only leave regenerated content
//! without updated pointers, never pointers at missing content. The
//! ingest save runs on its own task while the deferred next-part check
//! executes, and is awaited before playout ops are applied.

use crate::db::{DocQuery, DocStore};
use crate::error::{Error, Result};
use crate::ingest::blueprint::Blueprint;
use crate::ingest::cache::IngestCache;
use crate::locks::{LockHandle, LockManager};
use crate::model::{IngestRundown, Rundown, RundownOrphaned, RundownPlaylist, SegmentOrphaned};
use crate::playout::{ContentView, PlayoutCache};
use crate::reconcile::{
    compile_segment_entries, diff_segment_entries, update_part_instance_ranks, PartRankSnapshot,
    SegmentChanges,
};
use cueflow_common::events::CueflowEvent;
use cueflow_common::ids::{PartId, PlaylistId, RundownId, SegmentId};
use cueflow_common::time;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Shared dependencies of every ingest operation.
#[derive(Clone)]
pub struct IngestContext {
    pub store: DocStore,
    pub locks: Arc<LockManager>,
    pub blueprint: Arc<dyn Blueprint>,
    pub events: broadcast::Sender<CueflowEvent>,
}

impl IngestContext {
    fn emit(&self, event: CueflowEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// What the commit phase has to apply against playout state.
struct CommitData {
    remove_rundown: bool,
    /// Feed-declared target playlist (external id); None on removal
    target_playlist_external: Option<String>,
    /// Regenerated or removed segments with their pre-change part ranks,
    /// keyed by the post-change internal id
    changed_segments: Vec<(SegmentId, PartRankSnapshot)>,
    removed_segment_ids: Vec<SegmentId>,
    /// Internal id migration pairs: old -> new
    renamed_segments: Vec<(SegmentId, SegmentId)>,
}

/// Widens the diff-driven regeneration scope for explicit regenerate jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceRegen {
    /// Trust the snapshot diff
    No,
    /// Regenerate every segment regardless of the diff
    All,
    /// Regenerate the named segments (external ids) regardless of the diff
    Segments(Vec<String>),
}

/// Run one ingest operation for a rundown: the closure receives the
/// stored feed snapshot (None when the rundown was never ingested) and
/// returns the snapshot to commit, or None to remove the rundown.
///
/// A `Rejected` or `Blueprint` error from the closure or the generation
/// phase aborts before anything is persisted.
pub async fn run_ingest_update<F>(
    ctx: &IngestContext,
    rundown_external_id: &str,
    update: F,
) -> Result<()>
where
    F: FnOnce(Option<IngestRundown>) -> Result<Option<IngestRundown>>,
{
    run_ingest_update_forced(ctx, rundown_external_id, ForceRegen::No, update).await
}

/// Like [`run_ingest_update`], but with an explicit regeneration scope.
pub async fn run_ingest_update_forced<F>(
    ctx: &IngestContext,
    rundown_external_id: &str,
    force: ForceRegen,
    update: F,
) -> Result<()>
where
    F: FnOnce(Option<IngestRundown>) -> Result<Option<IngestRundown>>,
{
    let rundown_id = RundownId::from_external(rundown_external_id);
    let mut rundown_lock = ctx.locks.acquire_rundown(rundown_id.as_str()).await;

    let result = run_locked(ctx, &rundown_lock, rundown_external_id, force, update).await;

    rundown_lock.release(&ctx.locks);
    result
}

async fn run_locked<F>(
    ctx: &IngestContext,
    rundown_lock: &LockHandle,
    rundown_external_id: &str,
    force: ForceRegen,
    update: F,
) -> Result<()>
where
    F: FnOnce(Option<IngestRundown>) -> Result<Option<IngestRundown>>,
{
    let mut cache = IngestCache::load(&ctx.store, rundown_lock, rundown_external_id).await?;
    let old_snapshot = cache.stored_snapshot();
    let rundown_existed = cache.rundown.exists();
    let previous_playlist = cache.rundown.get().map(|r| r.playlist_id.clone());

    let new_snapshot = match update(old_snapshot.clone()) {
        Ok(s) => s,
        Err(e) => {
            if let Error::Rejected(reason) | Error::Blueprint(reason) = &e {
                ctx.emit(CueflowEvent::JobRejected {
                    job_name: "ingest_update".to_string(),
                    reason: reason.clone(),
                    timestamp: time::now(),
                });
            }
            return Err(e);
        }
    };

    let data = match &new_snapshot {
        None => {
            if !rundown_existed {
                // Removal of a rundown that never made it into the store
                debug!(rundown_external_id, "removal of unknown rundown, nothing to do");
                cache.discard_changes();
                return Ok(());
            }
            cache.clear_snapshot();
            CommitData {
                remove_rundown: true,
                target_playlist_external: None,
                changed_segments: Vec::new(),
                removed_segment_ids: Vec::new(),
                renamed_segments: Vec::new(),
            }
        }
        Some(snapshot) => match generate(ctx, &mut cache, old_snapshot.as_ref(), snapshot, &force) {
            Ok(data) => data,
            Err(e) => {
                cache.discard_changes();
                if let Error::Blueprint(reason) = &e {
                    ctx.emit(CueflowEvent::JobRejected {
                        job_name: "ingest_update".to_string(),
                        reason: reason.clone(),
                        timestamp: time::now(),
                    });
                }
                return Err(e);
            }
        },
    };

    let result = commit(ctx, &mut cache, previous_playlist, data).await;
    if result.is_err() {
        cache.discard_changes();
    }
    result
}

/// Regenerate ingest-owned documents from the new snapshot. Only the
/// segments the diff flags are touched; everything else stays clean in
/// the cache and produces no writes.
fn generate(
    ctx: &IngestContext,
    cache: &mut IngestCache,
    old_snapshot: Option<&IngestRundown>,
    snapshot: &IngestRundown,
    force: &ForceRegen,
) -> Result<CommitData> {
    let rundown_id = cache.rundown_id.clone();

    let old_entries = compile_segment_entries(
        old_snapshot.map(|s| s.segments.as_slice()).unwrap_or(&[]),
    );
    let new_entries = compile_segment_entries(&snapshot.segments);
    let old_modified: BTreeMap<String, i64> = old_entries
        .iter()
        .map(|(id, e)| (id.clone(), e.modified))
        .collect();
    let mut changes = match force {
        // A full regeneration rebuilds every segment as if freshly added
        ForceRegen::All => diff_segment_entries(&Default::default(), &new_entries, None),
        _ => diff_segment_entries(&old_entries, &new_entries, Some(&old_modified)),
    };
    if let ForceRegen::Segments(exts) = force {
        for ext in exts {
            if new_entries.contains_key(ext) && !changes.changed.contains(ext) {
                changes.changed.push(ext.clone());
            }
            changes.only_rank_changed.remove(ext);
            changes.unchanged.retain(|e| e != ext);
        }
    }
    debug!(
        rundown_id = %rundown_id,
        added = changes.added.len(),
        changed = changes.changed.len(),
        removed = changes.removed.len(),
        renamed = changes.external_id_changed.len(),
        "segment diff"
    );

    let mut data = CommitData {
        remove_rundown: false,
        target_playlist_external: Some(
            snapshot
                .playlist_external_id
                .clone()
                .unwrap_or_else(|| snapshot.external_id.clone()),
        ),
        changed_segments: Vec::new(),
        removed_segment_ids: Vec::new(),
        renamed_segments: Vec::new(),
    };

    let renamed_new: HashSet<&String> = changes.external_id_changed.values().collect();
    let new_ext_for_old: BTreeMap<&String, &String> =
        changes.external_id_changed.iter().map(|(o, n)| (o, n)).collect();
    let old_ext_for_new: BTreeMap<&String, &String> =
        changes.external_id_changed.iter().map(|(o, n)| (n, o)).collect();

    // Cheap path: rank is the only difference
    for (ext, rank) in &changes.only_rank_changed {
        let seg_id = SegmentId::derive(&rundown_id, ext);
        cache.segments.update_one(&seg_id, |s| s.rank = *rank)?;
    }

    // Full regeneration: changed content plus additions (rename targets
    // are additions here; their prior parts live under the old id)
    let regen: Vec<&String> = changes
        .changed
        .iter()
        .filter(|ext| !changes.only_rank_changed.contains_key(*ext))
        .chain(changes.added.iter())
        .collect();

    for ext in regen {
        let ingest_segment = snapshot
            .segment(ext)
            .ok_or_else(|| Error::Internal(format!("diffed segment {} missing from snapshot", ext)))?;

        let prior_seg_id = match old_ext_for_new.get(ext) {
            Some(old_ext) => SegmentId::derive(&rundown_id, old_ext),
            None => SegmentId::derive(&rundown_id, ext),
        };
        let prev_ranks = part_rank_snapshot(cache, &prior_seg_id);
        let prior_part_ids: HashSet<PartId> = prev_ranks.keys().cloned().collect();

        let out = ctx.blueprint.get_segment(&rundown_id, ingest_segment)?;
        let new_seg_id = out.segment.id.clone();

        if renamed_new.contains(ext) {
            // Part ids derive from external ids and survive the rename;
            // the upserts below move them to the new segment id
            cache.segments.remove_by_id(&prior_seg_id);
            data.renamed_segments.push((prior_seg_id, new_seg_id.clone()));
        }

        cache.segments.upsert(out.segment);

        let new_part_ids: HashSet<PartId> = out.parts.iter().map(|p| p.id.clone()).collect();
        for part in out.parts {
            cache.parts.upsert(part);
        }
        for id in prior_part_ids.iter().filter(|id| !new_part_ids.contains(*id)) {
            cache.parts.remove_by_id(id);
        }

        let new_piece_ids: HashSet<_> = out.pieces.iter().map(|p| p.id.clone()).collect();
        for piece in out.pieces {
            cache.pieces.upsert(piece);
        }
        let stale_pieces = cache.pieces.remove(|pc| {
            (prior_part_ids.contains(&pc.part_id) || new_part_ids.contains(&pc.part_id))
                && !new_piece_ids.contains(&pc.id)
        });
        if !stale_pieces.is_empty() {
            debug!(segment_id = %new_seg_id, count = stale_pieces.len(), "dropped stale pieces");
        }

        data.changed_segments.push((new_seg_id, prev_ranks));
    }

    // Removals (rename sources are handled above)
    for ext in &changes.removed {
        if new_ext_for_old.contains_key(ext) {
            continue;
        }
        let seg_id = SegmentId::derive(&rundown_id, ext);
        let prev_ranks = part_rank_snapshot(cache, &seg_id);
        for part_id in prev_ranks.keys() {
            cache.parts.remove_by_id(part_id);
        }
        cache
            .pieces
            .remove(|pc| prev_ranks.contains_key(&pc.part_id));
        data.removed_segment_ids.push(seg_id.clone());
        data.changed_segments.push((seg_id, prev_ranks));
    }

    upsert_rundown_doc(ctx, cache, snapshot)?;
    cache.put_snapshot(snapshot, time::now_ms());

    report_segment_changes(ctx, &rundown_id, &changes, &data);
    Ok(data)
}

fn part_rank_snapshot(cache: &IngestCache, segment_id: &SegmentId) -> PartRankSnapshot {
    cache
        .parts
        .find(|p| &p.segment_id == segment_id)
        .into_iter()
        .map(|p| (p.id.clone(), p.rank))
        .collect()
}

fn upsert_rundown_doc(
    ctx: &IngestContext,
    cache: &mut IngestCache,
    snapshot: &IngestRundown,
) -> Result<()> {
    let bp = ctx.blueprint.get_rundown(snapshot)?;
    let rundown_id = cache.rundown_id.clone();
    let now = time::now_ms();

    if cache.rundown.exists() {
        cache.rundown.update(|r| {
            r.name = bp.name.clone();
            r.rank = bp.rank;
            r.playlist_external_id = snapshot.playlist_external_id.clone();
            // A fresh feed snapshot resurrects an orphaned rundown
            r.orphaned = None;
            r.modified = now;
        })?;
    } else {
        let target = snapshot
            .playlist_external_id
            .clone()
            .unwrap_or_else(|| snapshot.external_id.clone());
        cache.rundown.set(Rundown {
            id: rundown_id,
            external_id: snapshot.external_id.clone(),
            name: bp.name,
            playlist_id: PlaylistId::from_external(&target),
            playlist_external_id: snapshot.playlist_external_id.clone(),
            rank: bp.rank,
            orphaned: None,
            modified: now,
        });
    }
    Ok(())
}

fn report_segment_changes(
    ctx: &IngestContext,
    rundown_id: &RundownId,
    changes: &SegmentChanges,
    data: &CommitData,
) {
    if changes.is_empty() {
        return;
    }
    ctx.emit(CueflowEvent::SegmentsChanged {
        rundown_id: rundown_id.clone(),
        changed: data.changed_segments.iter().map(|(id, _)| id.clone()).collect(),
        removed: data.removed_segment_ids.clone(),
        timestamp: time::now(),
    });
}

/// Commit phase: everything that needs the playlist lock and the playout
/// state. Finishes by persisting ingest ops, then playout ops.
async fn commit(
    ctx: &IngestContext,
    cache: &mut IngestCache,
    previous_playlist: Option<PlaylistId>,
    data: CommitData,
) -> Result<()> {
    if data.remove_rundown {
        return commit_removal(ctx, cache, previous_playlist).await;
    }

    let rundown_id = cache.rundown_id.clone();
    let target_external = data
        .target_playlist_external
        .clone()
        .ok_or_else(|| Error::Internal("generation produced no target playlist".to_string()))?;
    let target_id = PlaylistId::from_external(&target_external);

    // Resolve the effective playlist, handling a feed-driven move. An
    // active previous playlist with this rundown's content selected
    // refuses to let go; the rundown stays where it is.
    let (effective_id, effective_external, mut playlist_lock) = match &previous_playlist {
        Some(prev) if *prev != target_id => {
            let mut prev_lock = ctx.locks.acquire_playlist(prev.as_str()).await;
            let mut prev_playout =
                PlayoutCache::load(&ctx.store, &prev_lock, prev, &[rundown_id.clone()]).await?;

            let refused = prev_playout.is_active()
                && prev_playout
                    .playlist
                    .get()
                    .map(|p| p.has_selected_content_from(&rundown_id))
                    .unwrap_or(false);

            if refused {
                warn!(
                    rundown_id = %rundown_id,
                    from = %prev,
                    to = %target_id,
                    "playlist move refused, rundown content is on air"
                );
                let ext = prev_playout
                    .playlist
                    .get()
                    .map(|p| p.external_id.clone())
                    .unwrap_or_else(|| target_external.clone());
                (prev.clone(), ext, prev_lock)
            } else {
                detach_from_playlist(&mut prev_playout, &rundown_id)?;
                prev_playout.take_write_ops()?.apply(&ctx.store).await?;
                prev_lock.release(&ctx.locks);
                let lock = ctx.locks.acquire_playlist(target_id.as_str()).await;
                (target_id.clone(), target_external.clone(), lock)
            }
        }
        _ => {
            let lock = ctx.locks.acquire_playlist(target_id.as_str()).await;
            (target_id.clone(), target_external.clone(), lock)
        }
    };

    let member_ids = playlist_member_ids(ctx, &effective_id, &rundown_id).await?;
    let mut playout =
        PlayoutCache::load(&ctx.store, &playlist_lock, &effective_id, &member_ids).await?;

    if !playout.playlist.exists() {
        let name = cache
            .rundown
            .get()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| effective_external.clone());
        playout.playlist.set(RundownPlaylist {
            id: effective_id.clone(),
            external_id: effective_external,
            name,
            activation_id: None,
            current_part_info: None,
            next_part_info: None,
            previous_part_info: None,
            rundown_ids_in_order: Vec::new(),
            rundown_order_pinned: false,
            modified: time::now_ms(),
        });
    }

    cache.rundown.update(|r| r.playlist_id = effective_id.clone())?;

    // Removed segments: purge unless the segment backs the current or
    // next instance, in which case it is kept and flagged
    let selected_segment_ids: HashSet<SegmentId> = playout
        .selected_instance_ids()
        .iter()
        .filter_map(|id| playout.part_instances.find_one(id))
        .map(|i| i.segment_id.clone())
        .collect();
    for seg_id in &data.removed_segment_ids {
        if selected_segment_ids.contains(seg_id) {
            info!(segment_id = %seg_id, "removed segment is selected, orphaning");
            cache
                .segments
                .update_one(seg_id, |s| s.orphaned = Some(SegmentOrphaned::Deleted))?;
        } else {
            cache.segments.remove_by_id(seg_id);
        }
    }

    // Renames keep the on-air instances attached to the surviving segment
    for (old_id, new_id) in &data.renamed_segments {
        playout.part_instances.update(
            |i| &i.segment_id == old_id,
            |i| {
                i.segment_id = new_id.clone();
                i.part.segment_id = new_id.clone();
            },
        );
    }

    let view = ContentView::load(&ctx.store, &effective_id, Some(&*cache)).await?;
    recompute_rundown_order(&mut playout, &view, &rundown_id)?;

    update_part_instance_ranks(&mut playout.part_instances, &cache.parts, &data.changed_segments);
    playout.sync_changes_to_selected_instances(&view);

    persist(ctx, cache, &mut playout, &view).await?;

    ctx.emit(CueflowEvent::RundownUpserted {
        rundown_id: rundown_id.clone(),
        playlist_id: effective_id.clone(),
        timestamp: time::now(),
    });
    ctx.emit(CueflowEvent::CommitCompleted {
        rundown_id,
        playlist_id: effective_id,
        timestamp: time::now(),
    });

    playlist_lock.release(&ctx.locks);
    Ok(())
}

async fn commit_removal(
    ctx: &IngestContext,
    cache: &mut IngestCache,
    previous_playlist: Option<PlaylistId>,
) -> Result<()> {
    let rundown_id = cache.rundown_id.clone();
    let playlist_id = previous_playlist
        .ok_or_else(|| Error::Internal(format!("rundown {} has no playlist", rundown_id)))?;

    let mut playlist_lock = ctx.locks.acquire_playlist(playlist_id.as_str()).await;
    let member_ids = playlist_member_ids(ctx, &playlist_id, &rundown_id).await?;
    let mut playout =
        PlayoutCache::load(&ctx.store, &playlist_lock, &playlist_id, &member_ids).await?;

    let protected = playout.is_active()
        && playout
            .playlist
            .get()
            .map(|p| p.has_selected_content_from(&rundown_id))
            .unwrap_or(false);

    if protected {
        // Content is on air; keep everything and flag the rundown
        info!(rundown_id = %rundown_id, "rundown removal deferred, content is on air");
        cache
            .rundown
            .update(|r| r.orphaned = Some(RundownOrphaned::Deleted))?;
        ctx.emit(CueflowEvent::RundownOrphaned {
            rundown_id: rundown_id.clone(),
            timestamp: time::now(),
        });
    } else {
        cache.rundown.remove();
        let seg_ids = cache.segments.ids();
        for id in seg_ids {
            cache.segments.remove_by_id(&id);
        }
        let part_ids = cache.parts.ids();
        for id in part_ids {
            cache.parts.remove_by_id(&id);
        }
        let piece_ids = cache.pieces.ids();
        for id in piece_ids {
            cache.pieces.remove_by_id(&id);
        }
        playout
            .part_instances
            .remove(|i| i.rundown_id == rundown_id);
        detach_from_playlist(&mut playout, &rundown_id)?;
        ctx.emit(CueflowEvent::RundownRemoved {
            rundown_id: rundown_id.clone(),
            timestamp: time::now(),
        });
    }

    let view = ContentView::load(&ctx.store, &playlist_id, Some(&*cache)).await?;
    persist(ctx, cache, &mut playout, &view).await?;

    ctx.emit(CueflowEvent::CommitCompleted {
        rundown_id,
        playlist_id,
        timestamp: time::now(),
    });

    playlist_lock.release(&ctx.locks);
    Ok(())
}

/// Rundown ids whose instances the playout cache must cover: the stored
/// playlist members plus the rundown being committed.
async fn playlist_member_ids(
    ctx: &IngestContext,
    playlist_id: &PlaylistId,
    rundown_id: &RundownId,
) -> Result<Vec<RundownId>> {
    let stored: Vec<Rundown> = ctx
        .store
        .load(&DocQuery::ByPlaylist(playlist_id.to_string()))
        .await?;
    let mut ids: Vec<RundownId> = stored.into_iter().map(|r| r.id).collect();
    if !ids.contains(rundown_id) {
        ids.push(rundown_id.clone());
    }
    Ok(ids)
}

fn detach_from_playlist(playout: &mut PlayoutCache, rundown_id: &RundownId) -> Result<()> {
    if !playout.playlist.exists() {
        return Ok(());
    }
    playout.playlist.update(|p| {
        p.rundown_ids_in_order.retain(|id| id != rundown_id);
        p.modified = time::now_ms();
    })?;
    let empty = playout
        .playlist
        .get()
        .map(|p| p.rundown_ids_in_order.is_empty() && !p.is_active())
        .unwrap_or(false);
    if empty {
        playout.playlist.remove();
    }
    Ok(())
}

/// Recompute the playlist's rundown order from rundown ranks unless an
/// operator pinned it, in which case newcomers are appended.
fn recompute_rundown_order(
    playout: &mut PlayoutCache,
    view: &ContentView,
    rundown_id: &RundownId,
) -> Result<()> {
    let pinned = playout
        .playlist
        .get()
        .map(|p| p.rundown_order_pinned)
        .unwrap_or(false);

    if pinned {
        playout.playlist.update(|p| {
            if !p.rundown_ids_in_order.contains(rundown_id) {
                p.rundown_ids_in_order.push(rundown_id.clone());
            }
        })?;
        return Ok(());
    }

    let mut members: Vec<(f64, String, RundownId)> = view
        .rundowns
        .find_all()
        .into_iter()
        .map(|r| (r.rank, r.external_id.clone(), r.id.clone()))
        .collect();
    members.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let order: Vec<RundownId> = members.into_iter().map(|(_, _, id)| id).collect();

    playout.playlist.update(|p| {
        if p.rundown_ids_in_order != order {
            p.rundown_ids_in_order = order;
            p.modified = time::now_ms();
        }
    })?;
    Ok(())
}

/// Save both caches: ingest ops on their own task, the deferred
/// next-part check in parallel, playout ops strictly after the ingest
/// save succeeded.
async fn persist(
    ctx: &IngestContext,
    cache: &mut IngestCache,
    playout: &mut PlayoutCache,
    view: &ContentView,
) -> Result<()> {
    let ingest_ops = cache.take_write_ops()?;
    let store = ctx.store.clone();
    let ingest_save = tokio::spawn(async move { ingest_ops.apply(&store).await });

    let repaired = playout.ensure_next_part_is_valid(view)?;

    ingest_save
        .await
        .map_err(|e| Error::Internal(format!("ingest save task failed: {}", e)))??;

    playout.take_write_ops()?.apply(&ctx.store).await?;

    if let Some(next) = repaired {
        ctx.emit(CueflowEvent::NextPartRepaired {
            playlist_id: playout.playlist_id.clone(),
            part_instance_id: next,
            timestamp: time::now(),
        });
    }
    Ok(())
}
