//! Playlist-scoped playout state
//!
//! The playout cache covers documents the playout side owns: the playlist
//! itself and the PartInstances of its rundowns. Ingest commits mutate
//! them only under the playlist lock, and only through the reconciliation
//! paths in here and in `reconcile`.

use crate::cache::{ReadCollection, WriteCollection, WriteOp, WriteOptionalObject};
use crate::db::{DocQuery, DocStore};
use crate::error::Result;
use crate::locks::LockHandle;
use crate::model::{Part, PartInstance, Rundown, RundownPlaylist, Segment, SelectedPartInstance};
use cueflow_common::ids::{PartInstanceId, PlaylistId, RundownId};
use tracing::{debug, info};

/// Read-only view of the playable content of a playlist, with pending
/// (not yet persisted) ingest documents overlaid on the stored ones.
pub struct ContentView {
    pub rundowns: ReadCollection<Rundown>,
    pub segments: ReadCollection<Segment>,
    pub parts: ReadCollection<Part>,
}

impl ContentView {
    pub async fn load(
        store: &DocStore,
        playlist_id: &PlaylistId,
        overlay: Option<&crate::ingest::IngestCache>,
    ) -> Result<ContentView> {
        let mut rundowns: Vec<Rundown> = store
            .load(&DocQuery::ByPlaylist(playlist_id.to_string()))
            .await?;

        // The rundown being ingested may not be persisted (or moved) yet
        if let Some(cache) = overlay {
            rundowns.retain(|r| r.id != cache.rundown_id);
            if let Some(r) = cache.rundown.get() {
                if &r.playlist_id == playlist_id {
                    rundowns.push(r.clone());
                }
            }
        }

        let rundown_ids: Vec<String> = rundowns.iter().map(|r| r.id.to_string()).collect();
        let by_rundowns = DocQuery::ByRundowns(rundown_ids);
        let mut segments: Vec<Segment> = store.load(&by_rundowns).await?;
        let mut parts: Vec<Part> = store.load(&by_rundowns).await?;

        if let Some(cache) = overlay {
            segments.retain(|s| s.rundown_id != cache.rundown_id);
            parts.retain(|p| p.rundown_id != cache.rundown_id);
            if rundowns.iter().any(|r| r.id == cache.rundown_id) {
                segments.extend(cache.segments.find_all().into_iter().cloned());
                parts.extend(cache.parts.find_all().into_iter().cloned());
            }
        }

        Ok(ContentView {
            rundowns: ReadCollection::from_docs(rundowns),
            segments: ReadCollection::from_docs(segments),
            parts: ReadCollection::from_docs(parts),
        })
    }
}

pub struct PlayoutCache {
    pub playlist_id: PlaylistId,
    pub playlist: WriteOptionalObject<RundownPlaylist>,
    pub part_instances: WriteCollection<PartInstance>,
}

impl PlayoutCache {
    /// Load under the playlist lock. Instances are loaded for the given
    /// rundown set (the playlist's members plus the rundown being moved
    /// in or out).
    pub async fn load(
        store: &DocStore,
        lock: &LockHandle,
        playlist_id: &PlaylistId,
        rundown_ids: &[RundownId],
    ) -> Result<PlayoutCache> {
        let token = lock.token();
        let playlist: Option<RundownPlaylist> = store.load_one(playlist_id.as_str()).await?;
        let ids: Vec<String> = rundown_ids.iter().map(|id| id.to_string()).collect();
        let instances: Vec<PartInstance> = store.load(&DocQuery::ByRundowns(ids)).await?;

        Ok(PlayoutCache {
            playlist_id: playlist_id.clone(),
            playlist: WriteOptionalObject::from_doc("rundown_playlists", playlist, token.clone())?,
            part_instances: WriteCollection::from_docs("part_instances", instances, token)?,
        })
    }

    pub fn is_active(&self) -> bool {
        self.playlist.get().map(|p| p.is_active()).unwrap_or(false)
    }

    fn selected_instance(&self, info: &Option<SelectedPartInstance>) -> Option<&PartInstance> {
        info.as_ref()
            .and_then(|i| self.part_instances.find_one(&i.part_instance_id))
    }

    pub fn current_instance(&self) -> Option<&PartInstance> {
        self.selected_instance(&self.playlist.get()?.current_part_info.clone())
    }

    pub fn next_instance(&self) -> Option<&PartInstance> {
        self.selected_instance(&self.playlist.get()?.next_part_info.clone())
    }

    /// Instance ids referenced by the current or next pointer.
    pub fn selected_instance_ids(&self) -> Vec<PartInstanceId> {
        let Some(playlist) = self.playlist.get() else {
            return Vec::new();
        };
        [&playlist.current_part_info, &playlist.next_part_info]
            .iter()
            .filter_map(|info| info.as_ref().map(|i| i.part_instance_id.clone()))
            .collect()
    }

    /// Make the given part the next one, reusing an existing live instance
    /// for it under the current activation if there is one.
    pub fn set_next_part(&mut self, part: &Part) -> Result<PartInstanceId> {
        let activation_id = self
            .playlist
            .get()
            .and_then(|p| p.activation_id.clone())
            .ok_or_else(|| crate::error::Error::Rejected("playlist is not active".to_string()))?;

        let existing = self
            .part_instances
            .find(|i| {
                i.part.id == part.id
                    && i.playlist_activation_id == activation_id
                    && !i.reset
                    && i.orphaned.is_none()
            })
            .first()
            .map(|i| i.id.clone());

        let instance_id = match existing {
            Some(id) => id,
            None => {
                let instance = PartInstance::from_part(&activation_id, part);
                let id = instance.id.clone();
                self.part_instances.upsert(instance);
                id
            }
        };

        let info = SelectedPartInstance {
            part_instance_id: instance_id.clone(),
            rundown_id: part.rundown_id.clone(),
        };
        self.playlist.update(|p| p.next_part_info = Some(info))?;
        Ok(instance_id)
    }

    pub fn clear_next_part(&mut self) -> Result<()> {
        self.playlist.update(|p| p.next_part_info = None)?;
        Ok(())
    }

    /// Position of a part in the playlist-wide playback order.
    fn part_position(&self, view: &ContentView, part: &Part) -> (usize, f64, f64) {
        let rundown_pos = self
            .playlist
            .get()
            .and_then(|p| {
                p.rundown_ids_in_order
                    .iter()
                    .position(|id| id == &part.rundown_id)
            })
            .unwrap_or(usize::MAX);
        let segment_rank = view
            .segments
            .find_one(&part.segment_id)
            .map(|s| s.rank)
            .unwrap_or(f64::MAX);
        (rundown_pos, segment_rank, part.rank)
    }

    /// First playable part strictly after the given position, in playlist
    /// order. Orphaned segments never contribute candidates.
    fn next_playable_after(
        &self,
        view: &ContentView,
        after: Option<(usize, f64, f64)>,
    ) -> Option<Part> {
        let mut candidates: Vec<(&Part, (usize, f64, f64))> = view
            .parts
            .find(|p| p.is_playable())
            .into_iter()
            .filter(|p| {
                view.segments
                    .find_one(&p.segment_id)
                    .map(|s| s.orphaned.is_none())
                    .unwrap_or(false)
            })
            .map(|p| (p, self.part_position(view, p)))
            .collect();
        candidates.sort_by(|a, b| {
            a.1 .0
                .cmp(&b.1 .0)
                .then(a.1 .1.total_cmp(&b.1 .1))
                .then(a.1 .2.total_cmp(&b.1 .2))
        });
        candidates
            .into_iter()
            .find(|(_, pos)| after.map(|a| *pos > a).unwrap_or(true))
            .map(|(p, _)| p.clone())
    }

    fn next_is_valid(&self, view: &ContentView) -> bool {
        let Some(playlist) = self.playlist.get() else {
            return true;
        };
        let Some(info) = &playlist.next_part_info else {
            // No next while on air is only acceptable when nothing is
            // playable at all; repair will try to pick one
            return self.current_instance().is_none();
        };
        match self.part_instances.find_one(&info.part_instance_id) {
            None => false,
            Some(inst) => {
                if inst.reset || inst.orphaned.is_some() {
                    return false;
                }
                view.parts
                    .find_one(&inst.part.id)
                    .map(|p| p.is_playable())
                    .unwrap_or(false)
            }
        }
    }

    /// Self-healing pass run after every ingest commit: if the next
    /// pointer went stale (part deleted, made invalid, segment orphaned),
    /// move it to the first playable part after the current one, or clear
    /// it when nothing playable remains.
    ///
    /// Returns the repaired next instance id (None inside Some = cleared)
    /// or None when no repair was needed.
    pub fn ensure_next_part_is_valid(
        &mut self,
        view: &ContentView,
    ) -> Result<Option<Option<PartInstanceId>>> {
        if !self.is_active() {
            return Ok(None);
        }
        if self.next_is_valid(view) {
            return Ok(None);
        }

        let after = self
            .current_instance()
            .map(|inst| self.part_position(view, &inst.part));
        match self.next_playable_after(view, after) {
            Some(part) => {
                let id = self.set_next_part(&part)?;
                info!(playlist_id = %self.playlist_id, part_id = %part.id, "repaired stale next part");
                Ok(Some(Some(id)))
            }
            None => {
                self.clear_next_part()?;
                info!(playlist_id = %self.playlist_id, "no playable part left, cleared next");
                Ok(Some(None))
            }
        }
    }

    /// Refresh the embedded part copy of the current and next instances
    /// from the updated part documents. Ranks are left alone; rank
    /// reconciliation owns them.
    pub fn sync_changes_to_selected_instances(&mut self, view: &ContentView) {
        for id in self.selected_instance_ids() {
            let updated = self
                .part_instances
                .find_one(&id)
                .filter(|inst| !inst.reset && inst.orphaned.is_none())
                .and_then(|inst| view.parts.find_one(&inst.part.id))
                .cloned();
            if let Some(part) = updated {
                let _ = self.part_instances.update_one(&id, |inst| {
                    let rank = inst.part.rank;
                    inst.part = part;
                    inst.part.rank = rank;
                });
            }
        }
        debug!(playlist_id = %self.playlist_id, "synced selected instances");
    }

    pub fn has_changes(&self) -> bool {
        self.playlist.has_changes() || self.part_instances.has_changes()
    }

    pub fn discard_changes(&mut self) {
        self.playlist.discard_changes();
        self.part_instances.discard_changes();
    }

    pub fn take_write_ops(&mut self) -> Result<PlayoutWriteOps> {
        Ok(PlayoutWriteOps {
            playlists: self.playlist.take_write_ops()?,
            part_instances: self.part_instances.take_write_ops()?,
        })
    }
}

pub struct PlayoutWriteOps {
    pub playlists: Vec<WriteOp<RundownPlaylist>>,
    pub part_instances: Vec<WriteOp<PartInstance>>,
}

impl PlayoutWriteOps {
    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty() && self.part_instances.is_empty()
    }

    pub async fn apply(self, store: &DocStore) -> Result<()> {
        store.apply_ops(self.playlists).await?;
        store.apply_ops(self.part_instances).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::{init_schema, open_in_memory};
    use crate::locks::LockManager;
    use cueflow_common::ids::{ActivationId, PartId, SegmentId};

    fn part(rundown: &RundownId, segment: &SegmentId, ext: &str, rank: f64) -> Part {
        Part {
            id: PartId::derive(rundown, ext),
            rundown_id: rundown.clone(),
            segment_id: segment.clone(),
            external_id: ext.to_string(),
            title: ext.to_string(),
            rank,
            invalid: false,
        }
    }

    fn segment(rundown: &RundownId, ext: &str, rank: f64) -> Segment {
        Segment {
            id: SegmentId::derive(rundown, ext),
            rundown_id: rundown.clone(),
            external_id: ext.to_string(),
            name: ext.to_string(),
            rank,
            external_modified: 0,
            orphaned: None,
        }
    }

    fn active_playlist(id: &PlaylistId, rundown: &RundownId) -> RundownPlaylist {
        RundownPlaylist {
            id: id.clone(),
            external_id: "PL1".to_string(),
            name: "PL1".to_string(),
            activation_id: Some(ActivationId::new("act-1".to_string())),
            current_part_info: None,
            next_part_info: None,
            previous_part_info: None,
            rundown_ids_in_order: vec![rundown.clone()],
            rundown_order_pinned: false,
            modified: 0,
        }
    }

    struct Fixture {
        cache: PlayoutCache,
        view: ContentView,
        rundown_id: RundownId,
        _lock: LockHandle,
    }

    async fn fixture(parts: Vec<Part>) -> Fixture {
        let pool = open_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        let store = DocStore::new(pool);
        let locks = LockManager::new();

        let rundown_id = RundownId::from_external("RO1");
        let playlist_id = PlaylistId::from_external("PL1");
        let seg = segment(&rundown_id, "seg-a", 0.0);

        let lock = locks.acquire_playlist(playlist_id.as_str()).await;
        let mut cache = PlayoutCache::load(&store, &lock, &playlist_id, &[rundown_id.clone()])
            .await
            .unwrap();
        cache.playlist.set(active_playlist(&playlist_id, &rundown_id));

        let view = ContentView {
            rundowns: ReadCollection::from_docs(vec![]),
            segments: ReadCollection::from_docs(vec![seg]),
            parts: ReadCollection::from_docs(parts),
        };
        Fixture {
            cache,
            view,
            rundown_id,
            _lock: lock,
        }
    }

    #[tokio::test]
    async fn test_set_next_part_creates_instance() {
        let rundown_id = RundownId::from_external("RO1");
        let seg = SegmentId::derive(&rundown_id, "seg-a");
        let p = part(&rundown_id, &seg, "p1", 0.0);
        let mut fx = fixture(vec![p.clone()]).await;

        let id = fx.cache.set_next_part(&p).unwrap();
        assert_eq!(fx.cache.next_instance().unwrap().id, id);
        assert_eq!(fx.cache.next_instance().unwrap().part.id, p.id);

        // Setting the same part again reuses the instance
        let id2 = fx.cache.set_next_part(&p).unwrap();
        assert_eq!(id, id2);
        assert_eq!(fx.cache.part_instances.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_next_noop_when_valid() {
        let rundown_id = RundownId::from_external("RO1");
        let seg = SegmentId::derive(&rundown_id, "seg-a");
        let p = part(&rundown_id, &seg, "p1", 0.0);
        let mut fx = fixture(vec![p.clone()]).await;

        fx.cache.set_next_part(&p).unwrap();
        let repaired = fx.cache.ensure_next_part_is_valid(&fx.view).unwrap();
        assert!(repaired.is_none());
    }

    #[tokio::test]
    async fn test_ensure_next_repairs_deleted_next() {
        let rundown_id = RundownId::from_external("RO1");
        let seg = SegmentId::derive(&rundown_id, "seg-a");
        let p1 = part(&rundown_id, &seg, "p1", 0.0);
        let p2 = part(&rundown_id, &seg, "p2", 1.0);
        let p3 = part(&rundown_id, &seg, "p3", 2.0);

        // p2 was next but is gone from the content view
        let mut fx = fixture(vec![p1.clone(), p3.clone()]).await;
        fx.cache.set_next_part(&p2).unwrap();

        let repaired = fx.cache.ensure_next_part_is_valid(&fx.view).unwrap();
        let new_next = repaired.unwrap().unwrap();
        assert_eq!(
            fx.cache.part_instances.find_one(&new_next).unwrap().part.id,
            p1.id
        );
    }

    #[tokio::test]
    async fn test_ensure_next_picks_part_after_current() {
        let rundown_id = RundownId::from_external("RO1");
        let seg = SegmentId::derive(&rundown_id, "seg-a");
        let p1 = part(&rundown_id, &seg, "p1", 0.0);
        let p2 = part(&rundown_id, &seg, "p2", 1.0);
        let p3 = part(&rundown_id, &seg, "p3", 2.0);

        let mut fx = fixture(vec![p1.clone(), p3.clone()]).await;
        // p1 on air, p2 was next and vanished
        let current_id = fx.cache.set_next_part(&p1).unwrap();
        fx.cache
            .playlist
            .update(|p| {
                p.current_part_info = p.next_part_info.take();
            })
            .unwrap();
        fx.cache
            .part_instances
            .update_one(&current_id, |i| i.taken = true)
            .unwrap();
        fx.cache.set_next_part(&p2).unwrap();

        let repaired = fx.cache.ensure_next_part_is_valid(&fx.view).unwrap();
        let new_next = repaired.unwrap().unwrap();
        // p1 is before current, p3 is the first part after it
        assert_eq!(
            fx.cache.part_instances.find_one(&new_next).unwrap().part.id,
            p3.id
        );
        let _ = fx.rundown_id;
    }

    #[tokio::test]
    async fn test_ensure_next_clears_when_nothing_playable() {
        let rundown_id = RundownId::from_external("RO1");
        let seg = SegmentId::derive(&rundown_id, "seg-a");
        let p1 = part(&rundown_id, &seg, "p1", 0.0);

        let mut fx = fixture(vec![]).await;
        fx.cache.set_next_part(&p1).unwrap();

        let repaired = fx.cache.ensure_next_part_is_valid(&fx.view).unwrap();
        assert_eq!(repaired, Some(None));
        assert!(fx.cache.playlist.get().unwrap().next_part_info.is_none());
    }

    #[tokio::test]
    async fn test_inactive_playlist_never_repaired() {
        let rundown_id = RundownId::from_external("RO1");
        let seg = SegmentId::derive(&rundown_id, "seg-a");
        let p1 = part(&rundown_id, &seg, "p1", 0.0);
        let mut fx = fixture(vec![p1]).await;
        fx.cache
            .playlist
            .update(|p| p.activation_id = None)
            .unwrap();

        let repaired = fx.cache.ensure_next_part_is_valid(&fx.view).unwrap();
        assert!(repaired.is_none());
    }

    #[tokio::test]
    async fn test_sync_selected_instances_refreshes_title() {
        let rundown_id = RundownId::from_external("RO1");
        let seg = SegmentId::derive(&rundown_id, "seg-a");
        let mut p1 = part(&rundown_id, &seg, "p1", 0.0);
        let mut fx = fixture(vec![]).await;
        let id = fx.cache.set_next_part(&p1).unwrap();

        p1.title = "Updated title".to_string();
        p1.rank = 5.0;
        let view = ContentView {
            rundowns: ReadCollection::from_docs(vec![]),
            segments: ReadCollection::from_docs(vec![]),
            parts: ReadCollection::from_docs(vec![p1]),
        };
        fx.cache.sync_changes_to_selected_instances(&view);

        let inst = fx.cache.part_instances.find_one(&id).unwrap();
        assert_eq!(inst.part.title, "Updated title");
        // Rank is owned by reconciliation, not by sync
        assert_eq!(inst.part.rank, 0.0);
    }
}
