use crate::catalog::CatalogSource;
use crate::collections::{FavoritesSet, Playlists, RecentList};
use crate::config::Settings;
use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::index::{self, MediaIndex, RefreshWorker, Snapshot, TrackGroup};
use crate::model::{
    LastSongDetails, PlaybackState, Playlist, QueueSnapshot, RepeatMode, SortCategory, SortOrder,
    Track, TrackId,
};
use crate::queue::{PlaybackQueue, QueueStep};
use crate::store::StateStore;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::SystemTime;
use tracing::{debug, info, warn};

const STATUS_UNAVAILABLE: &str = "library unavailable, showing last known list";

pub struct MusicCore {
    index: Arc<MediaIndex>,
    source: Arc<dyn CatalogSource>,
    worker: Option<RefreshWorker>,
    queue: PlaybackQueue,
    store: StateStore,
    favorites: FavoritesSet,
    recent: RecentList,
    playlists: Playlists,
    events: EventBus,
    playback_state: PlaybackState,
    pending_restore: bool,
    seen_generation: u64,
    pub status: String,
}

impl MusicCore {
    pub fn open(source: Arc<dyn CatalogSource>, store: StateStore, settings: &Settings) -> Self {
        Self::with_queue(source, store, settings, PlaybackQueue::new())
    }

    pub fn with_queue(
        source: Arc<dyn CatalogSource>,
        store: StateStore,
        settings: &Settings,
        mut queue: PlaybackQueue,
    ) -> Self {
        let index = Arc::new(MediaIndex::new(
            settings.refresh_interval(),
            settings.min_duration_ms,
        ));
        let events = EventBus::default();
        queue.set_repeat_mode(store.repeat_mode());

        let mut core = Self {
            favorites: store.load_favorites(),
            recent: store.load_recent(settings.recent_limit),
            playlists: store.load_playlists(),
            index,
            source,
            worker: None,
            queue,
            store,
            events,
            playback_state: PlaybackState::Stopped,
            pending_restore: true,
            seen_generation: 0,
            status: String::from("Ready"),
        };

        match core.index.refresh(core.source.as_ref()) {
            Ok(snapshot) => {
                core.set_status(&format!("Library ready with {} tracks", snapshot.len()));
            }
            Err(err) => {
                warn!("initial library scan failed: {err}");
                core.set_status(STATUS_UNAVAILABLE);
            }
        }
        core.sync_with_index();

        core.worker = Some(RefreshWorker::spawn(
            Arc::clone(&core.index),
            Arc::clone(&core.source),
            core.events.clone(),
        ));
        core
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn index(&self) -> &Arc<MediaIndex> {
        &self.index
    }

    pub fn sync_with_index(&mut self) {
        let Some(snapshot) = self.index.snapshot() else {
            return;
        };
        if snapshot.generation() <= self.seen_generation {
            return;
        }
        self.seen_generation = snapshot.generation();

        if self.pending_restore {
            self.pending_restore = false;
            self.restore_session(&snapshot);
            return;
        }

        let previous = self.queue.current_track();
        let removed = self.queue.retain(|id| snapshot.contains(id));
        if removed > 0 {
            info!("removed {removed} queued tracks that left the library");
            self.after_queue_change(previous, false);
        }
    }

    fn restore_session(&mut self, snapshot: &Snapshot) {
        if !self.queue.is_empty() {
            debug!("queue already in use, skipping saved session");
            return;
        }

        let restored = self
            .store
            .load_playback_into(&mut self.queue, |id| snapshot.contains(id));
        let Some((_, dropped)) = restored else {
            debug!("no saved queue to restore");
            return;
        };

        info!(
            "restored queue of {} tracks at position {}",
            self.queue.len(),
            self.queue.position()
        );
        self.events.publish(CoreEvent::QueueChanged {
            length: self.queue.len(),
            position: self.queue.position(),
        });
        self.events.publish(CoreEvent::TrackChanged {
            track_id: self.queue.current_track(),
            previous_track_id: None,
        });
        if dropped > 0 {
            self.persist_session();
        }
    }

    pub fn start_playback(&mut self, track_ids: &[TrackId], start_index: usize) -> QueueStep {
        self.sync_with_index();
        let Some((known, start)) = self.known_ids(track_ids, start_index) else {
            return QueueStep::NoCurrentTrack;
        };

        let previous = self.queue.current_track();
        let step = self.queue.start_playback(&known, start);
        self.set_playback_state(PlaybackState::Playing);
        self.after_queue_change(previous, true);
        step
    }

    pub fn shuffle_play(&mut self, track_ids: &[TrackId]) -> QueueStep {
        self.sync_with_index();
        let Some((known, _)) = self.known_ids(track_ids, 0) else {
            return QueueStep::NoCurrentTrack;
        };

        let previous = self.queue.current_track();
        let mode = self.queue.repeat_mode();
        let step = self.queue.shuffle_play(&known);
        self.repeat_mode_changed(mode);
        self.set_playback_state(PlaybackState::Playing);
        self.after_queue_change(previous, true);
        step
    }

    /// Drops ids the index does not know and re-targets the start index at
    /// the same entry, or the next surviving one.
    fn known_ids(&self, track_ids: &[TrackId], start_index: usize) -> Option<(Vec<TrackId>, usize)> {
        if track_ids.is_empty() {
            return None;
        }
        let snapshot = self.index.snapshot()?;
        let wanted = start_index.min(track_ids.len() - 1);

        let mut known = Vec::with_capacity(track_ids.len());
        let mut start = 0;
        for (idx, id) in track_ids.iter().enumerate() {
            if idx == wanted {
                start = known.len();
            }
            if snapshot.contains(*id) {
                known.push(*id);
            } else {
                debug!("skipping unknown track id {id}");
            }
        }

        if known.is_empty() {
            warn!("none of the {} requested tracks are in the library", track_ids.len());
            return None;
        }
        Some((known, start))
    }

    pub fn next(&mut self) -> QueueStep {
        self.sync_with_index();
        let previous = self.queue.current_track();
        let step = self.queue.next();
        self.after_step(step, previous)
    }

    pub fn previous(&mut self) -> QueueStep {
        self.sync_with_index();
        let previous = self.queue.current_track();
        let step = self.queue.previous();
        self.after_step(step, previous)
    }

    pub fn track_finished(&mut self) -> QueueStep {
        self.sync_with_index();
        let previous = self.queue.current_track();
        let step = self.queue.track_finished();
        self.after_step(step, previous)
    }

    pub fn skip_to(&mut self, position: usize) -> QueueStep {
        self.sync_with_index();
        let previous = self.queue.current_track();
        let step = self.queue.skip_to(position);
        self.after_step(step, previous)
    }

    pub fn toggle_shuffle(&mut self) -> QueueStep {
        self.sync_with_index();
        let previous = self.queue.current_track();
        let mode = self.queue.repeat_mode();
        let step = self.queue.toggle_shuffle();
        if step == QueueStep::NoCurrentTrack {
            return step;
        }
        self.repeat_mode_changed(mode);
        self.after_queue_change(previous, false);
        step
    }

    pub fn toggle_repeat(&mut self) -> RepeatMode {
        self.sync_with_index();
        let previous = self.queue.current_track();
        let mode = self.queue.repeat_mode();
        let next = self.queue.toggle_repeat();
        self.repeat_mode_changed(mode);
        self.after_queue_change(previous, false);
        next
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.sync_with_index();
        let previous = self.queue.current_track();
        let before = self.queue.repeat_mode();
        self.queue.set_repeat_mode(mode);
        if before != mode {
            self.repeat_mode_changed(before);
            self.after_queue_change(previous, false);
        }
    }

    pub fn seek_to(&mut self, position_ms: i64) -> Result<()> {
        let position = u64::try_from(position_ms)
            .map_err(|_| CoreError::InvalidSeekPosition(position_ms))?;
        self.queue.seek_to(position);
        self.persist_session();
        Ok(())
    }

    pub fn play(&mut self) -> QueueStep {
        let step = self.queue.current();
        if step != QueueStep::NoCurrentTrack {
            self.set_playback_state(PlaybackState::Playing);
        }
        step
    }

    pub fn pause(&mut self) {
        if self.playback_state == PlaybackState::Playing {
            self.set_playback_state(PlaybackState::Paused);
        }
    }

    pub fn stop(&mut self) {
        let previous = self.queue.current_track();
        self.queue.clear();
        self.set_playback_state(PlaybackState::Stopped);
        self.after_queue_change(previous, false);
    }

    pub fn clear_playback_state(&mut self) {
        let previous = self.queue.current_track();
        self.queue.clear();
        self.set_playback_state(PlaybackState::Stopped);
        self.store.clear_playback_state();
        self.events.publish(CoreEvent::QueueChanged {
            length: 0,
            position: 0,
        });
        if previous.is_some() {
            self.events.publish(CoreEvent::TrackChanged {
                track_id: None,
                previous_track_id: previous,
            });
        }
        self.set_status("Playback state cleared");
    }

    pub fn add_favorite(&mut self, id: TrackId) -> Result<bool> {
        self.require_known(id)?;
        let added = self.favorites.add(id);
        if added {
            self.store.save_favorites(&self.favorites);
            self.events.publish(CoreEvent::FavoritesChanged {
                track_id: id,
                favorite: true,
            });
        }
        Ok(added)
    }

    pub fn remove_favorite(&mut self, id: TrackId) -> bool {
        let removed = self.favorites.remove(id);
        if removed {
            self.store.save_favorites(&self.favorites);
            self.events.publish(CoreEvent::FavoritesChanged {
                track_id: id,
                favorite: false,
            });
        }
        removed
    }

    pub fn add_recent(&mut self, id: TrackId) -> Result<()> {
        self.require_known(id)?;
        self.record_recent(id);
        Ok(())
    }

    pub fn remove_recent(&mut self, id: TrackId) -> bool {
        let removed = self.recent.remove(id);
        if removed {
            self.store.save_recent(&self.recent);
            self.events.publish(CoreEvent::RecentChanged {
                length: self.recent.len(),
            });
        }
        removed
    }

    fn record_recent(&mut self, id: TrackId) {
        self.recent.add(id);
        self.store.save_recent(&self.recent);
        self.events.publish(CoreEvent::RecentChanged {
            length: self.recent.len(),
        });
    }

    pub fn create_playlist(&mut self, name: &str) -> u64 {
        let id = self.playlists.create(name);
        self.playlists_changed();
        id
    }

    pub fn rename_playlist(&mut self, id: u64, name: &str) -> bool {
        let renamed = self.playlists.rename(id, name);
        if renamed {
            self.playlists_changed();
        }
        renamed
    }

    pub fn delete_playlist(&mut self, id: u64) -> bool {
        let deleted = self.playlists.delete(id);
        if deleted {
            self.playlists_changed();
        }
        deleted
    }

    pub fn add_to_playlist(&mut self, id: u64, track_id: TrackId) -> Result<bool> {
        self.require_known(track_id)?;
        let added = self.playlists.add_track(id, track_id);
        if added {
            self.playlists_changed();
        }
        Ok(added)
    }

    pub fn remove_from_playlist(&mut self, id: u64, track_id: TrackId) -> bool {
        let removed = self.playlists.remove_track(id, track_id);
        if removed {
            self.playlists_changed();
        }
        removed
    }

    fn playlists_changed(&mut self) {
        self.store.save_playlists(&self.playlists);
        self.events.publish(CoreEvent::PlaylistsChanged);
    }

    pub fn set_sort_order(&mut self, category: SortCategory, order: SortOrder) {
        self.store.save_sort_order(category, order);
    }

    pub fn sort_order(&self, category: SortCategory) -> SortOrder {
        self.store.sort_order(category)
    }

    pub fn refresh_library(&mut self) -> Result<usize> {
        match self.index.refresh(self.source.as_ref()) {
            Ok(snapshot) => {
                self.events.publish(CoreEvent::LibraryRefreshed {
                    generation: snapshot.generation(),
                    track_count: snapshot.len(),
                });
                self.set_status(&format!("Library ready with {} tracks", snapshot.len()));
                self.sync_with_index();
                Ok(snapshot.len())
            }
            Err(err) => {
                self.events.publish(CoreEvent::LibraryUnavailable {
                    reason: err.to_string(),
                });
                self.set_status(STATUS_UNAVAILABLE);
                Err(err)
            }
        }
    }

    pub fn request_refresh(&self) -> Option<u64> {
        self.worker.as_ref().map(RefreshWorker::request)
    }

    pub fn refresh_if_stale(&self, now: SystemTime) -> Option<u64> {
        if self.index.is_stale(now) {
            self.request_refresh()
        } else {
            None
        }
    }

    pub fn invalidate_library(&self) -> Option<u64> {
        self.index.invalidate();
        self.request_refresh()
    }

    pub fn close(mut self) {
        self.persist_session();
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    pub fn all_tracks(&self) -> Vec<Arc<Track>> {
        self.index.all()
    }

    pub fn track(&self, id: TrackId) -> Option<Arc<Track>> {
        self.index.get(id)
    }

    pub fn tracks_sorted(&self) -> Vec<Arc<Track>> {
        let mut tracks = self.index.all();
        index::sort_tracks(&mut tracks, self.sort_order(SortCategory::Songs));
        tracks
    }

    pub fn search(&self, query: &str) -> Vec<Arc<Track>> {
        self.index
            .snapshot()
            .map(|snapshot| snapshot.search(query))
            .unwrap_or_default()
    }

    pub fn albums(&self) -> Vec<TrackGroup> {
        self.grouped(SortCategory::Albums, Snapshot::albums)
    }

    pub fn artists(&self) -> Vec<TrackGroup> {
        self.grouped(SortCategory::Artists, Snapshot::artists)
    }

    pub fn genres(&self) -> Vec<TrackGroup> {
        self.grouped(SortCategory::Genres, Snapshot::genres)
    }

    fn grouped(&self, category: SortCategory, view: fn(&Snapshot) -> Vec<TrackGroup>) -> Vec<TrackGroup> {
        let Some(snapshot) = self.index.snapshot() else {
            return Vec::new();
        };
        let mut groups = view(snapshot.as_ref());
        index::sort_groups(&mut groups, self.sort_order(category));
        groups
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn current_track(&self) -> Option<Arc<Track>> {
        self.queue.current_track().and_then(|id| self.index.get(id))
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.queue.repeat_mode()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback_state
    }

    pub fn is_favorite(&self, id: TrackId) -> bool {
        self.favorites.contains(id)
    }

    pub fn favorites(&self) -> Vec<Arc<Track>> {
        self.resolve(self.favorites.iter())
    }

    pub fn recent(&self) -> &[TrackId] {
        self.recent.ids()
    }

    pub fn recent_tracks(&self) -> Vec<Arc<Track>> {
        self.resolve(self.recent.ids().iter().copied())
    }

    pub fn playlists(&self) -> &[Playlist] {
        self.playlists.as_slice()
    }

    pub fn playlist_tracks(&self, id: u64) -> Vec<Arc<Track>> {
        match self.playlists.get(id) {
            Some(playlist) => self.resolve(playlist.track_ids.iter().copied()),
            None => Vec::new(),
        }
    }

    pub fn last_song_details(&self) -> Option<LastSongDetails> {
        self.store.last_song_details()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    fn resolve(&self, ids: impl Iterator<Item = TrackId>) -> Vec<Arc<Track>> {
        let Some(snapshot) = self.index.snapshot() else {
            return Vec::new();
        };
        ids.filter_map(|id| snapshot.get(id).cloned()).collect()
    }

    fn require_known(&self, id: TrackId) -> Result<()> {
        if self.index.get(id).is_some() {
            Ok(())
        } else {
            warn!("rejecting unknown track id {id}");
            Err(CoreError::UnknownTrackId(id))
        }
    }

    fn after_step(&mut self, step: QueueStep, previous: Option<TrackId>) -> QueueStep {
        if step != QueueStep::NoCurrentTrack {
            self.after_queue_change(previous, false);
        }
        step
    }

    fn after_queue_change(&mut self, previous: Option<TrackId>, force_track_event: bool) {
        let current = self.queue.current_track();
        self.events.publish(CoreEvent::QueueChanged {
            length: self.queue.len(),
            position: self.queue.position(),
        });
        if force_track_event || current != previous {
            self.events.publish(CoreEvent::TrackChanged {
                track_id: current,
                previous_track_id: previous,
            });
            if let Some(id) = current {
                self.record_recent(id);
            }
        }
        self.persist_session();
    }

    fn repeat_mode_changed(&mut self, before: RepeatMode) {
        let mode = self.queue.repeat_mode();
        if mode != before {
            debug!("repeat mode {} -> {}", before.label(), mode.label());
            self.events.publish(CoreEvent::RepeatModeChanged { mode });
        }
    }

    fn set_playback_state(&mut self, state: PlaybackState) {
        if self.playback_state != state {
            self.playback_state = state;
            self.events
                .publish(CoreEvent::PlaybackStateChanged { state });
        }
    }

    fn persist_session(&mut self) {
        if self.pending_restore {
            // The saved queue has not been read back yet.
            self.store.save_repeat_mode(self.queue.repeat_mode());
            return;
        }
        let current = self.queue.current_track();
        let details = current
            .and_then(|id| self.index.get(id))
            .map(|track| track.last_song_details());
        self.store.save_session(
            &self.queue,
            current,
            self.queue.last_seek_position_ms(),
            details.as_ref(),
        );
    }

    fn set_status(&mut self, message: &str) {
        self.status = message.to_string();
    }
}
