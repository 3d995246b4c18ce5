use crate::catalog::{self, CatalogSource};
use crate::error::Result;
use crate::events::{CoreEvent, EventBus};
use crate::model::{SortOrder, Track, TrackId, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_GENRE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct Snapshot {
    tracks: Vec<Arc<Track>>,
    by_id: HashMap<TrackId, usize>,
    built_at: SystemTime,
    generation: u64,
}

impl Snapshot {
    /// Keeps the first occurrence of every id, in the order given.
    pub fn build(tracks: Vec<Track>, built_at: SystemTime, generation: u64) -> Self {
        let mut kept = Vec::with_capacity(tracks.len());
        let mut by_id = HashMap::with_capacity(tracks.len());
        for track in tracks {
            if by_id.contains_key(&track.id) {
                debug!("dropping duplicate catalog id {}", track.id);
                continue;
            }
            by_id.insert(track.id, kept.len());
            kept.push(Arc::new(track));
        }

        Self {
            tracks: kept,
            by_id,
            built_at,
            generation,
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&Arc<Track>> {
        self.by_id.get(&id).and_then(|idx| self.tracks.get(*idx))
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self, now: SystemTime, interval: Duration) -> bool {
        now.duration_since(self.built_at)
            .map(|age| age > interval)
            .unwrap_or(false)
    }

    pub fn search(&self, query: &str) -> Vec<Arc<Track>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.tracks.clone();
        }

        self.tracks
            .iter()
            .filter(|track| {
                track.title.to_lowercase().contains(&needle)
                    || track.artist.to_lowercase().contains(&needle)
                    || track
                        .album
                        .as_deref()
                        .is_some_and(|album| album.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    pub fn albums(&self) -> Vec<TrackGroup> {
        self.group_by(|track| track.album_or_default().to_string())
    }

    pub fn artists(&self) -> Vec<TrackGroup> {
        self.group_by(|track| track.artist.clone())
    }

    pub fn genres(&self) -> Vec<TrackGroup> {
        self.group_by(|track| track.genre_or_default().to_string())
    }

    fn group_by(&self, key: impl Fn(&Track) -> String) -> Vec<TrackGroup> {
        let mut groups: Vec<TrackGroup> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for track in &self.tracks {
            let name = key(track);
            let slot = *slots.entry(name.clone()).or_insert_with(|| {
                groups.push(TrackGroup {
                    name,
                    artist: track.artist.clone(),
                    album_id: track.album_id,
                    track_ids: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].track_ids.push(track.id);
        }
        sort_groups(&mut groups, SortOrder::NameAsc);
        groups
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackGroup {
    pub name: String,
    pub artist: String,
    pub album_id: i64,
    pub track_ids: Vec<TrackId>,
}

impl TrackGroup {
    pub fn is_unknown(&self) -> bool {
        matches!(
            self.name.as_str(),
            UNKNOWN_ALBUM | UNKNOWN_ARTIST | UNKNOWN_GENRE
        )
    }
}

pub fn sort_tracks(tracks: &mut [Arc<Track>], order: SortOrder) {
    match order {
        SortOrder::NameAsc => {
            tracks.sort_by_cached_key(|track| catalog::title_sort_key(&track.title))
        }
        SortOrder::NameDesc => {
            tracks.sort_by_cached_key(|track| catalog::title_sort_key(&track.title));
            tracks.reverse();
        }
        SortOrder::DateAddedAsc => tracks.sort_by_key(|track| track.date_added_epoch_ms),
        SortOrder::DateAddedDesc => {
            tracks.sort_by_key(|track| std::cmp::Reverse(track.date_added_epoch_ms))
        }
        SortOrder::Duration => tracks.sort_by_key(|track| track.duration_ms),
    }
}

pub fn sort_groups(groups: &mut [TrackGroup], order: SortOrder) {
    groups.sort_by_cached_key(|group| catalog::title_sort_key(&group.name));
    if order == SortOrder::NameDesc {
        groups.reverse();
    }
}

#[derive(Debug)]
pub struct MediaIndex {
    current: RwLock<Option<Arc<Snapshot>>>,
    next_generation: AtomicU64,
    invalidated: AtomicBool,
    refresh_interval: Duration,
    min_duration_ms: u64,
}

impl Default for MediaIndex {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_INTERVAL, catalog::MIN_TRACK_DURATION_MS)
    }
}

impl MediaIndex {
    pub fn new(refresh_interval: Duration, min_duration_ms: u64) -> Self {
        Self {
            current: RwLock::new(None),
            next_generation: AtomicU64::new(1),
            invalidated: AtomicBool::new(false),
            refresh_interval,
            min_duration_ms,
        }
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, id: TrackId) -> Option<Arc<Track>> {
        self.snapshot()
            .and_then(|snapshot| snapshot.get(id).cloned())
    }

    pub fn all(&self) -> Vec<Arc<Track>> {
        self.snapshot()
            .map(|snapshot| snapshot.tracks().to_vec())
            .unwrap_or_default()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().map(|s| s.generation()).unwrap_or(0)
    }

    pub fn is_stale(&self, now: SystemTime) -> bool {
        if self.invalidated.load(Ordering::SeqCst) {
            return true;
        }
        match self.snapshot() {
            Some(snapshot) => snapshot.is_stale(now, self.refresh_interval),
            None => true,
        }
    }

    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn begin_refresh(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    pub fn refresh(&self, source: &dyn CatalogSource) -> Result<Arc<Snapshot>> {
        let ticket = self.begin_refresh();
        self.refresh_with_ticket(source, ticket)
    }

    pub fn refresh_with_ticket(
        &self,
        source: &dyn CatalogSource,
        ticket: u64,
    ) -> Result<Arc<Snapshot>> {
        let entries = match source.enumerate() {
            Ok(entries) => entries,
            Err(err) => {
                warn!("catalog scan #{ticket} failed, keeping last known library: {err}");
                return Err(err);
            }
        };

        let scanned = entries.len();
        let tracks: Vec<Track> = entries
            .into_iter()
            .filter(|entry| catalog::admit(entry, self.min_duration_ms))
            .map(|entry| entry.into_track())
            .collect();
        debug!(
            "catalog scan #{ticket}: admitted {} of {scanned} entries",
            tracks.len()
        );

        let snapshot = Arc::new(Snapshot::build(tracks, SystemTime::now(), ticket));
        Ok(self.install(snapshot))
    }

    /// Swaps `snapshot` in unless a newer one is already installed; returns
    /// whichever snapshot is current afterwards.
    pub fn install(&self, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            if existing.generation() > snapshot.generation() {
                debug!(
                    "discarding superseded scan #{} (current #{})",
                    snapshot.generation(),
                    existing.generation()
                );
                return Arc::clone(existing);
            }
        }

        info!(
            "library index #{} installed with {} tracks",
            snapshot.generation(),
            snapshot.len()
        );
        *current = Some(Arc::clone(&snapshot));
        self.invalidated.store(false, Ordering::SeqCst);
        snapshot
    }
}

#[derive(Debug)]
enum RefreshCommand {
    Refresh(u64),
    Shutdown,
}

pub struct RefreshWorker {
    index: Arc<MediaIndex>,
    cmd_tx: Sender<RefreshCommand>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    pub fn spawn(index: Arc<MediaIndex>, source: Arc<dyn CatalogSource>, events: EventBus) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let worker_index = Arc::clone(&index);
        let handle = thread::Builder::new()
            .name(String::from("nebula-refresh"))
            .spawn(move || refresh_loop(worker_index, source, events, cmd_rx))
            .map_err(|err| warn!("failed to start refresh worker: {err}"))
            .ok();

        Self {
            index,
            cmd_tx,
            handle,
        }
    }

    /// Returns the ticket the resulting snapshot will carry.
    pub fn request(&self) -> u64 {
        let ticket = self.index.begin_refresh();
        if self.cmd_tx.send(RefreshCommand::Refresh(ticket)).is_err() {
            warn!("refresh worker is gone, dropping request #{ticket}");
        }
        ticket
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(RefreshCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn refresh_loop(
    index: Arc<MediaIndex>,
    source: Arc<dyn CatalogSource>,
    events: EventBus,
    cmd_rx: Receiver<RefreshCommand>,
) {
    while let Ok(command) = cmd_rx.recv() {
        let RefreshCommand::Refresh(mut ticket) = command else {
            break;
        };

        let mut shutdown = false;
        while let Ok(pending) = cmd_rx.try_recv() {
            match pending {
                RefreshCommand::Refresh(newer) => ticket = ticket.max(newer),
                RefreshCommand::Shutdown => shutdown = true,
            }
        }

        match index.refresh_with_ticket(source.as_ref(), ticket) {
            Ok(snapshot) => events.publish(CoreEvent::LibraryRefreshed {
                generation: snapshot.generation(),
                track_count: snapshot.len(),
            }),
            Err(err) => events.publish(CoreEvent::LibraryUnavailable {
                reason: err.to_string(),
            }),
        }

        if shutdown {
            break;
        }
    }
    debug!("refresh worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, StaticCatalog};

    fn entry(id: i64, title: &str) -> CatalogEntry {
        CatalogEntry::music(id, title, 60_000)
    }

    fn catalog() -> StaticCatalog {
        let mut short = entry(4, "Jingle");
        short.duration_ms = 3_000;
        let mut podcast = entry(5, "Episode");
        podcast.is_music = false;
        StaticCatalog::new(vec![entry(1, "Alpha"), entry(2, "Bravo"), entry(3, "Charlie"), short, podcast])
    }

    #[test]
    fn refresh_builds_lookup_and_keeps_scan_order() {
        let index = MediaIndex::default();
        let source = catalog();
        let snapshot = index.refresh(&source).expect("refresh");

        let titles: Vec<&str> = snapshot.tracks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Bravo", "Charlie"]);
        assert_eq!(index.get(TrackId(2)).map(|t| t.title.clone()).as_deref(), Some("Bravo"));
        assert!(index.get(TrackId(4)).is_none());
        assert!(index.get(TrackId(5)).is_none());
        assert!(index.get(TrackId(99)).is_none());
    }

    #[test]
    fn refresh_twice_on_unchanged_catalog_is_idempotent() {
        let index = MediaIndex::default();
        let source = catalog();
        let first = index.refresh(&source).expect("first");
        let second = index.refresh(&source).expect("second");

        assert_eq!(first.tracks(), second.tracks());
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let index = MediaIndex::default();
        let source = catalog();
        index.refresh(&source).expect("refresh");

        source.set_unavailable(Some("permission revoked"));
        assert!(index.refresh(&source).is_err());
        assert_eq!(index.all().len(), 3);
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_swap() {
        let index = MediaIndex::default();
        let source = catalog();
        let held = index.refresh(&source).expect("refresh");

        source.replace(vec![entry(9, "Zulu")]);
        index.refresh(&source).expect("refresh");

        assert_eq!(held.len(), 3);
        assert!(held.contains(TrackId(1)));
        assert_eq!(index.all().len(), 1);
        assert!(index.get(TrackId(1)).is_none());
    }

    #[test]
    fn superseded_scan_is_discarded() {
        let index = MediaIndex::default();
        let source = catalog();
        let older = index.begin_refresh();
        let newer = index.begin_refresh();

        index.refresh_with_ticket(&source, newer).expect("newer");
        source.replace(vec![entry(9, "Stale")]);
        let current = index.refresh_with_ticket(&source, older).expect("older");

        assert_eq!(current.generation(), newer);
        assert_eq!(index.all().len(), 3);
        assert!(index.get(TrackId(9)).is_none());
    }

    #[test]
    fn staleness_follows_build_time() {
        let index = MediaIndex::new(Duration::from_secs(300), 10_000);
        let now = SystemTime::now();
        assert!(index.is_stale(now));

        index.refresh(&catalog()).expect("refresh");
        let built = index.snapshot().expect("snapshot").built_at();
        assert!(!index.is_stale(built + Duration::from_secs(299)));
        assert!(index.is_stale(built + Duration::from_secs(301)));
    }

    #[test]
    fn invalidate_forces_staleness_until_next_refresh() {
        let index = MediaIndex::default();
        index.refresh(&catalog()).expect("refresh");
        let now = SystemTime::now();
        assert!(!index.is_stale(now));

        index.invalidate();
        assert!(index.is_stale(now));
        assert_eq!(index.all().len(), 3);

        index.refresh(&catalog()).expect("refresh");
        assert!(!index.is_stale(SystemTime::now()));
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let index = MediaIndex::default();
        let source = StaticCatalog::new(vec![entry(1, "First"), entry(1, "Second")]);
        let snapshot = index.refresh(&source).expect("refresh");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(TrackId(1)).map(|t| t.title.as_str()), Some("First"));
    }

    #[test]
    fn groups_are_derived_with_defaults() {
        let mut a = entry(1, "One");
        a.album = Some(String::from("Blue"));
        a.artist = Some(String::from("Joni"));
        a.genre = Some(String::from("Folk"));
        let mut b = entry(2, "Two");
        b.album = Some(String::from("Blue"));
        b.artist = Some(String::from("Joni"));
        let c = entry(3, "Three");

        let snapshot = Snapshot::build(
            vec![a.into_track(), b.into_track(), c.into_track()],
            SystemTime::now(),
            1,
        );

        let albums = snapshot.albums();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].name, "Blue");
        assert_eq!(albums[0].track_ids, vec![TrackId(1), TrackId(2)]);
        assert_eq!(albums[1].name, UNKNOWN_ALBUM);
        assert!(albums[1].is_unknown());

        let artists = snapshot.artists();
        assert_eq!(artists[0].name, "Joni");
        assert_eq!(artists[1].name, UNKNOWN_ARTIST);

        let genres = snapshot.genres();
        assert_eq!(genres[0].name, "Folk");
        assert_eq!(genres[1].track_ids, vec![TrackId(2), TrackId(3)]);
    }

    #[test]
    fn search_matches_title_artist_and_album() {
        let mut a = entry(1, "Harvest Moon");
        a.artist = Some(String::from("Neil"));
        let mut b = entry(2, "Other");
        b.album = Some(String::from("After the Gold Rush"));
        let snapshot = Snapshot::build(vec![a.into_track(), b.into_track()], SystemTime::now(), 1);

        assert_eq!(snapshot.search("moon").len(), 1);
        assert_eq!(snapshot.search("NEIL").len(), 1);
        assert_eq!(snapshot.search("gold").len(), 1);
        assert_eq!(snapshot.search("  ").len(), 2);
        assert!(snapshot.search("zzz").is_empty());
    }

    #[test]
    fn sort_orders_apply() {
        let mut a = entry(1, "beta");
        a.date_added_epoch_ms = 30;
        a.duration_ms = 90_000;
        let mut b = entry(2, "Alpha");
        b.date_added_epoch_ms = 10;
        b.duration_ms = 120_000;
        let mut c = entry(3, "gamma");
        c.date_added_epoch_ms = 20;
        c.duration_ms = 30_000;
        let snapshot = Snapshot::build(
            vec![a.into_track(), b.into_track(), c.into_track()],
            SystemTime::now(),
            1,
        );

        let ids = |order| {
            let mut tracks = snapshot.tracks().to_vec();
            sort_tracks(&mut tracks, order);
            tracks.iter().map(|t| t.id.0).collect::<Vec<_>>()
        };
        assert_eq!(ids(SortOrder::NameAsc), vec![2, 1, 3]);
        assert_eq!(ids(SortOrder::NameDesc), vec![3, 1, 2]);
        assert_eq!(ids(SortOrder::DateAddedAsc), vec![2, 3, 1]);
        assert_eq!(ids(SortOrder::DateAddedDesc), vec![1, 3, 2]);
        assert_eq!(ids(SortOrder::Duration), vec![3, 1, 2]);
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let index = Arc::new(MediaIndex::default());
        let source = Arc::new(catalog());
        index.refresh(source.as_ref()).expect("seed");

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(snapshot) = index.snapshot() {
                            for track in snapshot.tracks() {
                                assert!(snapshot.get(track.id).is_some());
                            }
                        }
                    }
                })
            })
            .collect();

        for _ in 0..20 {
            index.refresh(source.as_ref()).expect("refresh");
        }
        for reader in readers {
            reader.join().expect("reader");
        }
    }

    #[test]
    fn worker_refreshes_in_background_and_reports() {
        let index = Arc::new(MediaIndex::default());
        let source: Arc<dyn CatalogSource> = Arc::new(catalog());
        let events = EventBus::default();
        let rx = events.subscribe();

        let worker = RefreshWorker::spawn(Arc::clone(&index), source, events);
        let ticket = worker.request();
        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("refresh event");
        worker.shutdown();

        assert_eq!(
            event,
            CoreEvent::LibraryRefreshed {
                generation: ticket,
                track_count: 3
            }
        );
        assert_eq!(index.generation(), ticket);
    }

    struct GatedCatalog {
        inner: StaticCatalog,
        started: std::sync::Mutex<Option<Sender<()>>>,
        gate: std::sync::Mutex<Receiver<()>>,
    }

    impl CatalogSource for GatedCatalog {
        fn enumerate(&self) -> Result<Vec<CatalogEntry>> {
            let started = self.started.lock().expect("started lock").take();
            if let Some(started) = started {
                let _ = started.send(());
                let _ = self.gate.lock().expect("gate lock").recv();
            }
            self.inner.enumerate()
        }
    }

    #[test]
    fn worker_coalesces_requests_queued_during_a_scan() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let source = Arc::new(GatedCatalog {
            inner: catalog(),
            started: std::sync::Mutex::new(Some(started_tx)),
            gate: std::sync::Mutex::new(gate_rx),
        });
        let index = Arc::new(MediaIndex::default());
        let events = EventBus::default();
        let rx = events.subscribe();

        let worker = RefreshWorker::spawn(Arc::clone(&index), source.clone(), events);
        let first = worker.request();
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first scan started");
        let queued: Vec<u64> = (0..3).map(|_| worker.request()).collect();
        let newest = queued[2];
        gate_tx.send(()).expect("release scan");

        let generations: Vec<u64> = (0..2)
            .map(|_| match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(CoreEvent::LibraryRefreshed { generation, .. }) => generation,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        worker.shutdown();

        assert_eq!(generations, vec![first, newest]);
        assert_eq!(index.generation(), newest);
        assert_eq!(source.inner.scan_count(), 2);
        assert!(rx.try_iter().next().is_none());
    }
}
