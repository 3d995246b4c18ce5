use crate::collections::{FavoritesSet, Playlists, RecentList};
use crate::error::{CoreError, Result};
use crate::model::{LastSongDetails, Playlist, RepeatMode, SortCategory, SortOrder, TrackId};
use crate::queue::PlaybackQueue;
use serde_json::{Map, Value, json};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const KEY_CURRENT_TRACK: &str = "currentTrackId";
const KEY_SEEK: &str = "lastSeekPositionMs";
const KEY_REPEAT_MODE: &str = "repeatMode";
const KEY_SHUFFLE: &str = "shuffleFlag";
const KEY_CURRENT_QUEUE: &str = "currentQueueIds";
const KEY_ORIGINAL_QUEUE: &str = "originalQueueIds";
const KEY_POSITION: &str = "currentQueuePosition";
const KEY_FAVORITES: &str = "favorites";
const KEY_RECENT: &str = "recent";
const KEY_PLAYLISTS: &str = "playlists";
const KEY_SORT: &str = "sortPreferences";
const KEY_LAST_SONG: &str = "lastSongDetails";

const PLAYBACK_KEYS: [&str; 9] = [
    KEY_CURRENT_TRACK,
    KEY_SEEK,
    KEY_REPEAT_MODE,
    KEY_SHUFFLE,
    KEY_CURRENT_QUEUE,
    KEY_ORIGINAL_QUEUE,
    KEY_POSITION,
    KEY_LAST_SONG,
    // Older builds kept a parallel id -> record map next to the queue.
    "queueHashMap",
];

#[derive(Debug, Clone)]
pub struct RestoredSession {
    pub queue: PlaybackQueue,
    pub current_track_id: Option<TrackId>,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    document: Map<String, Value>,
    /// False while the primary file on disk is known to be unreadable, so a
    /// damaged file never replaces the backup.
    primary_valid: bool,
}

impl StateStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (document, primary_valid) = match read_document(&path) {
            Ok(Some(document)) => (document, true),
            Ok(None) => (Map::new(), true),
            Err(err) => {
                warn!("state file {} is unusable: {err}", path.display());
                let backup = sibling(&path, "bak");
                match read_document(&backup) {
                    Ok(Some(document)) => {
                        info!("recovered state from {}", backup.display());
                        (document, false)
                    }
                    _ => {
                        warn!("starting with fresh state");
                        (Map::new(), false)
                    }
                }
            }
        };

        Self {
            path,
            document,
            primary_valid,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(&self.document)?;
        let tmp = sibling(&self.path, "tmp");
        fs::write(&tmp, json)?;
        if self.primary_valid && self.path.exists() {
            if let Err(err) = fs::copy(&self.path, sibling(&self.path, "bak")) {
                debug!("could not refresh state backup: {err}");
            }
        }
        fs::rename(&tmp, &self.path)?;
        self.primary_valid = true;
        Ok(())
    }

    fn commit(&mut self, what: &str) {
        if let Err(err) = self.flush() {
            warn!("failed to persist {what} to {}: {err}", self.path.display());
        }
    }

    pub fn save(
        &mut self,
        queue: &PlaybackQueue,
        current_track_id: Option<TrackId>,
        seek_position_ms: u64,
    ) {
        self.write_playback(queue, current_track_id, seek_position_ms);
        self.commit("playback state");
    }

    fn write_playback(
        &mut self,
        queue: &PlaybackQueue,
        current_track_id: Option<TrackId>,
        seek_position_ms: u64,
    ) {
        let doc = &mut self.document;
        doc.insert(
            KEY_CURRENT_TRACK.into(),
            json!(current_track_id.map(|id| id.0).unwrap_or(-1)),
        );
        doc.insert(KEY_SEEK.into(), json!(seek_position_ms));
        doc.insert(KEY_REPEAT_MODE.into(), json!(queue.repeat_mode()));
        doc.insert(KEY_SHUFFLE.into(), json!(queue.is_shuffled()));
        doc.insert(KEY_CURRENT_QUEUE.into(), json!(queue.current_order()));
        doc.insert(KEY_ORIGINAL_QUEUE.into(), json!(queue.original_order()));
        doc.insert(KEY_POSITION.into(), json!(queue.position()));
    }

    pub fn load_playback(&self, resolves: impl Fn(TrackId) -> bool) -> Option<RestoredSession> {
        let mut queue = PlaybackQueue::new();
        self.load_playback_into(&mut queue, resolves)
            .map(|(current_track_id, dropped)| RestoredSession {
                queue,
                current_track_id,
                dropped,
            })
    }

    pub fn load_playback_into(
        &self,
        queue: &mut PlaybackQueue,
        resolves: impl Fn(TrackId) -> bool,
    ) -> Option<(Option<TrackId>, usize)> {
        let current = self.id_list(KEY_CURRENT_QUEUE);
        let original = self.id_list(KEY_ORIGINAL_QUEUE);
        if current.is_none() && original.is_none() {
            return None;
        }

        let position = self.u64_field(KEY_POSITION).unwrap_or(0);
        let position = usize::try_from(position).unwrap_or(usize::MAX);
        let seek = self.u64_field(KEY_SEEK).unwrap_or(0);
        let saved_track = self.current_track_id();

        queue.restore(
            current.unwrap_or_default(),
            original.unwrap_or_default(),
            position,
            self.repeat_mode(),
            seek,
        );
        let pointed = queue.current_track();
        let dropped = queue.retain(&resolves);
        if dropped > 0 {
            info!("dropped {dropped} queued tracks missing from the library");
        }
        if queue.is_empty() {
            return None;
        }

        if let Some(id) = saved_track {
            if queue.current_track() != Some(id) {
                if let Some(idx) = queue.current_order().iter().position(|t| *t == id) {
                    queue.skip_to(idx);
                }
            }
        }

        let expected = saved_track.or(pointed);
        if expected.is_some() && queue.current_track() == expected {
            queue.seek_to(seek);
        } else {
            queue.seek_to(0);
        }

        Some((saved_track, dropped))
    }

    pub fn current_track_id(&self) -> Option<TrackId> {
        self.document
            .get(KEY_CURRENT_TRACK)
            .and_then(decode_id)
            .filter(|id| id.0 >= 0)
    }

    /// Name, then ordinal, then the legacy shuffle flag; anything else is `All`.
    pub fn repeat_mode(&self) -> RepeatMode {
        let decoded = match self.document.get(KEY_REPEAT_MODE) {
            Some(Value::String(name)) => RepeatMode::parse(name),
            Some(Value::Number(n)) => n.as_u64().and_then(RepeatMode::from_ordinal),
            Some(_) => None,
            None => {
                let shuffled = matches!(self.document.get(KEY_SHUFFLE), Some(Value::Bool(true)));
                return if shuffled {
                    RepeatMode::Shuffle
                } else {
                    RepeatMode::All
                };
            }
        };

        decoded.unwrap_or_else(|| {
            self.report(CoreError::corrupt(KEY_REPEAT_MODE, "unrecognised repeat mode"));
            RepeatMode::All
        })
    }

    pub fn save_repeat_mode(&mut self, mode: RepeatMode) {
        self.document.insert(KEY_REPEAT_MODE.into(), json!(mode));
        self.document
            .insert(KEY_SHUFFLE.into(), json!(mode == RepeatMode::Shuffle));
        self.commit("repeat mode");
    }

    pub fn last_seek_position_ms(&self) -> u64 {
        self.u64_field(KEY_SEEK).unwrap_or(0)
    }

    pub fn load_favorites(&self) -> FavoritesSet {
        FavoritesSet::from_ids(self.id_list(KEY_FAVORITES).unwrap_or_default())
    }

    pub fn save_favorites(&mut self, favorites: &FavoritesSet) {
        let ids: Vec<TrackId> = favorites.iter().collect();
        self.document.insert(KEY_FAVORITES.into(), json!(ids));
        self.commit("favorites");
    }

    pub fn load_recent(&self, limit: usize) -> RecentList {
        RecentList::from_ids(self.id_list(KEY_RECENT).unwrap_or_default(), limit)
    }

    pub fn save_recent(&mut self, recent: &RecentList) {
        self.document.insert(KEY_RECENT.into(), json!(recent.ids()));
        self.commit("recently played");
    }

    pub fn load_playlists(&self) -> Playlists {
        let Some(value) = self.document.get(KEY_PLAYLISTS) else {
            return Playlists::default();
        };
        let decoded = match value {
            Value::String(raw) => serde_json::from_str::<Value>(raw).ok(),
            other => Some(other.clone()),
        };
        let Some(Value::Array(items)) = decoded else {
            self.report(CoreError::corrupt(KEY_PLAYLISTS, "expected a list"));
            return Playlists::default();
        };

        let mut playlists = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Playlist>(item) {
                Ok(playlist) => playlists.push(playlist),
                Err(err) => self.report(CoreError::corrupt(KEY_PLAYLISTS, err.to_string())),
            }
        }
        Playlists::from_vec(playlists)
    }

    pub fn save_playlists(&mut self, playlists: &Playlists) {
        self.document
            .insert(KEY_PLAYLISTS.into(), json!(playlists.as_slice()));
        self.commit("playlists");
    }

    pub fn sort_order(&self, category: SortCategory) -> SortOrder {
        self.document
            .get(KEY_SORT)
            .and_then(|prefs| prefs.get(category.key()))
            .and_then(Value::as_str)
            .and_then(SortOrder::parse)
            .unwrap_or_else(|| category.default_order())
    }

    pub fn save_sort_order(&mut self, category: SortCategory, order: SortOrder) {
        let prefs = self
            .document
            .entry(KEY_SORT)
            .or_insert_with(|| Value::Object(Map::new()));
        if !prefs.is_object() {
            *prefs = Value::Object(Map::new());
        }
        if let Value::Object(map) = prefs {
            map.insert(category.key().into(), json!(order.key()));
        }
        self.commit("sort preference");
    }

    pub fn last_song_details(&self) -> Option<LastSongDetails> {
        let value = self.document.get(KEY_LAST_SONG)?.clone();
        match serde_json::from_value(value) {
            Ok(details) => Some(details),
            Err(err) => {
                self.report(CoreError::corrupt(KEY_LAST_SONG, err.to_string()));
                None
            }
        }
    }

    pub fn save_session(
        &mut self,
        queue: &PlaybackQueue,
        current_track_id: Option<TrackId>,
        seek_position_ms: u64,
        details: Option<&LastSongDetails>,
    ) {
        self.write_playback(queue, current_track_id, seek_position_ms);
        match details {
            Some(details) => {
                self.document.insert(KEY_LAST_SONG.into(), json!(details));
            }
            None => {
                self.document.remove(KEY_LAST_SONG);
            }
        }
        self.commit("playback state");
    }

    pub fn clear_playback_state(&mut self) {
        for key in PLAYBACK_KEYS {
            self.document.remove(key);
        }
        self.commit("cleared playback state");
    }

    fn u64_field(&self, key: &str) -> Option<u64> {
        let value = self.document.get(key)?;
        let decoded = match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(raw) => raw.trim().parse().ok(),
            _ => None,
        };
        if decoded.is_none() {
            self.report(CoreError::corrupt(key, format!("not a non-negative number: {value}")));
        }
        decoded
    }

    fn id_list(&self, key: &str) -> Option<Vec<TrackId>> {
        let value = self.document.get(key)?;
        let (ids, skipped) = match value {
            Value::Array(items) => {
                let ids: Vec<TrackId> = items.iter().filter_map(decode_id).collect();
                let skipped = items.len() - ids.len();
                (ids, skipped)
            }
            Value::String(raw) => {
                let parts: Vec<&str> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .collect();
                let ids: Vec<TrackId> = parts
                    .iter()
                    .filter_map(|part| part.parse::<i64>().ok())
                    .map(TrackId)
                    .collect();
                let skipped = parts.len() - ids.len();
                (ids, skipped)
            }
            Value::Null => return None,
            other => {
                self.report(CoreError::corrupt(key, format!("unexpected value {other}")));
                return None;
            }
        };

        if skipped > 0 {
            self.report(CoreError::corrupt(key, format!("skipped {skipped} malformed ids")));
        }
        Some(ids)
    }

    fn report(&self, err: CoreError) {
        warn!("{err}; using defaults");
    }
}

fn decode_id(value: &Value) -> Option<TrackId> {
    match value {
        Value::Number(n) => n.as_i64().map(TrackId),
        Value::String(raw) => raw.trim().parse().ok().map(TrackId),
        _ => None,
    }
}

fn read_document(path: &Path) -> Result<Option<Map<String, Value>>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if raw.trim().is_empty() {
        return Err(CoreError::corrupt("document", "empty file"));
    }
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(CoreError::corrupt("document", "top level is not an object")),
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state"));
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(raw: &[i64]) -> Vec<TrackId> {
        raw.iter().copied().map(TrackId).collect()
    }

    fn queue_of(raw: &[i64], position: usize) -> PlaybackQueue {
        let mut queue = PlaybackQueue::with_seed(9);
        queue.start_playback(&ids(raw), position);
        queue
    }

    #[test]
    fn first_run_has_no_queue() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::open(dir.path().join("state.json"));
        assert!(store.is_empty());
        assert!(store.load_playback(|_| true).is_none());
        assert_eq!(store.repeat_mode(), RepeatMode::All);
    }

    #[test]
    fn save_then_load_reproduces_queue() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let mut queue = queue_of(&(1..=15).collect::<Vec<_>>(), 3);
        queue.toggle_shuffle();
        queue.next();

        let mut store = StateStore::open(&path);
        store.save(&queue, queue.current_track(), 12_345);

        let restored = StateStore::open(&path)
            .load_playback(|_| true)
            .expect("restored");
        assert_eq!(restored.queue.current_order(), queue.current_order());
        assert_eq!(restored.queue.original_order(), queue.original_order());
        assert_eq!(restored.queue.position(), queue.position());
        assert_eq!(restored.queue.repeat_mode(), RepeatMode::Shuffle);
        assert_eq!(restored.queue.last_seek_position_ms(), 12_345);
        assert_eq!(restored.current_track_id, queue.current_track());
        assert_eq!(restored.dropped, 0);
    }

    #[test]
    fn unknown_ids_are_filtered_and_position_follows_track() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let queue = queue_of(&[1, 2, 3, 4], 2);
        StateStore::open(&path).save(&queue, Some(TrackId(3)), 500);

        let restored = StateStore::open(&path)
            .load_playback(|id| id != TrackId(1))
            .expect("restored");
        assert_eq!(restored.queue.current_order(), ids(&[2, 3, 4]).as_slice());
        assert_eq!(restored.queue.current_track(), Some(TrackId(3)));
        assert_eq!(restored.queue.last_seek_position_ms(), 500);
        assert_eq!(restored.dropped, 1);
    }

    #[test]
    fn seek_is_dropped_when_the_saved_track_is_gone() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let queue = queue_of(&[1, 2, 3], 1);
        StateStore::open(&path).save(&queue, Some(TrackId(2)), 9_000);

        let restored = StateStore::open(&path)
            .load_playback(|id| id != TrackId(2))
            .expect("restored");
        assert_eq!(restored.queue.current_track(), Some(TrackId(3)));
        assert_eq!(restored.queue.last_seek_position_ms(), 0);
    }

    #[test]
    fn nothing_resolving_means_no_queue() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        StateStore::open(&path).save(&queue_of(&[1, 2], 0), Some(TrackId(1)), 0);
        assert!(StateStore::open(&path).load_playback(|_| false).is_none());
    }

    #[test]
    fn malformed_fields_fall_back_individually() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
                "currentTrackId": "not a number",
                "repeatMode": "sideways",
                "currentQueueIds": {"oops": true},
                "originalQueueIds": [5, "6", null, 7],
                "currentQueuePosition": -4,
                "lastSeekPositionMs": "250",
                "favorites": "5, 7,x",
                "recent": [7, 5, 7]
            }"#,
        )
        .expect("write");

        let store = StateStore::open(&path);
        assert_eq!(store.repeat_mode(), RepeatMode::All);
        assert_eq!(store.current_track_id(), None);
        let restored = store.load_playback(|_| true).expect("restored");
        assert_eq!(restored.queue.current_order(), ids(&[5, 6, 7]).as_slice());
        assert_eq!(restored.queue.position(), 0);
        assert_eq!(restored.queue.last_seek_position_ms(), 250);

        let favorites: Vec<TrackId> = store.load_favorites().iter().collect();
        assert_eq!(favorites, ids(&[5, 7]));
        assert_eq!(store.load_recent(50).ids(), ids(&[7, 5]).as_slice());
    }

    #[test]
    fn damaged_shuffled_order_is_rebuilt_from_original() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
                "repeatMode": "Shuffle",
                "currentQueueIds": [7, "x", 5],
                "originalQueueIds": [5, 6, 7],
                "currentQueuePosition": 0
            }"#,
        )
        .expect("write");

        let restored = StateStore::open(&path)
            .load_playback(|_| true)
            .expect("restored");
        assert_eq!(restored.queue.current_order(), ids(&[7, 5, 6]).as_slice());
        assert_eq!(restored.queue.original_order(), ids(&[5, 6, 7]).as_slice());
        assert_eq!(restored.queue.current_track(), Some(TrackId(7)));
        assert_eq!(restored.dropped, 0);
    }

    #[test]
    fn repeat_mode_alone_keeps_the_saved_queue() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        StateStore::open(&path).save(&queue_of(&[1, 2, 3], 1), Some(TrackId(2)), 0);

        StateStore::open(&path).save_repeat_mode(RepeatMode::Shuffle);
        let store = StateStore::open(&path);
        assert_eq!(store.repeat_mode(), RepeatMode::Shuffle);
        let restored = store.load_playback(|_| true).expect("restored");
        assert_eq!(restored.queue.original_order(), ids(&[1, 2, 3]).as_slice());
        assert_eq!(restored.queue.current_track(), Some(TrackId(2)));
    }

    #[test]
    fn repeat_mode_accepts_ordinal_and_legacy_flag() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{ "repeatMode": 1 }"#).expect("write");
        assert_eq!(StateStore::open(&path).repeat_mode(), RepeatMode::One);

        fs::write(&path, r#"{ "shuffleFlag": true }"#).expect("write");
        assert_eq!(StateStore::open(&path).repeat_mode(), RepeatMode::Shuffle);
    }

    #[test]
    fn corrupt_document_recovers_from_backup() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path);
        store.save(&queue_of(&[1, 2], 0), Some(TrackId(1)), 0);
        store.save(&queue_of(&[3, 4], 1), Some(TrackId(4)), 0);

        fs::write(&path, "{\"currentQueueIds\": [1, 2").expect("truncate");
        let recovered = StateStore::open(&path);
        let restored = recovered.load_playback(|_| true).expect("restored");
        assert_eq!(restored.queue.current_order(), ids(&[1, 2]).as_slice());
    }

    #[test]
    fn corrupt_document_without_backup_starts_fresh() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, "garbage").expect("write");

        let mut store = StateStore::open(&path);
        assert!(store.is_empty());
        assert!(store.load_playback(|_| true).is_none());

        store.save(&queue_of(&[8], 0), Some(TrackId(8)), 0);
        assert!(!sibling(&path, "bak").exists());
        assert!(StateStore::open(&path).load_playback(|_| true).is_some());
    }

    #[test]
    fn no_temp_file_is_left_behind() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let mut store = StateStore::open(&path);
        store.save(&queue_of(&[1], 0), None, 0);

        assert!(path.exists());
        assert!(!sibling(&path, "tmp").exists());
    }

    #[test]
    fn clear_keeps_collections() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path);
        store.save(&queue_of(&[1, 2], 0), Some(TrackId(1)), 10);
        store.save_favorites(&FavoritesSet::from_ids(ids(&[2])));
        store.save_sort_order(SortCategory::Albums, SortOrder::NameDesc);
        store.clear_playback_state();

        let reopened = StateStore::open(&path);
        assert!(reopened.load_playback(|_| true).is_none());
        assert_eq!(reopened.load_favorites().len(), 1);
        assert_eq!(reopened.sort_order(SortCategory::Albums), SortOrder::NameDesc);
        assert_eq!(reopened.last_seek_position_ms(), 0);
    }

    #[test]
    fn sort_preferences_default_per_category() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{ "sortPreferences": { "songs": "bogus", "genres": "NAME_DESC" } }"#)
            .expect("write");

        let store = StateStore::open(&path);
        assert_eq!(store.sort_order(SortCategory::Songs), SortOrder::DateAddedDesc);
        assert_eq!(store.sort_order(SortCategory::Artists), SortOrder::NameAsc);
        assert_eq!(store.sort_order(SortCategory::Genres), SortOrder::NameDesc);
    }

    #[test]
    fn playlists_skip_bad_entries() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{ "playlists": [ {"id": 1, "name": "Keep", "track_ids": [4]}, {"name": 3} ] }"#,
        )
        .expect("write");

        let playlists = StateStore::open(&path).load_playlists();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists.get(1).map(|p| p.track_ids.clone()), Some(ids(&[4])));
    }

    #[test]
    fn last_song_details_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let details = LastSongDetails {
            title: String::from("Song"),
            artist: String::from("Artist"),
            album: String::from("Album"),
            album_id: 7,
        };
        let queue = queue_of(&[1], 0);
        StateStore::open(&path).save_session(&queue, Some(TrackId(1)), 0, Some(&details));

        assert_eq!(StateStore::open(&path).last_song_details(), Some(details));
    }
}
