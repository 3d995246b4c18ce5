use crate::config;
use crate::error::{CoreError, Result};
use crate::model::{Track, TrackId, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_TITLE};
use lofty::file::AudioFile;
use lofty::probe::Probe;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::UNIX_EPOCH;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use walkdir::WalkDir;

pub const MIN_TRACK_DURATION_MS: u64 = 10_000;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: i64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_id: i64,
    pub duration_ms: u64,
    pub date_added_epoch_ms: i64,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub content_locator: String,
    pub is_music: bool,
}

impl CatalogEntry {
    pub fn music(id: i64, title: &str, duration_ms: u64) -> Self {
        Self {
            id,
            title: Some(title.to_string()),
            artist: None,
            album: None,
            album_id: 0,
            duration_ms,
            date_added_epoch_ms: 0,
            year: None,
            genre: None,
            content_locator: format!("catalog://{id}"),
            is_music: true,
        }
    }

    pub fn into_track(self) -> Track {
        Track {
            id: TrackId(self.id),
            title: clean(self.title).unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            artist: clean(self.artist).unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            album: clean(self.album),
            album_id: self.album_id,
            genre: clean(self.genre),
            year: clean(self.year),
            duration_ms: self.duration_ms,
            date_added_epoch_ms: self.date_added_epoch_ms,
            content_locator: self.content_locator,
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

pub fn admit(entry: &CatalogEntry, min_duration_ms: u64) -> bool {
    entry.is_music && entry.duration_ms >= min_duration_ms
}

pub trait CatalogSource: Send + Sync {
    fn enumerate(&self) -> Result<Vec<CatalogEntry>>;
}

/// Stable across runs: the first 8 bytes of SHA-256 over `key`, kept positive.
pub fn stable_id(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & i64::MAX as u64) as i64
}

pub fn title_sort_key(title: &str) -> String {
    title
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Default)]
pub struct StaticCatalog {
    state: Mutex<StaticState>,
}

#[derive(Debug, Default)]
struct StaticState {
    entries: Vec<CatalogEntry>,
    unavailable: Option<String>,
    scans: usize,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            state: Mutex::new(StaticState {
                entries,
                unavailable: None,
                scans: 0,
            }),
        }
    }

    pub fn replace(&self, entries: Vec<CatalogEntry>) {
        self.lock().entries = entries;
    }

    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(str::to_string);
    }

    pub fn scan_count(&self) -> usize {
        self.lock().scans
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CatalogSource for StaticCatalog {
    fn enumerate(&self) -> Result<Vec<CatalogEntry>> {
        let mut state = self.lock();
        state.scans += 1;
        if let Some(reason) = &state.unavailable {
            return Err(CoreError::CatalogUnavailable(reason.clone()));
        }
        Ok(state.entries.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FolderCatalog {
    roots: Vec<PathBuf>,
}

impl FolderCatalog {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn scan_root(&self, root: &Path, out: &mut Vec<CatalogEntry>) -> Result<()> {
        fs::read_dir(root).map_err(|err| {
            CoreError::CatalogUnavailable(format!("cannot read {}: {err}", root.display()))
        })?;

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("skipping unreadable entry under {}: {err}", root.display());
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_audio(path) {
                continue;
            }
            out.push(entry_for_path(path));
        }
        Ok(())
    }
}

impl CatalogSource for FolderCatalog {
    fn enumerate(&self) -> Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        for root in &self.roots {
            self.scan_root(root, &mut entries)?;
        }

        entries.sort_by_cached_key(|entry| {
            (
                title_sort_key(entry.title.as_deref().unwrap_or_default()),
                entry.id,
            )
        });
        entries.dedup_by_key(|entry| entry.id);
        info!(
            "enumerated {} audio files under {} folders",
            entries.len(),
            self.roots.len()
        );
        Ok(entries)
    }
}

#[derive(Default)]
struct FileTags {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    genre: Option<String>,
    year: Option<String>,
}

fn entry_for_path(path: &Path) -> CatalogEntry {
    let stripped = config::strip_windows_verbatim_prefix(path);
    let (tags, probed_duration_ms) = probe_file(&stripped);
    let duration_ms = lofty_duration_ms(&stripped)
        .or(probed_duration_ms)
        .unwrap_or(0);

    let title = tags.title.unwrap_or_else(|| {
        stripped
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or(UNKNOWN_TITLE)
            .to_string()
    });
    let album_key = tags.album.as_deref().unwrap_or(UNKNOWN_ALBUM).to_lowercase();

    CatalogEntry {
        id: stable_id(&config::normalized_path_key(&stripped)),
        title: Some(title),
        artist: tags.artist,
        album: tags.album,
        album_id: stable_id(&album_key),
        duration_ms,
        date_added_epoch_ms: modified_epoch_ms(&stripped),
        year: tags.year,
        genre: tags.genre,
        content_locator: stripped.display().to_string(),
        is_music: true,
    }
}

fn probe_file(path: &Path) -> (FileTags, Option<u64>) {
    let Ok(file) = File::open(path) else {
        return (FileTags::default(), None);
    };
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let Ok(mut probed) = get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) else {
        return (FileTags::default(), None);
    };

    let duration_ms = probed
        .format
        .default_track()
        .and_then(|track| codec_duration_ms(&track.codec_params));

    let mut tags: Vec<Tag> = probed
        .format
        .metadata()
        .current()
        .map(|revision| revision.tags().to_vec())
        .unwrap_or_default();
    if tags.is_empty() {
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                tags = revision.tags().to_vec();
            }
        }
    }

    let file_tags = FileTags {
        title: tag_value(&tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(
            &tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
        album: tag_value(&tags, StandardTagKey::Album, &["album"]),
        genre: tag_value(&tags, StandardTagKey::Genre, &["genre"]),
        year: tag_value(&tags, StandardTagKey::Date, &["date", "year"]).map(year_from_date),
    };
    (file_tags, duration_ms)
}

fn lofty_duration_ms(path: &Path) -> Option<u64> {
    let tagged_file = Probe::open(path).and_then(|entry| entry.read()).ok()?;
    let millis = tagged_file.properties().duration().as_millis();
    (millis > 0).then(|| u64::try_from(millis).unwrap_or(u64::MAX))
}

fn codec_duration_ms(codec_params: &symphonia::core::codecs::CodecParameters) -> Option<u64> {
    if let (Some(time_base), Some(frame_count)) = (codec_params.time_base, codec_params.n_frames) {
        let time = time_base.calc_time(frame_count);
        return Some(time.seconds * 1000 + (time.frac * 1000.0).round() as u64);
    }

    codec_params
        .n_frames
        .zip(codec_params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)
        .map(|(frame_count, sample_rate)| frame_count * 1000 / u64::from(sample_rate))
}

fn tag_value(tags: &[Tag], standard_key: StandardTagKey, fallback_keys: &[&str]) -> Option<String> {
    let from_standard = tags
        .iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .map(|tag| tag.value.to_string());

    let from_fallback = || {
        tags.iter()
            .find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
            .map(|tag| tag.value.to_string())
    };

    from_standard.or_else(from_fallback).and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then_some(trimmed.to_string())
    })
}

fn year_from_date(value: String) -> String {
    let digits: String = value.chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|ch| ch.is_ascii_digit()) {
        digits
    } else {
        value
    }
}

fn modified_epoch_ms(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|age| i64::try_from(age.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}
