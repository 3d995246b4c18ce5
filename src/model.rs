use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_GENRE: &str = "Unknown Genre";

const ALBUM_ART_ROOT: &str = "content://media/external/audio/albumart";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrackId(pub i64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TrackId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_id: i64,
    pub genre: Option<String>,
    pub year: Option<String>,
    pub duration_ms: u64,
    pub date_added_epoch_ms: i64,
    pub content_locator: String,
}

impl Track {
    pub fn album_or_default(&self) -> &str {
        self.album.as_deref().unwrap_or(UNKNOWN_ALBUM)
    }

    pub fn genre_or_default(&self) -> &str {
        self.genre.as_deref().unwrap_or(UNKNOWN_GENRE)
    }

    pub fn artwork_uri(&self) -> String {
        format!("{ALBUM_ART_ROOT}/{}", self.album_id)
    }

    pub fn last_song_details(&self) -> LastSongDetails {
        LastSongDetails {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album_or_default().to_string(),
            album_id: self.album_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    #[default]
    All,
    One,
    Shuffle,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            Self::All => Self::One,
            Self::One => Self::Shuffle,
            Self::Shuffle => Self::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::All => "Repeat All",
            Self::One => "Repeat One",
            Self::Shuffle => "Shuffle",
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            Self::All => 0,
            Self::One => 1,
            Self::Shuffle => 2,
        }
    }

    pub fn from_ordinal(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::All),
            1 => Some(Self::One),
            2 => Some(Self::Shuffle),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "one" => Some(Self::One),
            "shuffle" => Some(Self::Shuffle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    NameAsc,
    NameDesc,
    DateAddedAsc,
    DateAddedDesc,
    Duration,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "NameAsc" | "NAME_ASC" => Some(Self::NameAsc),
            "NameDesc" | "NAME_DESC" => Some(Self::NameDesc),
            "DateAddedAsc" | "DATE_ADDED_ASC" => Some(Self::DateAddedAsc),
            "DateAddedDesc" | "DATE_ADDED_DESC" => Some(Self::DateAddedDesc),
            "Duration" | "DURATION" => Some(Self::Duration),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::NameAsc => "NameAsc",
            Self::NameDesc => "NameDesc",
            Self::DateAddedAsc => "DateAddedAsc",
            Self::DateAddedDesc => "DateAddedDesc",
            Self::Duration => "Duration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortCategory {
    Songs,
    Artists,
    Albums,
    Genres,
}

impl SortCategory {
    pub fn key(self) -> &'static str {
        match self {
            Self::Songs => "songs",
            Self::Artists => "artists",
            Self::Albums => "albums",
            Self::Genres => "genres",
        }
    }

    pub fn default_order(self) -> SortOrder {
        match self {
            Self::Songs => SortOrder::DateAddedDesc,
            Self::Artists | Self::Albums | Self::Genres => SortOrder::NameAsc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub track_ids: Vec<TrackId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSongDetails {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub current_order: Vec<TrackId>,
    pub original_order: Vec<TrackId>,
    pub position: usize,
    pub repeat_mode: RepeatMode,
    pub last_seek_position_ms: u64,
    pub current_track: Option<TrackId>,
}
