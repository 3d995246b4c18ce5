use crate::model::TrackId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("library unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("unknown track id {0}")]
    UnknownTrackId(TrackId),

    #[error("corrupt persisted state in `{field}`: {reason}")]
    CorruptPersistedState { field: String, reason: String },

    #[error("invalid seek position: {0} ms")]
    InvalidSeekPosition(i64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn corrupt(field: &str, reason: impl Into<String>) -> Self {
        Self::CorruptPersistedState {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
