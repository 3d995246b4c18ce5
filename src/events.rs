use crate::model::{PlaybackState, RepeatMode, TrackId};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreEvent {
    QueueChanged {
        length: usize,
        position: usize,
    },

    TrackChanged {
        track_id: Option<TrackId>,
        previous_track_id: Option<TrackId>,
    },

    PlaybackStateChanged {
        state: PlaybackState,
    },

    RepeatModeChanged {
        mode: RepeatMode,
    },

    LibraryRefreshed {
        generation: u64,
        track_count: usize,
    },

    LibraryUnavailable {
        reason: String,
    },

    FavoritesChanged {
        track_id: TrackId,
        favorite: bool,
    },

    RecentChanged {
        length: usize,
    },

    PlaylistsChanged,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<CoreEvent>>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, event: CoreEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
