use crate::model::{QueueSnapshot, RepeatMode, TrackId};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStep {
    Moved { position: usize, track_id: TrackId },
    NoCurrentTrack,
}

impl QueueStep {
    pub fn track_id(self) -> Option<TrackId> {
        match self {
            Self::Moved { track_id, .. } => Some(track_id),
            Self::NoCurrentTrack => None,
        }
    }
}

/// `original_order` is always a permutation of `current_order`. Outside of
/// `RepeatMode::Shuffle` the two are identical.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    current_order: Vec<TrackId>,
    original_order: Vec<TrackId>,
    position: usize,
    repeat_mode: RepeatMode,
    mode_before_shuffle: RepeatMode,
    last_seek_position_ms: u64,
    rng: SmallRng,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::with_rng(rand::make_rng::<SmallRng>())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            current_order: Vec::new(),
            original_order: Vec::new(),
            position: 0,
            repeat_mode: RepeatMode::All,
            mode_before_shuffle: RepeatMode::All,
            last_seek_position_ms: 0,
            rng,
        }
    }

    pub fn restore(
        &mut self,
        mut current: Vec<TrackId>,
        mut original: Vec<TrackId>,
        position: usize,
        repeat_mode: RepeatMode,
        last_seek_position_ms: u64,
    ) {
        if current.is_empty() {
            current = original.clone();
        }
        if original.is_empty() {
            original = current.clone();
        }
        if !is_permutation(&current, &original) {
            debug!("stored queue orders disagree, rebuilding the current order");
            current = if repeat_mode == RepeatMode::Shuffle {
                rebuild_order(&current, &original)
            } else {
                original.clone()
            };
        }
        if repeat_mode != RepeatMode::Shuffle && current != original {
            original = current.clone();
        }

        self.position = position.min(current.len().saturating_sub(1));
        self.current_order = current;
        self.original_order = original;
        self.repeat_mode = repeat_mode;
        self.mode_before_shuffle = RepeatMode::All;
        self.last_seek_position_ms = last_seek_position_ms;
    }

    pub fn start_playback(&mut self, track_ids: &[TrackId], start_index: usize) -> QueueStep {
        if track_ids.is_empty() {
            return QueueStep::NoCurrentTrack;
        }

        let start = start_index.min(track_ids.len() - 1);
        self.original_order = track_ids.to_vec();
        self.current_order = if self.repeat_mode == RepeatMode::Shuffle {
            self.shuffled_order(start, start)
        } else {
            self.original_order.clone()
        };
        self.position = start;
        self.last_seek_position_ms = 0;
        self.current()
    }

    pub fn shuffle_play(&mut self, track_ids: &[TrackId]) -> QueueStep {
        if track_ids.is_empty() {
            return QueueStep::NoCurrentTrack;
        }

        let mut starts: Vec<usize> = (0..track_ids.len()).collect();
        starts.shuffle(&mut self.rng);
        if self.repeat_mode != RepeatMode::Shuffle {
            self.mode_before_shuffle = self.repeat_mode;
            self.repeat_mode = RepeatMode::Shuffle;
        }
        self.start_playback(track_ids, starts[0])
    }

    pub fn next(&mut self) -> QueueStep {
        let len = self.current_order.len();
        if len == 0 {
            return QueueStep::NoCurrentTrack;
        }
        self.position = (self.position + 1) % len;
        self.last_seek_position_ms = 0;
        self.current()
    }

    pub fn previous(&mut self) -> QueueStep {
        let len = self.current_order.len();
        if len == 0 {
            return QueueStep::NoCurrentTrack;
        }
        self.position = if self.position == 0 {
            len - 1
        } else {
            self.position - 1
        };
        self.last_seek_position_ms = 0;
        self.current()
    }

    pub fn track_finished(&mut self) -> QueueStep {
        if self.repeat_mode == RepeatMode::One && !self.current_order.is_empty() {
            self.last_seek_position_ms = 0;
            return self.current();
        }
        self.next()
    }

    pub fn skip_to(&mut self, position: usize) -> QueueStep {
        if position < self.current_order.len() {
            self.position = position;
            self.last_seek_position_ms = 0;
        }
        self.current()
    }

    pub fn toggle_shuffle(&mut self) -> QueueStep {
        if self.current_order.is_empty() {
            return QueueStep::NoCurrentTrack;
        }
        let target = if self.repeat_mode == RepeatMode::Shuffle {
            self.mode_before_shuffle
        } else {
            RepeatMode::Shuffle
        };
        self.set_repeat_mode(target);
        self.current()
    }

    pub fn toggle_repeat(&mut self) -> RepeatMode {
        let next = self.repeat_mode.next();
        self.set_repeat_mode(next);
        next
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        let previous = self.repeat_mode;
        if previous == mode {
            return;
        }

        if mode == RepeatMode::Shuffle {
            self.mode_before_shuffle = previous;
            if let Some(pinned) = self.original_index_of(self.position) {
                self.current_order = self.shuffled_order(pinned, self.position);
            }
        } else if previous == RepeatMode::Shuffle {
            let pinned = self.original_index_of(self.position);
            self.current_order = self.original_order.clone();
            if let Some(index) = pinned {
                self.position = index;
            }
        }
        self.repeat_mode = mode;
    }

    pub fn seek_to(&mut self, position_ms: u64) {
        self.last_seek_position_ms = position_ms;
    }

    pub fn clear(&mut self) {
        self.current_order.clear();
        self.original_order.clear();
        self.position = 0;
        self.last_seek_position_ms = 0;
    }

    pub fn retain(&mut self, keep: impl Fn(TrackId) -> bool) -> usize {
        let before = self.current_order.len();
        let mut removed_before_position = 0;
        let mut kept = Vec::with_capacity(before);
        for (idx, id) in self.current_order.iter().enumerate() {
            if keep(*id) {
                kept.push(*id);
            } else if idx < self.position {
                removed_before_position += 1;
            }
        }

        self.current_order = kept;
        self.original_order.retain(|id| keep(*id));
        self.position = self
            .position
            .saturating_sub(removed_before_position)
            .min(self.current_order.len().saturating_sub(1));
        if self.current_order.is_empty() {
            self.last_seek_position_ms = 0;
        }
        before - self.current_order.len()
    }

    pub fn current(&self) -> QueueStep {
        match self.current_order.get(self.position) {
            Some(track_id) => QueueStep::Moved {
                position: self.position,
                track_id: *track_id,
            },
            None => QueueStep::NoCurrentTrack,
        }
    }

    pub fn current_track(&self) -> Option<TrackId> {
        self.current().track_id()
    }

    pub fn current_order(&self) -> &[TrackId] {
        &self.current_order
    }

    pub fn original_order(&self) -> &[TrackId] {
        &self.original_order
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn is_shuffled(&self) -> bool {
        self.repeat_mode == RepeatMode::Shuffle
    }

    pub fn last_seek_position_ms(&self) -> u64 {
        self.last_seek_position_ms
    }

    pub fn len(&self) -> usize {
        self.current_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current_order.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current_order: self.current_order.clone(),
            original_order: self.original_order.clone(),
            position: self.position,
            repeat_mode: self.repeat_mode,
            last_seek_position_ms: self.last_seek_position_ms,
            current_track: self.current_track(),
        }
    }

    fn shuffled_order(&mut self, pinned: usize, at: usize) -> Vec<TrackId> {
        let mut rest: Vec<usize> = (0..self.original_order.len())
            .filter(|idx| *idx != pinned)
            .collect();
        rest.shuffle(&mut self.rng);
        rest.insert(at.min(rest.len()), pinned);
        rest.into_iter().map(|idx| self.original_order[idx]).collect()
    }

    /// Maps a slot of the current order to the matching slot of the original
    /// order. Repeated ids pair up by occurrence count.
    fn original_index_of(&self, position: usize) -> Option<usize> {
        let id = *self.current_order.get(position)?;
        let occurrence = self.current_order[..position]
            .iter()
            .filter(|other| **other == id)
            .count();
        self.original_order
            .iter()
            .enumerate()
            .filter(|(_, other)| **other == id)
            .nth(occurrence)
            .map(|(idx, _)| idx)
    }
}

/// Keeps the entries of `current` that `original` accounts for, in their
/// order, then appends whatever of `original` is left over.
fn rebuild_order(current: &[TrackId], original: &[TrackId]) -> Vec<TrackId> {
    let mut unused: HashMap<TrackId, usize> = HashMap::new();
    for id in original {
        *unused.entry(*id).or_default() += 1;
    }

    let mut rebuilt = Vec::with_capacity(original.len());
    for id in current {
        if let Some(count) = unused.get_mut(id).filter(|count| **count > 0) {
            *count -= 1;
            rebuilt.push(*id);
        }
    }
    for id in original {
        if let Some(count) = unused.get_mut(id).filter(|count| **count > 0) {
            *count -= 1;
            rebuilt.push(*id);
        }
    }
    rebuilt
}

fn is_permutation(a: &[TrackId], b: &[TrackId]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left = a.to_vec();
    let mut right = b.to_vec();
    left.sort_unstable();
    right.sort_unstable();
    left == right
}
