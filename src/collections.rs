use crate::model::{Playlist, TrackId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const RECENT_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FavoritesSet {
    ids: BTreeSet<TrackId>,
}

impl FavoritesSet {
    pub fn from_ids(ids: impl IntoIterator<Item = TrackId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn add(&mut self, id: TrackId) -> bool {
        self.ids.insert(id)
    }

    pub fn remove(&mut self, id: TrackId) -> bool {
        self.ids.remove(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.ids.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentList {
    ids: Vec<TrackId>,
    limit: usize,
}

impl Default for RecentList {
    fn default() -> Self {
        Self::with_limit(RECENT_LIMIT)
    }
}

impl RecentList {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            ids: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn from_ids(ids: impl IntoIterator<Item = TrackId>, limit: usize) -> Self {
        let mut list = Self::with_limit(limit);
        for id in ids {
            if !list.ids.contains(&id) {
                list.ids.push(id);
            }
        }
        list.ids.truncate(list.limit);
        list
    }

    pub fn add(&mut self, id: TrackId) {
        self.ids.retain(|existing| *existing != id);
        self.ids.insert(0, id);
        self.ids.truncate(self.limit);
    }

    pub fn remove(&mut self, id: TrackId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|existing| *existing != id);
        before != self.ids.len()
    }

    pub fn ids(&self) -> &[TrackId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlists {
    items: Vec<Playlist>,
}

impl Playlists {
    pub fn from_vec(items: Vec<Playlist>) -> Self {
        Self { items }
    }

    pub fn as_slice(&self) -> &[Playlist] {
        &self.items
    }

    pub fn create(&mut self, name: &str) -> u64 {
        let id = self.items.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        self.items.push(Playlist {
            id,
            name: name.trim().to_string(),
            track_ids: Vec::new(),
        });
        id
    }

    pub fn rename(&mut self, id: u64, name: &str) -> bool {
        match self.get_mut(id) {
            Some(playlist) => {
                playlist.name = name.trim().to_string();
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|p| p.id != id);
        before != self.items.len()
    }

    pub fn add_track(&mut self, id: u64, track_id: TrackId) -> bool {
        match self.get_mut(id) {
            Some(playlist) => {
                playlist.track_ids.push(track_id);
                true
            }
            None => false,
        }
    }

    /// Removes the first occurrence only.
    pub fn remove_track(&mut self, id: u64, track_id: TrackId) -> bool {
        let Some(playlist) = self.get_mut(id) else {
            return false;
        };
        match playlist.track_ids.iter().position(|t| *t == track_id) {
            Some(idx) => {
                playlist.track_ids.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u64) -> Option<&Playlist> {
        self.items.iter().find(|p| p.id == id)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut Playlist> {
        self.items.iter_mut().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_moves_repeats_to_front() {
        let mut recent = RecentList::default();
        for id in [5, 7, 5, 9] {
            recent.add(TrackId(id));
        }
        assert_eq!(recent.ids(), &[TrackId(9), TrackId(5), TrackId(7)]);
    }

    #[test]
    fn recent_is_bounded() {
        let mut recent = RecentList::default();
        for id in 0..80 {
            recent.add(TrackId(id));
        }
        assert_eq!(recent.len(), RECENT_LIMIT);
        assert_eq!(recent.ids()[0], TrackId(79));
        assert_eq!(recent.ids()[RECENT_LIMIT - 1], TrackId(30));
    }

    #[test]
    fn recent_from_ids_drops_duplicates_and_overflow() {
        let recent = RecentList::from_ids([1, 2, 1, 3, 4].map(TrackId), 3);
        assert_eq!(recent.ids(), &[TrackId(1), TrackId(2), TrackId(3)]);
    }

    #[test]
    fn favorites_report_changes() {
        let mut favorites = FavoritesSet::default();
        assert!(favorites.add(TrackId(3)));
        assert!(!favorites.add(TrackId(3)));
        assert!(favorites.contains(TrackId(3)));
        assert!(favorites.remove(TrackId(3)));
        assert!(!favorites.remove(TrackId(3)));
        assert!(favorites.is_empty());
    }

    #[test]
    fn playlist_lifecycle() {
        let mut playlists = Playlists::default();
        let road = playlists.create(" Road Trip ");
        let gym = playlists.create("Gym");
        assert_eq!((road, gym), (1, 2));
        assert_eq!(playlists.get(road).map(|p| p.name.as_str()), Some("Road Trip"));

        assert!(playlists.add_track(road, TrackId(4)));
        assert!(playlists.add_track(road, TrackId(8)));
        assert!(playlists.add_track(road, TrackId(4)));
        assert!(playlists.remove_track(road, TrackId(4)));
        assert_eq!(
            playlists.get(road).map(|p| p.track_ids.clone()),
            Some(vec![TrackId(8), TrackId(4)])
        );

        assert!(playlists.rename(gym, "Lifting"));
        assert!(playlists.delete(road));
        assert!(!playlists.delete(road));
        assert!(!playlists.add_track(road, TrackId(1)));
        assert_eq!(playlists.create("Next"), 3);
    }
}
