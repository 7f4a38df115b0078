use crate::protocol::{PlaybackStatus, PlayerState, Station};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Snapshot of the History and Favorites ledgers, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Library {
    pub history: Vec<Station>,
    pub favorites: Vec<Station>,
}

#[derive(Debug, Default)]
struct Shared {
    player: PlayerState,
    stations: Vec<Station>,
    library: Library,
}

/// Read-mostly view of the player shared with the HTTP layer.
///
/// Only the player core writes the `PlayerState` part; every write bumps
/// `rev`.
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<Shared>>,
}

impl StateManager {
    pub fn new(volume: f32) -> Self {
        let mut player = PlayerState {
            rev: 1,
            ..PlayerState::default()
        };
        if volume.is_finite() {
            player.volume = volume.clamp(0.0, 1.0);
        }
        Self {
            state: Arc::new(RwLock::new(Shared {
                player,
                ..Shared::default()
            })),
        }
    }

    pub async fn get_state(&self) -> PlayerState {
        self.state.read().await.player.clone()
    }

    // ── catalog ───────────────────────────────────────────────────────────────

    pub async fn stations(&self) -> Vec<Station> {
        self.state.read().await.stations.clone()
    }

    pub async fn set_stations(&self, stations: Vec<Station>) {
        self.state.write().await.stations = stations;
    }

    pub async fn find_station(&self, uuid: &str) -> Option<Station> {
        let state = self.state.read().await;
        state
            .stations
            .iter()
            .chain(state.library.history.iter())
            .chain(state.library.favorites.iter())
            .find(|s| s.uuid == uuid)
            .cloned()
    }

    // ── library ───────────────────────────────────────────────────────────────

    pub async fn library(&self) -> Library {
        self.state.read().await.library.clone()
    }

    pub async fn set_library(&self, library: Library) {
        self.state.write().await.library = library;
    }

    // ── player ────────────────────────────────────────────────────────────────

    /// A new session started for `station`.
    pub async fn select(&self, station: Station) {
        let mut state = self.state.write().await;
        state.player.station = Some(station);
        apply_status(&mut state.player, PlaybackStatus::Loading);
        state.player.rev += 1;
    }

    pub async fn set_status(&self, status: PlaybackStatus) {
        let mut state = self.state.write().await;
        apply_status(&mut state.player, status);
        state.player.rev += 1;
    }

    /// Non-finite values are ignored.
    pub async fn set_volume(&self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        let mut state = self.state.write().await;
        state.player.volume = volume.clamp(0.0, 1.0);
        state.player.rev += 1;
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        state.player.station = None;
        apply_status(&mut state.player, PlaybackStatus::Idle);
        state.player.rev += 1;
    }
}

/// Derive the legacy boolean flags from the status.
fn apply_status(player: &mut PlayerState, status: PlaybackStatus) {
    player.status = status;
    player.is_loading = status == PlaybackStatus::Loading;
    player.is_playing = player.station.is_some()
        && matches!(status, PlaybackStatus::Loading | PlaybackStatus::Playing);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(uuid: &str) -> Station {
        Station {
            uuid: uuid.into(),
            name: uuid.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_status_drives_flags_and_rev() {
        let manager = StateManager::new(0.5);
        let initial = manager.get_state().await;
        assert_eq!(initial.status, PlaybackStatus::Idle);
        assert!(!initial.is_playing);

        manager.select(station("a")).await;
        let loading = manager.get_state().await;
        assert!(loading.is_playing && loading.is_loading);
        assert!(loading.rev > initial.rev);

        manager.set_status(PlaybackStatus::Paused).await;
        let paused = manager.get_state().await;
        assert!(!paused.is_playing && !paused.is_loading);
        assert_eq!(paused.station.map(|s| s.uuid), Some("a".to_string()));

        manager.stop().await;
        let idle = manager.get_state().await;
        assert!(idle.station.is_none());
        assert_eq!(idle.status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_errored_clears_flags() {
        let manager = StateManager::new(0.8);
        manager.select(station("a")).await;
        manager.set_status(PlaybackStatus::Errored).await;
        let state = manager.get_state().await;
        assert!(!state.is_playing);
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_volume_clamped() {
        let manager = StateManager::new(4.0);
        assert_eq!(manager.get_state().await.volume, 1.0);
        manager.set_volume(-1.0).await;
        assert_eq!(manager.get_state().await.volume, 0.0);
    }

    #[tokio::test]
    async fn test_non_finite_volume_ignored() {
        let manager = StateManager::new(f32::NAN);
        assert_eq!(manager.get_state().await.volume, 0.8);
        manager.set_volume(0.3).await;
        let rev = manager.get_state().await.rev;
        manager.set_volume(f32::NAN).await;
        manager.set_volume(f32::INFINITY).await;
        let state = manager.get_state().await;
        assert_eq!(state.volume, 0.3);
        assert_eq!(state.rev, rev);
    }

    #[tokio::test]
    async fn test_find_station_searches_library_too() {
        let manager = StateManager::new(0.8);
        manager.set_stations(vec![station("cat")]).await;
        manager
            .set_library(Library {
                history: vec![station("hist")],
                favorites: vec![station("fav")],
            })
            .await;
        assert!(manager.find_station("cat").await.is_some());
        assert!(manager.find_station("hist").await.is_some());
        assert!(manager.find_station("fav").await.is_some());
        assert!(manager.find_station("none").await.is_none());
    }
}
