//! History and Favorites ledgers.
//!
//! Both are ordered newest-first and unique by station uuid.  Every mutation
//! rewrites the affected key in the backing store; a failed write is logged
//! and the in-memory change stands.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::Station;
use crate::store::{self, KeyValueStore, FAVORITES_KEY, HISTORY_KEY};

/// Maximum number of History entries kept.
pub const HISTORY_LIMIT: usize = 50;

pub struct Ledger {
    history: Vec<Station>,
    favorites: Vec<Station>,
    history_limit: usize,
    store: Arc<dyn KeyValueStore>,
}

impl Ledger {
    /// Load both ledgers from `store`.  Called once at startup.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let history = store::load_list(store.as_ref(), HISTORY_KEY);
        let favorites = store::load_list(store.as_ref(), FAVORITES_KEY);
        debug!(
            "ledger: loaded {} history, {} favorites",
            history.len(),
            favorites.len()
        );
        Self {
            history,
            favorites,
            history_limit: HISTORY_LIMIT,
            store,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self.history.truncate(self.history_limit);
        self
    }

    pub fn history(&self) -> &[Station] {
        &self.history
    }

    pub fn favorites(&self) -> &[Station] {
        &self.favorites
    }

    pub fn is_favorite(&self, uuid: &str) -> bool {
        self.favorites.iter().any(|s| s.uuid == uuid)
    }

    /// Look a station up in either ledger.
    pub fn find(&self, uuid: &str) -> Option<&Station> {
        self.history
            .iter()
            .chain(self.favorites.iter())
            .find(|s| s.uuid == uuid)
    }

    /// Move `station` to the front of History, dropping the oldest entries
    /// beyond the limit.
    pub fn record_play(&mut self, station: &Station) {
        self.history.retain(|s| s.uuid != station.uuid);
        self.history.insert(0, station.clone());
        self.history.truncate(self.history_limit);
        self.persist(HISTORY_KEY, &self.history);
    }

    /// Remove `station` from Favorites if present, otherwise prepend it.
    /// Returns whether the station is a favorite afterwards.
    pub fn toggle_favorite(&mut self, station: &Station) -> bool {
        let before = self.favorites.len();
        self.favorites.retain(|s| s.uuid != station.uuid);
        let now_favorite = self.favorites.len() == before;
        if now_favorite {
            self.favorites.insert(0, station.clone());
        }
        self.persist(FAVORITES_KEY, &self.favorites);
        now_favorite
    }

    fn persist(&self, key: &str, items: &[Station]) {
        if let Err(e) = store::save_list(self.store.as_ref(), key, items) {
            warn!("ledger: failed to persist '{}': {}", key, e);
        }
    }
}
