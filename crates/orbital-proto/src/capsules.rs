//! Message capsules: short notes pinned to a point on the globe.
//!
//! A persisted list with publish/subscribe.  Subscribers get the full list,
//! starting with the current one on subscription.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::store::{self, KeyValueStore, CAPSULES_KEY};

/// Longest message accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 280;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageCapsule {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub message: String,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Error, Debug, PartialEq)]
pub enum CapsuleError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message longer than {} characters", MAX_MESSAGE_CHARS)]
    MessageTooLong,

    #[error("Coordinates out of range: {lat}, {lng}")]
    OutOfRange { lat: f64, lng: f64 },
}

pub struct CapsuleBoard {
    capsules: Mutex<Vec<MessageCapsule>>,
    store: Arc<dyn KeyValueStore>,
    tx: watch::Sender<Arc<Vec<MessageCapsule>>>,
}

impl CapsuleBoard {
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let capsules: Vec<MessageCapsule> = store::load_list(store.as_ref(), CAPSULES_KEY);
        let (tx, _) = watch::channel(Arc::new(capsules.clone()));
        Self {
            capsules: Mutex::new(capsules),
            store,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<MessageCapsule>>> {
        self.tx.subscribe()
    }

    pub fn list(&self) -> Vec<MessageCapsule> {
        self.lock().clone()
    }

    pub fn add(
        &self,
        lat: f64,
        lng: f64,
        message: &str,
        author: Option<&str>,
    ) -> Result<MessageCapsule, CapsuleError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(CapsuleError::EmptyMessage);
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(CapsuleError::MessageTooLong);
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(CapsuleError::OutOfRange { lat, lng });
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let author = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or("Anonymous")
            .to_string();

        let (capsule, snapshot) = {
            let mut capsules = self.lock();
            let capsule = MessageCapsule {
                id: unique_id(&capsules, timestamp),
                lat,
                lng,
                message: message.to_string(),
                timestamp,
                author: Some(author),
            };
            capsules.push(capsule.clone());
            (capsule, capsules.clone())
        };

        info!("capsules: dropped {} at {:.2},{:.2}", capsule.id, lat, lng);
        if let Err(e) = store::save_list(self.store.as_ref(), CAPSULES_KEY, &snapshot) {
            warn!("capsules: failed to persist: {}", e);
        }
        self.tx.send_replace(Arc::new(snapshot));
        Ok(capsule)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MessageCapsule>> {
        self.capsules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Millisecond timestamp ids, suffixed when two capsules land in the same ms.
fn unique_id(existing: &[MessageCapsule], timestamp: i64) -> String {
    let taken = |id: &str| existing.iter().any(|c| c.id == id);
    let base = timestamp.to_string();
    let mut candidate = base.clone();
    let mut n = 0;
    while taken(&candidate) {
        n += 1;
        candidate = format!("{base}-{n}");
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_add_validates_input() {
        let board = CapsuleBoard::open(Arc::new(MemoryStore::new()));
        assert_eq!(
            board.add(0.0, 0.0, "   ", None),
            Err(CapsuleError::EmptyMessage)
        );
        assert_eq!(
            board.add(91.0, 0.0, "hi", None),
            Err(CapsuleError::OutOfRange { lat: 91.0, lng: 0.0 })
        );
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(
            board.add(0.0, 0.0, &long, None),
            Err(CapsuleError::MessageTooLong)
        );
        assert!(board.list().is_empty());
    }

    #[test]
    fn test_add_persists_and_reloads() {
        let store = Arc::new(MemoryStore::new());
        let board = CapsuleBoard::open(store.clone());
        let first = board
            .add(35.6762, 139.6503, " Midnight Tokyo vibes ", Some("CyberPunk"))
            .unwrap();
        let second = board.add(40.7128, -74.006, "Hello from NYC!", None).unwrap();
        assert_eq!(first.message, "Midnight Tokyo vibes");
        assert_eq!(second.author.as_deref(), Some("Anonymous"));
        assert_ne!(first.id, second.id);

        let reopened = CapsuleBoard::open(store);
        assert_eq!(reopened.list(), vec![first, second]);
    }

    #[test]
    fn test_subscribers_see_current_and_new_lists() {
        let board = CapsuleBoard::open(Arc::new(MemoryStore::new()));
        board.add(48.85, 2.35, "Paris", None).unwrap();

        let mut rx = board.subscribe();
        assert_eq!(rx.borrow_and_update().len(), 1);

        board.add(1.0, 1.0, "second", None).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 2);
    }

    #[test]
    fn test_unique_id_suffixes_collisions() {
        let existing = vec![MessageCapsule {
            id: "42".into(),
            lat: 0.0,
            lng: 0.0,
            message: "m".into(),
            timestamp: 42,
            author: None,
        }];
        assert_eq!(unique_id(&existing, 42), "42-1");
        assert_eq!(unique_id(&existing, 43), "43");
    }
}
