pub mod ai;
pub mod catalog;
pub mod core;
pub mod hls;
pub mod mpv;
pub mod selector;
pub mod session;
pub mod sink;

use orbital_proto::protocol::{Coordinates, PlaybackStatus};

/// Messages broadcast by the player core to every listener.
///
/// State payloads are not carried: listeners read the current snapshot from
/// the shared `StateManager`.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastMessage {
    /// Player state changed; re-read the snapshot.
    StateUpdated,
    /// Normalized status changed.
    Status(PlaybackStatus),
    /// A station was selected; the globe should turn towards it.
    Focus(Coordinates),
    /// History or Favorites changed.
    LibraryUpdated,
}
