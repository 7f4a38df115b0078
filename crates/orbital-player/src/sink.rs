//! Audio output contract.

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::session::SessionNotifier;

/// Why a `play()` request did not start audio.  Always non-fatal: the
/// controller moves to `Paused` and the user may try again.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackRejected {
    #[error("Playback blocked: {0}")]
    Blocked(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Resolves once the sink has accepted (or refused) a play request.
pub type PlayFuture = BoxFuture<'static, Result<(), PlaybackRejected>>;

/// The single audio output owned by the controller and lent to one session
/// at a time.
///
/// Calls are issued from the controller's event loop and must not block.
/// While attached, the sink reports `LoadStart`, `FirstData` and
/// `MediaError` through the notifier.
pub trait AudioSink: Send {
    fn attach(&mut self, notifier: SessionNotifier);

    /// Drop the notifier and release the current source.
    fn detach(&mut self);

    fn set_source(&mut self, url: &str);

    fn load(&mut self);

    fn play(&mut self) -> PlayFuture;

    fn pause(&mut self);

    /// `volume` is already clamped to `[0, 1]`.
    fn set_volume(&mut self, volume: f32);
}
