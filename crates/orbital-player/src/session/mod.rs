//! Playback sessions.
//!
//! A session binds one station to one transport kind for as long as it is
//! live.  Everything a session (or the sink and transport it drives) wants to
//! tell the controller travels as a [`SessionEvent`] tagged with the
//! session's id, so callbacks from a replaced session are recognisable and
//! dropped.

mod adaptive;
mod progressive;

pub use adaptive::{
    AdaptiveSession, FaultClass, SegmentedTransport, TransportFactory, TransportFault,
};
pub use progressive::ProgressiveSession;

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::selector::TransportKind;
use crate::sink::AudioSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// Segmented transport resolved the playlist to play.
    ManifestReady { media_url: String },
    /// Sink began fetching the source.
    LoadStart,
    /// Sink has enough data to produce audio.
    FirstData,
    /// `play()` was refused.
    PlayRejected(String),
    TransportFault(TransportFault),
    /// Sink failed to decode or fetch the source.
    MediaError(String),
}

/// Sender half handed to sinks and transports.  Every event it sends carries
/// the id of the session it was created for.
#[derive(Clone)]
pub struct SessionNotifier {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionNotifier {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn notify(&self, kind: SessionEventKind) {
        if self
            .tx
            .send(SessionEvent {
                session: self.session,
                kind,
            })
            .is_err()
        {
            debug!("session {}: controller gone, event dropped", self.session);
        }
    }
}

impl fmt::Debug for SessionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionNotifier")
            .field("session", &self.session)
            .finish()
    }
}

/// What a session did about a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Not fatal; the transport handles it.
    Ignored,
    /// Loading restarted.
    Retrying,
    /// One-shot media recovery attempted.
    Recovering,
    /// The session cannot continue.
    Fatal,
}

/// Ask the sink to play and report a refusal as `PlayRejected`.
///
/// The sink's future is awaited on its own task so the event loop never
/// blocks on it.
pub(crate) fn issue_play(sink: &mut dyn AudioSink, notifier: &SessionNotifier) {
    let pending = sink.play();
    let notifier = notifier.clone();
    tokio::spawn(async move {
        if let Err(e) = pending.await {
            notifier.notify(SessionEventKind::PlayRejected(e.to_string()));
        }
    });
}

/// The live session, whichever transport it uses.
pub enum Session {
    Adaptive(AdaptiveSession),
    Progressive(ProgressiveSession),
}

impl Session {
    pub fn id(&self) -> SessionId {
        match self {
            Session::Adaptive(s) => s.id(),
            Session::Progressive(s) => s.id(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Session::Adaptive(_) => TransportKind::Adaptive,
            Session::Progressive(_) => TransportKind::Progressive,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Session::Adaptive(s) => s.url(),
            Session::Progressive(s) => s.url(),
        }
    }

    /// Sink-reported media failure.
    pub fn on_media_error(&mut self) -> FaultOutcome {
        match self {
            Session::Adaptive(s) => s.on_media_fault(),
            Session::Progressive(_) => FaultOutcome::Fatal,
        }
    }

    /// Release everything the session holds.  Idempotent.
    pub fn stop(&mut self, sink: &mut dyn AudioSink) {
        match self {
            Session::Adaptive(s) => s.stop(sink),
            Session::Progressive(s) => s.stop(sink),
        }
    }
}
