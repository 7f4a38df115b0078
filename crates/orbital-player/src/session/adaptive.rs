use thiserror::Error;
use tracing::{debug, info, warn};

use super::{issue_play, FaultOutcome, SessionId, SessionNotifier};
use crate::sink::AudioSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Network,
    Media,
    Other,
}

/// A fault raised by a segmented transport.  Non-fatal faults are
/// informational: the transport is already dealing with them.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{class:?} fault (fatal: {fatal}): {detail}")]
pub struct TransportFault {
    pub class: FaultClass,
    pub fatal: bool,
    pub detail: String,
}

impl TransportFault {
    pub fn fatal(class: FaultClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            fatal: true,
            detail: detail.into(),
        }
    }

    pub fn transient(class: FaultClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            fatal: false,
            detail: detail.into(),
        }
    }
}

/// Fetches and follows a segmented playlist for one session.
///
/// Results are reported through the notifier the transport was created
/// with: `ManifestReady` once a media playlist is known, `TransportFault`
/// otherwise.
pub trait SegmentedTransport: Send {
    fn load_source(&mut self, url: &str);
    fn start_load(&mut self);
    fn recover_media_error(&mut self);
    /// Abort in-flight loads and release buffers.  Idempotent.
    fn destroy(&mut self);
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, notifier: SessionNotifier) -> Box<dyn SegmentedTransport>;

    /// `false` when the sink should be given HLS addresses directly.
    fn is_supported(&self) -> bool {
        true
    }
}

pub struct AdaptiveSession {
    id: SessionId,
    url: String,
    notifier: SessionNotifier,
    transport: Box<dyn SegmentedTransport>,
    media_recovery_used: bool,
    stopped: bool,
}

impl AdaptiveSession {
    pub fn start(
        url: &str,
        sink: &mut dyn AudioSink,
        transports: &dyn TransportFactory,
        notifier: SessionNotifier,
    ) -> Self {
        let id = notifier.session();
        info!("session {}: adaptive start {}", id, url);
        sink.attach(notifier.clone());
        let mut transport = transports.create(notifier.clone());
        transport.load_source(url);
        Self {
            id,
            url: url.to_string(),
            notifier,
            transport,
            media_recovery_used: false,
            stopped: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Point the sink at the media playlist and start it if wanted.
    pub fn on_manifest_ready(&mut self, media_url: &str, sink: &mut dyn AudioSink, play: bool) {
        if self.stopped {
            return;
        }
        debug!("session {}: manifest ready -> {}", self.id, media_url);
        sink.set_source(media_url);
        sink.load();
        if play {
            issue_play(sink, &self.notifier);
        }
    }

    pub fn on_transport_fault(&mut self, fault: &TransportFault) -> FaultOutcome {
        if self.stopped {
            return FaultOutcome::Ignored;
        }
        if !fault.fatal {
            debug!("session {}: transient {}", self.id, fault);
            return FaultOutcome::Ignored;
        }
        match fault.class {
            FaultClass::Network => {
                warn!("session {}: network fault, reloading: {}", self.id, fault.detail);
                self.transport.start_load();
                FaultOutcome::Retrying
            }
            FaultClass::Media => self.on_media_fault(),
            FaultClass::Other => {
                warn!("session {}: unrecoverable: {}", self.id, fault.detail);
                FaultOutcome::Fatal
            }
        }
    }

    /// Media faults get exactly one recovery attempt per session.
    pub fn on_media_fault(&mut self) -> FaultOutcome {
        if self.stopped {
            return FaultOutcome::Ignored;
        }
        if self.media_recovery_used {
            warn!("session {}: media fault after recovery", self.id);
            return FaultOutcome::Fatal;
        }
        self.media_recovery_used = true;
        warn!("session {}: media fault, recovering", self.id);
        self.transport.recover_media_error();
        FaultOutcome::Recovering
    }

    pub fn stop(&mut self, sink: &mut dyn AudioSink) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("session {}: adaptive stop", self.id);
        self.transport.destroy();
        sink.detach();
    }
}
