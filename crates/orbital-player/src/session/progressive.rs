use tracing::info;

use super::{issue_play, SessionId, SessionNotifier};
use crate::sink::AudioSink;

/// A continuous stream played directly by the sink.  No retries: any media
/// error ends the session.
pub struct ProgressiveSession {
    id: SessionId,
    url: String,
    stopped: bool,
}

impl ProgressiveSession {
    pub fn start(url: &str, sink: &mut dyn AudioSink, notifier: SessionNotifier, play: bool) -> Self {
        let id = notifier.session();
        info!("session {}: progressive start {}", id, url);
        sink.attach(notifier.clone());
        sink.set_source(url);
        sink.load();
        if play {
            issue_play(sink, &notifier);
        }
        Self {
            id,
            url: url.to_string(),
            stopped: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stop(&mut self, sink: &mut dyn AudioSink) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("session {}: progressive stop", self.id);
        sink.detach();
    }
}
