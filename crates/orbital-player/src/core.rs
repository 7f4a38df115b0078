/// PlayerCore: single-owner event loop for playback.
///
/// Owns the audio sink, the live session, the ledger and the user's desired
/// play/pause state.  Control input arrives as `CoreEvent`s; sinks,
/// transports and spawned play tasks report back as `SessionEvent`s tagged
/// with the session they belong to.  Both are consumed by one loop, so every
/// state transition happens in arrival order on a single task.
///
/// After each transition the core updates the shared `StateManager` snapshot
/// and broadcasts a `BroadcastMessage`.
use std::sync::Arc;

use anyhow::anyhow;
use orbital_proto::ledger::Ledger;
use orbital_proto::protocol::{Command, PlaybackIntent, PlaybackStatus, PlayerState, Station};
use orbital_proto::state::{Library, StateManager};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::selector::{classify, TransportKind};
use crate::session::{
    issue_play, AdaptiveSession, FaultOutcome, ProgressiveSession, Session, SessionEvent,
    SessionEventKind, SessionId, SessionNotifier, TransportFactory,
};
use crate::sink::AudioSink;
use crate::BroadcastMessage;

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// Control inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the HTTP API.
    Command(Command),
    /// A resolved playback intent.
    Intent(PlaybackIntent),
    Shutdown,
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore {
    sink: Box<dyn AudioSink>,
    transports: Arc<dyn TransportFactory>,
    session: Option<Session>,
    last_session_id: u64,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ledger: Ledger,
    state_manager: StateManager,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    status: PlaybackStatus,
    /// What the user wants once audio is available.
    intend_playing: bool,
    /// The live session has produced audio at least once.
    has_data: bool,
    volume: f32,
}

impl PlayerCore {
    pub fn new(
        mut sink: Box<dyn AudioSink>,
        transports: Arc<dyn TransportFactory>,
        ledger: Ledger,
        state_manager: StateManager,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        volume: f32,
    ) -> Self {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            PlayerState::default().volume
        };
        sink.set_volume(volume);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        Self {
            sink,
            transports,
            session: None,
            last_session_id: 0,
            session_tx,
            session_rx,
            ledger,
            state_manager,
            broadcast_tx,
            status: PlaybackStatus::Idle,
            intend_playing: false,
            has_data: false,
            volume,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn intend_playing(&self) -> bool {
        self.intend_playing
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(Session::id)
    }

    pub fn session_kind(&self) -> Option<TransportKind> {
        self.session.as_ref().map(Session::kind)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the control channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");
        self.publish_library().await;

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("PlayerCore: event channel closed, shutting down");
                        break;
                    }
                    Some(CoreEvent::Shutdown) => {
                        info!("PlayerCore: shutdown requested");
                        break;
                    }
                    Some(CoreEvent::Command(cmd)) => {
                        info!("PlayerCore: command {:?}", cmd);
                        if let Err(e) = self.handle_command(cmd).await {
                            error!("PlayerCore: command error: {}", e);
                        }
                    }
                    Some(CoreEvent::Intent(intent)) => self.handle_intent(intent).await,
                },
                Some(evt) = self.session_rx.recv() => self.handle_session_event(evt).await,
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Handle every session event already queued, without waiting.
    pub async fn drain_session_events(&mut self) {
        while let Ok(evt) = self.session_rx.try_recv() {
            self.handle_session_event(evt).await;
        }
    }

    // ── intents ───────────────────────────────────────────────────────────────

    pub async fn handle_intent(&mut self, intent: PlaybackIntent) {
        match intent {
            PlaybackIntent::Select(station) => self.select(station).await,
            PlaybackIntent::TogglePause => self.toggle_pause().await,
            PlaybackIntent::SetVolume(volume) => self.set_volume(volume).await,
            PlaybackIntent::Stop => self.stop().await,
        }
    }

    async fn select(&mut self, station: Station) {
        info!("PlayerCore: select '{}' ({})", station.name, station.uuid);
        self.dispose_session();

        self.last_session_id += 1;
        let id = SessionId(self.last_session_id);
        let notifier = SessionNotifier::new(id, self.session_tx.clone());
        self.intend_playing = true;
        self.has_data = false;

        self.ledger.record_play(&station);
        self.publish_library().await;
        if let Some(coordinates) = station.coordinates() {
            let _ = self.broadcast_tx.send(BroadcastMessage::Focus(coordinates));
        }
        self.state_manager.select(station.clone()).await;

        let Some(url) = station.playable_url().map(str::to_string) else {
            warn!("PlayerCore: '{}' has no playable address", station.name);
            self.fail("no playable address").await;
            return;
        };

        let mut kind = classify(&station);
        if kind == TransportKind::Adaptive && !self.transports.is_supported() {
            debug!("PlayerCore: segmented transport unavailable, sink plays HLS natively");
            kind = TransportKind::Progressive;
        }

        let session = match kind {
            TransportKind::Adaptive => Session::Adaptive(AdaptiveSession::start(
                &url,
                self.sink.as_mut(),
                self.transports.as_ref(),
                notifier,
            )),
            TransportKind::Progressive => Session::Progressive(ProgressiveSession::start(
                &url,
                self.sink.as_mut(),
                notifier,
                true,
            )),
        };
        self.session = Some(session);
        self.transition(PlaybackStatus::Loading).await;
    }

    async fn toggle_pause(&mut self) {
        match self.status {
            PlaybackStatus::Playing => {
                self.intend_playing = false;
                self.sink.pause();
                self.transition(PlaybackStatus::Paused).await;
            }
            PlaybackStatus::Paused => {
                let Some(id) = self.session_id() else {
                    debug!("PlayerCore: paused without a session, ignoring toggle");
                    return;
                };
                self.intend_playing = true;
                let notifier = SessionNotifier::new(id, self.session_tx.clone());
                issue_play(self.sink.as_mut(), &notifier);
                let next = if self.has_data {
                    PlaybackStatus::Playing
                } else {
                    PlaybackStatus::Loading
                };
                self.transition(next).await;
            }
            PlaybackStatus::Loading => {
                // Applied when the session produces data
                self.intend_playing = !self.intend_playing;
                debug!(
                    "PlayerCore: toggle while loading, intend_playing={}",
                    self.intend_playing
                );
            }
            PlaybackStatus::Idle | PlaybackStatus::Errored => {
                debug!("PlayerCore: toggle ignored in {:?}", self.status);
            }
        }
    }

    async fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            warn!("PlayerCore: ignoring volume {}", volume);
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.sink.set_volume(self.volume);
        self.state_manager.set_volume(self.volume).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn stop(&mut self) {
        info!("PlayerCore: stopping playback");
        self.dispose_session();
        self.intend_playing = false;
        self.has_data = false;
        self.state_manager.stop().await;
        self.transition(PlaybackStatus::Idle).await;
    }

    // ── session events ────────────────────────────────────────────────────────

    pub async fn handle_session_event(&mut self, evt: SessionEvent) {
        if self.session_id() != Some(evt.session) {
            debug!(
                "PlayerCore: dropping {:?} from stale session {}",
                evt.kind, evt.session
            );
            return;
        }

        match evt.kind {
            SessionEventKind::ManifestReady { media_url } => {
                let play = self.intend_playing;
                if let Some(Session::Adaptive(session)) = self.session.as_mut() {
                    session.on_manifest_ready(&media_url, self.sink.as_mut(), play);
                }
            }
            SessionEventKind::LoadStart => {
                debug!("PlayerCore: session {} loading", evt.session);
            }
            SessionEventKind::FirstData => self.on_first_data().await,
            SessionEventKind::PlayRejected(reason) => self.on_play_rejected(&reason).await,
            SessionEventKind::TransportFault(fault) => {
                let outcome = match self.session.as_mut() {
                    Some(Session::Adaptive(session)) => session.on_transport_fault(&fault),
                    _ => FaultOutcome::Ignored,
                };
                self.apply_fault_outcome(outcome, &fault.detail).await;
            }
            SessionEventKind::MediaError(detail) => {
                let outcome = self
                    .session
                    .as_mut()
                    .map_or(FaultOutcome::Ignored, Session::on_media_error);
                self.apply_fault_outcome(outcome, &detail).await;
            }
        }
    }

    async fn on_first_data(&mut self) {
        self.has_data = true;
        if self.status != PlaybackStatus::Loading {
            return;
        }
        if self.intend_playing {
            self.transition(PlaybackStatus::Playing).await;
        } else {
            self.sink.pause();
            self.transition(PlaybackStatus::Paused).await;
        }
    }

    async fn on_play_rejected(&mut self, reason: &str) {
        warn!("PlayerCore: play rejected: {}", reason);
        if matches!(
            self.status,
            PlaybackStatus::Loading | PlaybackStatus::Playing
        ) {
            self.intend_playing = false;
            self.transition(PlaybackStatus::Paused).await;
        }
    }

    async fn apply_fault_outcome(&mut self, outcome: FaultOutcome, detail: &str) {
        debug!("PlayerCore: fault outcome {:?}: {}", outcome, detail);
        if outcome == FaultOutcome::Fatal {
            self.fail(detail).await;
        }
    }

    async fn fail(&mut self, detail: &str) {
        let url = self.session.as_ref().map(Session::url).unwrap_or("-");
        warn!("PlayerCore: playback of {} failed: {}", url, detail);
        self.dispose_session();
        self.intend_playing = false;
        self.transition(PlaybackStatus::Errored).await;
    }

    // ── commands ──────────────────────────────────────────────────────────────

    pub async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Play { uuid } => {
                let station = self
                    .lookup(&uuid)
                    .await
                    .ok_or_else(|| anyhow!("Unknown station: {}", uuid))?;
                self.select(station).await;
            }
            Command::TogglePause => self.toggle_pause().await,
            Command::Volume { value } => self.set_volume(value).await,
            Command::Stop => self.stop().await,
            Command::ToggleFavorite { uuid } => {
                self.toggle_favorite(&uuid).await?;
            }
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        Ok(())
    }

    /// Returns whether the station is a favorite afterwards.
    pub async fn toggle_favorite(&mut self, uuid: &str) -> anyhow::Result<bool> {
        let station = self
            .lookup(uuid)
            .await
            .ok_or_else(|| anyhow!("Unknown station: {}", uuid))?;
        let favorite = self.ledger.toggle_favorite(&station);
        info!("PlayerCore: '{}' favorite={}", station.name, favorite);
        self.publish_library().await;
        Ok(favorite)
    }

    async fn lookup(&mut self, uuid: &str) -> Option<Station> {
        if let Some(station) = self.ledger.find(uuid) {
            return Some(station.clone());
        }
        self.state_manager.find_station(uuid).await
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn transition(&mut self, status: PlaybackStatus) {
        let changed = self.status != status;
        if changed {
            info!("PlayerCore: status {:?} → {:?}", self.status, status);
        }
        self.status = status;
        self.state_manager.set_status(status).await;
        if changed {
            let _ = self.broadcast_tx.send(BroadcastMessage::Status(status));
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn publish_library(&mut self) {
        self.state_manager
            .set_library(Library {
                history: self.ledger.history().to_vec(),
                favorites: self.ledger.favorites().to_vec(),
            })
            .await;
        let _ = self.broadcast_tx.send(BroadcastMessage::LibraryUpdated);
    }

    fn dispose_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop(self.sink.as_mut());
        }
    }
}

impl Drop for PlayerCore {
    fn drop(&mut self) {
        self.dispose_session();
    }
}
