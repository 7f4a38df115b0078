#![allow(dead_code)]

//! Recording doubles for the sink and the segmented transport, plus a
//! harness that drives `PlayerCore` step by step.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future;
use orbital_player::core::PlayerCore;
use orbital_player::session::{
    FaultClass, SegmentedTransport, SessionEventKind, SessionId, SessionNotifier,
    TransportFactory, TransportFault,
};
use orbital_player::sink::{AudioSink, PlayFuture, PlaybackRejected};
use orbital_player::BroadcastMessage;
use orbital_proto::ledger::Ledger;
use orbital_proto::protocol::{PlaybackStatus, Station};
use orbital_proto::state::StateManager;
use orbital_proto::store::MemoryStore;
use tokio::sync::broadcast;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── stations ──────────────────────────────────────────────────────────────────

pub fn progressive_station(uuid: &str) -> Station {
    Station {
        uuid: uuid.to_string(),
        name: format!("Progressive {uuid}"),
        url: format!("https://ice.example/{uuid}.mp3"),
        codec: "MP3".into(),
        geo_lat: Some(48.85),
        geo_long: Some(2.35),
        ..Default::default()
    }
}

pub fn adaptive_station(uuid: &str) -> Station {
    Station {
        uuid: uuid.to_string(),
        name: format!("Adaptive {uuid}"),
        url: format!("https://cdn.example/{uuid}/master.m3u8"),
        codec: "AAC".into(),
        geo_lat: Some(35.68),
        geo_long: Some(139.69),
        ..Default::default()
    }
}

pub fn media_url(uuid: &str) -> String {
    format!("https://cdn.example/{uuid}/high/index.m3u8")
}

// ── sink ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Attach(SessionId),
    Detach,
    SetSource(String),
    Load,
    Play,
    Pause,
    SetVolume(f32),
}

/// Shared view into a `MockSink` that the test keeps after the sink has
/// been moved into the core.
#[derive(Clone, Default)]
pub struct SinkProbe {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    reject_play: Arc<Mutex<Option<String>>>,
    notifiers: Arc<Mutex<Vec<SessionNotifier>>>,
}

impl SinkProbe {
    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, call: &SinkCall) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    pub fn plays(&self) -> usize {
        self.count(&SinkCall::Play)
    }

    /// Make every following `play()` fail (`None` to accept again).
    pub fn reject_plays(&self, reason: Option<&str>) {
        *lock(&self.reject_play) = reason.map(str::to_string);
    }

    /// Emit a sink event as the sink attached for `session` would.
    pub fn emit(&self, session: SessionId, kind: SessionEventKind) {
        let notifier = lock(&self.notifiers)
            .iter()
            .find(|n| n.session() == session)
            .cloned()
            .expect("sink was never attached to this session");
        notifier.notify(kind);
    }
}

pub struct MockSink {
    probe: SinkProbe,
}

impl MockSink {
    pub fn new() -> (Self, SinkProbe) {
        let probe = SinkProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }

    fn record(&self, call: SinkCall) {
        lock(&self.probe.calls).push(call);
    }
}

impl AudioSink for MockSink {
    fn attach(&mut self, notifier: SessionNotifier) {
        self.record(SinkCall::Attach(notifier.session()));
        lock(&self.probe.notifiers).push(notifier);
    }

    fn detach(&mut self) {
        self.record(SinkCall::Detach);
    }

    fn set_source(&mut self, url: &str) {
        self.record(SinkCall::SetSource(url.to_string()));
    }

    fn load(&mut self) {
        self.record(SinkCall::Load);
    }

    fn play(&mut self) -> PlayFuture {
        self.record(SinkCall::Play);
        let outcome = match lock(&self.probe.reject_play).clone() {
            Some(reason) => Err(PlaybackRejected::Blocked(reason)),
            None => Ok(()),
        };
        Box::pin(future::ready(outcome))
    }

    fn pause(&mut self) {
        self.record(SinkCall::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        self.record(SinkCall::SetVolume(volume));
    }
}

// ── transport ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    LoadSource(String),
    StartLoad,
    RecoverMediaError,
    Destroy,
}

#[derive(Clone, Default)]
pub struct TransportProbe {
    calls: Arc<Mutex<Vec<(SessionId, TransportCall)>>>,
    notifiers: Arc<Mutex<Vec<SessionNotifier>>>,
}

impl TransportProbe {
    pub fn calls_for(&self, session: SessionId) -> Vec<TransportCall> {
        lock(&self.calls)
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn created(&self) -> usize {
        lock(&self.notifiers).len()
    }

    fn notifier(&self, session: SessionId) -> SessionNotifier {
        lock(&self.notifiers)
            .iter()
            .find(|n| n.session() == session)
            .cloned()
            .expect("no transport was created for this session")
    }

    pub fn manifest_ready(&self, session: SessionId, media_url: &str) {
        self.notifier(session)
            .notify(SessionEventKind::ManifestReady {
                media_url: media_url.to_string(),
            });
    }

    pub fn fault(&self, session: SessionId, class: FaultClass, fatal: bool) {
        let fault = TransportFault {
            class,
            fatal,
            detail: format!("{class:?} trouble"),
        };
        self.notifier(session)
            .notify(SessionEventKind::TransportFault(fault));
    }
}

pub struct MockTransportFactory {
    probe: TransportProbe,
    supported: bool,
}

impl MockTransportFactory {
    pub fn new(supported: bool) -> (Self, TransportProbe) {
        let probe = TransportProbe::default();
        (
            Self {
                probe: probe.clone(),
                supported,
            },
            probe,
        )
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, notifier: SessionNotifier) -> Box<dyn SegmentedTransport> {
        let session = notifier.session();
        lock(&self.probe.notifiers).push(notifier);
        Box::new(MockTransport {
            session,
            probe: self.probe.clone(),
        })
    }

    fn is_supported(&self) -> bool {
        self.supported
    }
}

pub struct MockTransport {
    session: SessionId,
    probe: TransportProbe,
}

impl MockTransport {
    fn record(&self, call: TransportCall) {
        lock(&self.probe.calls).push((self.session, call));
    }
}

impl SegmentedTransport for MockTransport {
    fn load_source(&mut self, url: &str) {
        self.record(TransportCall::LoadSource(url.to_string()));
    }

    fn start_load(&mut self) {
        self.record(TransportCall::StartLoad);
    }

    fn recover_media_error(&mut self) {
        self.record(TransportCall::RecoverMediaError);
    }

    fn destroy(&mut self) {
        self.record(TransportCall::Destroy);
    }
}

// ── harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub core: PlayerCore,
    pub sink: SinkProbe,
    pub transports: TransportProbe,
    pub store: Arc<MemoryStore>,
    pub state: StateManager,
    broadcasts: broadcast::Receiver<BroadcastMessage>,
    seen: Vec<BroadcastMessage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_adaptive_support(true)
    }

    pub fn with_adaptive_support(supported: bool) -> Self {
        let (sink, sink_probe) = MockSink::new();
        let (factory, transport_probe) = MockTransportFactory::new(supported);
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone());
        let state = StateManager::new(0.8);
        let (broadcast_tx, broadcasts) = broadcast::channel(256);
        let core = PlayerCore::new(
            Box::new(sink),
            Arc::new(factory),
            ledger,
            state.clone(),
            broadcast_tx,
            0.8,
        );
        Self {
            core,
            sink: sink_probe,
            transports: transport_probe,
            store,
            state,
            broadcasts,
            seen: Vec::new(),
        }
    }

    /// Let spawned play tasks finish and feed every queued session event to
    /// the core.
    pub async fn settle(&mut self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
            self.core.drain_session_events().await;
        }
    }

    pub fn live_session(&self) -> SessionId {
        self.core.session_id().expect("no live session")
    }

    /// Every broadcast so far.
    pub fn broadcasts(&mut self) -> Vec<BroadcastMessage> {
        while let Ok(msg) = self.broadcasts.try_recv() {
            self.seen.push(msg);
        }
        self.seen.clone()
    }

    /// Status changes broadcast so far, in order.
    pub fn statuses(&mut self) -> Vec<PlaybackStatus> {
        self.broadcasts()
            .into_iter()
            .filter_map(|m| match m {
                BroadcastMessage::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}
