/// mpv IPC driver and the `AudioSink` built on it.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event                     → event_tx channel
///
///   MpvSink::new(handle, event_rx)
///         └── event_task    ← maps start-file / file-loaded / end-file to
///                             session events for the session that loaded
///                             the playlist entry, if still attached
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::session::{SessionEventKind, SessionId, SessionNotifier};
use crate::sink::{AudioSink, PlayFuture, PlaybackRejected};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(5);

// ── internal channel types ────────────────────────────────────────────────────

type Reply = oneshot::Receiver<anyhow::Result<Value>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Playlist entry a `start-file` / `end-file` event refers to.
    pub fn playlist_entry_id(&self) -> Option<i64> {
        self.raw.get("playlist_entry_id")?.as_i64()
    }

    /// Translate into what a playback session cares about.
    pub fn session_event(&self) -> Option<SessionEventKind> {
        match self.event_name()? {
            "start-file" => Some(SessionEventKind::LoadStart),
            "file-loaded" => Some(SessionEventKind::FirstData),
            "end-file" => {
                let reason = self.raw.get("reason").and_then(Value::as_str)?;
                if reason != "error" {
                    return None;
                }
                let detail = self
                    .raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or("playback error");
                Some(SessionEventKind::MediaError(detail.to_string()))
            }
            _ => None,
        }
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    /// Queue `command` without waiting.  Commands reach mpv in the order they
    /// were enqueued.
    pub fn enqueue(&self, command: Value) -> anyhow::Result<Reply> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .try_send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .map_err(|e| anyhow::anyhow!("mpv writer unavailable: {}", e))?;
        Ok(reply_rx)
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let reply = self.enqueue(command)?;
        await_reply(reply).await
    }

    /// Queue `command` and log a failure instead of returning it.
    fn fire(&self, command: Value) {
        let label = command.to_string();
        match self.enqueue(command) {
            Ok(reply) => {
                tokio::spawn(async move {
                    if let Err(e) = await_reply(reply).await {
                        warn!("mpv: {} failed: {}", label, e);
                    }
                });
            }
            Err(e) => warn!("mpv: {} not sent: {}", label, e),
        }
    }
}

async fn await_reply(reply: Reply) -> anyhow::Result<Value> {
    tokio::time::timeout(IPC_TIMEOUT, reply)
        .await
        .map_err(|_| anyhow::anyhow!("mpv IPC timeout"))?
        .map_err(|_| anyhow::anyhow!("mpv reply channel dropped"))?
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    pub socket_name: String,
    process: Option<tokio::process::Child>,
    /// Where `mpv-stderr.log` is written.
    log_dir: PathBuf,
    pub initial_volume: f32,
}

impl MpvDriver {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_name: orbital_proto::platform::mpv_socket_name(),
            process: None,
            log_dir: log_dir.into(),
            initial_volume: 0.8,
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn command(&self, mpv_binary: &std::path::Path) -> tokio::process::Command {
        let vol_arg = format!(
            "--volume={}",
            (self.initial_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let mut cmd = tokio::process::Command::new(mpv_binary);
        cmd.arg("--no-video")
            .arg("--idle=yes")
            .arg(orbital_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    // ── spawn ─────────────────────────────────────────────────────────────────

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        let mpv_binary = orbital_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        std::fs::create_dir_all(&self.log_dir)?;
        let stderr_path = self.log_dir.join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;
        info!("mpv: logging stderr to {:?}", stderr_path);

        let child = self.command(&mpv_binary).stderr(stderr_file).spawn()?;
        info!("mpv: spawned process with pid {:?}", child.id());
        self.process = Some(child);

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        info!("mpv: spawning new process");
        let mpv_binary = orbital_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = self
            .command(&mpv_binary)
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            match ClientOptions::new().open(&pipe_path) {
                Ok(client) => {
                    info!("mpv: connected to named pipe");
                    let (read_half, write_half) = tokio::io::split(client);
                    return Ok(start_io_tasks(read_half, write_half, event_tx));
                }
                Err(_) => continue,
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            debug!("mpv reader: response req={} ok", req_id);
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        debug!("mpv reader: event consumer gone");
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        pending.lock().await.insert(req.req_id, req.reply);
        debug!(
            "mpv writer: send req={} payload={}",
            req.req_id,
            req.payload.trim()
        );
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── sink ──────────────────────────────────────────────────────────────────────

type SharedNotifier = Arc<std::sync::Mutex<Option<SessionNotifier>>>;

/// A `loadfile` issued on behalf of a session, awaiting mpv's reply.
struct PendingLoad {
    session: SessionId,
    reply: Reply,
}

/// `AudioSink` backed by an idle mpv process.
///
/// `load()` leaves mpv paused on the new file so that audio only starts on
/// `play()`.  Events are attributed to the session whose `loadfile` created
/// the playlist entry they refer to, so events still in flight for a
/// replaced file never reach the session attached after it.
pub struct MpvSink {
    handle: MpvHandle,
    notifier: SharedNotifier,
    loads_tx: mpsc::UnboundedSender<PendingLoad>,
    source: Option<String>,
    event_task: tokio::task::JoinHandle<()>,
}

impl MpvSink {
    pub fn new(handle: MpvHandle, mut event_rx: mpsc::Receiver<MpvEvent>) -> Self {
        let notifier: SharedNotifier = Arc::new(std::sync::Mutex::new(None));
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        let mut router = EventRouter::new(notifier.clone(), loads_rx);
        let event_task = tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                router.route(evt).await;
            }
            debug!("mpv sink: event task exiting");
        });
        Self {
            handle,
            notifier,
            loads_tx,
            source: None,
            event_task,
        }
    }
}

fn lock_notifier(
    notifier: &SharedNotifier,
) -> std::sync::MutexGuard<'_, Option<SessionNotifier>> {
    notifier
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Maps mpv playlist entries to the sessions that loaded them and forwards
/// events only while that session is still attached.
///
/// `start-file` and `end-file` carry `playlist_entry_id`; `file-loaded` does
/// not and belongs to the entry of the last `start-file`.
struct EventRouter {
    notifier: SharedNotifier,
    loads_rx: mpsc::UnboundedReceiver<PendingLoad>,
    pending: VecDeque<PendingLoad>,
    entries: HashMap<i64, SessionId>,
    /// Sessions whose `loadfile` reply carried no entry id (older mpv);
    /// bound in order to the next unknown `start-file`.
    unbound: VecDeque<SessionId>,
    current_entry: Option<i64>,
}

impl EventRouter {
    fn new(notifier: SharedNotifier, loads_rx: mpsc::UnboundedReceiver<PendingLoad>) -> Self {
        Self {
            notifier,
            loads_rx,
            pending: VecDeque::new(),
            entries: HashMap::new(),
            unbound: VecDeque::new(),
            current_entry: None,
        }
    }

    async fn route(&mut self, evt: MpvEvent) {
        let entry = match evt.event_name() {
            Some("start-file") => {
                self.current_entry = evt.playlist_entry_id();
                self.current_entry
            }
            Some("file-loaded") => self.current_entry,
            Some("end-file") => evt.playlist_entry_id(),
            _ => return,
        };
        let Some(entry) = entry else {
            debug!("mpv sink: {:?} without a playlist entry", evt.event_name());
            return;
        };

        let is_start = evt.event_name() == Some("start-file");
        let owner = self.resolve(entry, is_start).await;
        if evt.event_name() == Some("end-file") {
            self.entries.remove(&entry);
            if self.current_entry == Some(entry) {
                self.current_entry = None;
            }
        }

        let Some(kind) = evt.session_event() else {
            return;
        };
        let Some(owner) = owner else {
            debug!("mpv sink: {:?} for untracked entry {}", kind, entry);
            return;
        };
        let target = lock_notifier(&self.notifier)
            .clone()
            .filter(|n| n.session() == owner);
        match target {
            Some(notifier) => notifier.notify(kind),
            None => debug!("mpv sink: dropping {:?} from session {}", kind, owner),
        }
    }

    /// Session that loaded `entry`.  Settles outstanding `loadfile` replies
    /// in issue order until the entry is known.
    async fn resolve(&mut self, entry: i64, bind_unknown: bool) -> Option<SessionId> {
        loop {
            if let Some(session) = self.entries.get(&entry) {
                return Some(*session);
            }
            while let Ok(load) = self.loads_rx.try_recv() {
                self.pending.push_back(load);
            }
            let Some(load) = self.pending.pop_front() else {
                break;
            };
            match await_reply(load.reply).await {
                Ok(reply) => match reply["data"]["playlist_entry_id"].as_i64() {
                    Some(id) => {
                        self.entries.insert(id, load.session);
                    }
                    None => self.unbound.push_back(load.session),
                },
                Err(e) => warn!("mpv sink: loadfile for session {} failed: {}", load.session, e),
            }
        }

        if bind_unknown {
            if let Some(session) = self.unbound.pop_front() {
                self.entries.insert(entry, session);
                return Some(session);
            }
        }
        None
    }
}

impl AudioSink for MpvSink {
    fn attach(&mut self, notifier: SessionNotifier) {
        debug!("mpv sink: attach session {}", notifier.session());
        *lock_notifier(&self.notifier) = Some(notifier);
    }

    fn detach(&mut self) {
        lock_notifier(&self.notifier).take();
        self.source = None;
        self.handle.fire(json!(["stop"]));
    }

    fn set_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
    }

    fn load(&mut self) {
        let Some(url) = self.source.clone() else {
            warn!("mpv sink: load without a source");
            return;
        };
        debug!("mpv sink: loadfile {}", url);
        self.handle.fire(json!(["set_property", "pause", true]));
        let session = lock_notifier(&self.notifier).as_ref().map(SessionNotifier::session);
        match (self.handle.enqueue(json!(["loadfile", url, "replace"])), session) {
            (Ok(reply), Some(session)) => {
                let _ = self.loads_tx.send(PendingLoad { session, reply });
            }
            (Ok(_), None) => debug!("mpv sink: load while detached"),
            (Err(e), _) => warn!("mpv: loadfile not sent: {}", e),
        }
    }

    fn play(&mut self) -> PlayFuture {
        let reply = self.handle.enqueue(json!(["set_property", "pause", false]));
        Box::pin(async move {
            let reply = reply.map_err(|e| PlaybackRejected::Unavailable(e.to_string()))?;
            await_reply(reply)
                .await
                .map(|_| ())
                .map_err(|e| PlaybackRejected::Blocked(e.to_string()))
        })
    }

    fn pause(&mut self) {
        self.handle.fire(json!(["set_property", "pause", true]));
    }

    fn set_volume(&mut self, volume: f32) {
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        self.handle.fire(json!(["set_property", "volume", vol_pct]));
    }
}

impl Drop for MpvSink {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}
