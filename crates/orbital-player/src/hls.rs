//! HLS manifest transport.
//!
//! Resolves a station's playlist to the media playlist the sink should play:
//! master playlists are followed to their highest-bandwidth variant.  Fetch
//! failures are retried with exponential backoff; once the retry budget is
//! spent the failure is reported as a fatal network fault and the session
//! decides whether to load again.

use std::time::Duration;

use m3u8_rs::Playlist;
use orbital_proto::config::HlsConfig;
use reqwest::Url;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{
    FaultClass, SegmentedTransport, SessionEventKind, SessionNotifier, TransportFactory,
    TransportFault,
};

const USER_AGENT: &str = concat!("orbital/", env!("CARGO_PKG_VERSION"));
const RETRY_BASE_DELAY_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 30;
const MAX_PLAYLIST_DEPTH: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManifestError {
    #[error("Invalid playlist URL '{0}'")]
    InvalidUrl(String),

    #[error("Not an HLS playlist")]
    Malformed,

    #[error("Master playlist has no variants")]
    NoVariants,

    #[error("HLS playlist nesting too deep")]
    TooDeep,
}

/// What a fetched playlist tells us to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestStep {
    /// This is the media playlist.
    Media,
    /// Master playlist; follow this variant.
    Variant(Url),
}

/// Parse a fetched playlist.  `base` is the address it was fetched from and
/// anchors relative variant URIs.
pub fn parse_manifest(base: &Url, body: &[u8]) -> Result<ManifestStep, ManifestError> {
    match m3u8_rs::parse_playlist(body) {
        Ok((_, Playlist::MasterPlaylist(master))) => {
            let best = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .max_by_key(|v| v.bandwidth)
                .ok_or(ManifestError::NoVariants)?;
            base.join(best.uri.trim())
                .map(ManifestStep::Variant)
                .map_err(|_| ManifestError::InvalidUrl(best.uri.clone()))
        }
        Ok((_, Playlist::MediaPlaylist(_))) => Ok(ManifestStep::Media),
        Err(_) => Err(ManifestError::Malformed),
    }
}

/// Exponential backoff: min(2^(n-1) * base, max), e.g. 2s, 4s, 8s, 16s, 30s.
pub(crate) fn backoff_delay(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(5);
    let delay_secs = RETRY_BASE_DELAY_SECS.saturating_mul(1u64 << exp);
    Duration::from_secs(delay_secs.min(MAX_BACKOFF_SECS))
}

// ── factory ───────────────────────────────────────────────────────────────────

pub struct HlsTransportFactory {
    client: reqwest::Client,
    manifest_retries: u32,
}

impl HlsTransportFactory {
    pub fn new(config: &HlsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            manifest_retries: config.manifest_retries,
        })
    }
}

impl TransportFactory for HlsTransportFactory {
    fn create(&self, notifier: SessionNotifier) -> Box<dyn SegmentedTransport> {
        Box::new(HlsTransport {
            client: self.client.clone(),
            manifest_retries: self.manifest_retries,
            notifier,
            source: None,
            task: None,
        })
    }
}

// ── transport ─────────────────────────────────────────────────────────────────

pub struct HlsTransport {
    client: reqwest::Client,
    manifest_retries: u32,
    notifier: SessionNotifier,
    source: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl HlsTransport {
    fn spawn_load(&mut self) {
        self.abort_load();
        let Some(url) = self.source.clone() else {
            debug!("hls: load requested without a source");
            return;
        };
        let client = self.client.clone();
        let notifier = self.notifier.clone();
        let retries = self.manifest_retries;
        self.task = Some(tokio::spawn(async move {
            match resolve_media_playlist(&client, &url, retries, &notifier).await {
                Ok(media_url) => {
                    info!("hls: {} -> {}", url, media_url);
                    notifier.notify(SessionEventKind::ManifestReady { media_url });
                }
                Err(fault) => notifier.notify(SessionEventKind::TransportFault(fault)),
            }
        }));
    }

    fn abort_load(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl SegmentedTransport for HlsTransport {
    fn load_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
        self.spawn_load();
    }

    fn start_load(&mut self) {
        self.spawn_load();
    }

    fn recover_media_error(&mut self) {
        // Re-resolve and re-announce; the session re-points the sink
        self.spawn_load();
    }

    fn destroy(&mut self) {
        self.abort_load();
        self.source = None;
    }
}

impl Drop for HlsTransport {
    fn drop(&mut self) {
        self.abort_load();
    }
}

async fn resolve_media_playlist(
    client: &reqwest::Client,
    url: &str,
    retries: u32,
    notifier: &SessionNotifier,
) -> Result<String, TransportFault> {
    let mut current = Url::parse(url).map_err(|_| {
        TransportFault::fatal(
            FaultClass::Other,
            ManifestError::InvalidUrl(url.to_string()).to_string(),
        )
    })?;

    for _ in 0..MAX_PLAYLIST_DEPTH {
        let body = fetch_with_retry(client, &current, retries, notifier).await?;
        match parse_manifest(&current, &body)
            .map_err(|e| TransportFault::fatal(FaultClass::Other, format!("{}: {}", current, e)))?
        {
            ManifestStep::Media => return Ok(current.to_string()),
            ManifestStep::Variant(next) => {
                debug!("hls: master {} -> variant {}", current, next);
                current = next;
            }
        }
    }
    Err(TransportFault::fatal(
        FaultClass::Other,
        ManifestError::TooDeep.to_string(),
    ))
}

async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &Url,
    retries: u32,
    notifier: &SessionNotifier,
) -> Result<Vec<u8>, TransportFault> {
    let mut failures = 0u32;
    loop {
        match fetch(client, url).await {
            Ok(body) => return Ok(body),
            Err(e) => {
                failures += 1;
                if failures > retries {
                    return Err(TransportFault::fatal(
                        FaultClass::Network,
                        format!("{}: {}", url, e),
                    ));
                }
                let delay = backoff_delay(failures);
                warn!(
                    "hls: fetch {} failed ({}), retry {}/{} in {:?}",
                    url, e, failures, retries, delay
                );
                notifier.notify(SessionEventKind::TransportFault(TransportFault::transient(
                    FaultClass::Network,
                    e.to_string(),
                )));
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &Url) -> Result<Vec<u8>, reqwest::Error> {
    let response = client.get(url.clone()).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionEvent, SessionId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=64000,CODECS=\"mp4a.40.5\"
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=256000,CODECS=\"mp4a.40.2\"
high/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=128000,CODECS=\"mp4a.40.2\"
mid/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:1
#EXTINF:6.0,
seg1.aac
#EXTINF:6.0,
seg2.aac
";

    fn base() -> Url {
        Url::parse("https://cdn.example/live/master.m3u8?token=1").unwrap()
    }

    #[test]
    fn test_master_picks_highest_bandwidth() {
        let step = parse_manifest(&base(), MASTER.as_bytes()).unwrap();
        assert_eq!(
            step,
            ManifestStep::Variant(Url::parse("https://cdn.example/live/high/index.m3u8").unwrap())
        );
    }

    #[test]
    fn test_absolute_variant_uri_kept() {
        let master = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=96000
https://other.example/radio/chunklist.m3u8
";
        let step = parse_manifest(&base(), master.as_bytes()).unwrap();
        assert_eq!(
            step,
            ManifestStep::Variant(Url::parse("https://other.example/radio/chunklist.m3u8").unwrap())
        );
    }

    #[test]
    fn test_media_playlist_is_final() {
        assert_eq!(
            parse_manifest(&base(), MEDIA.as_bytes()),
            Ok(ManifestStep::Media)
        );
    }

    #[test]
    fn test_non_playlist_is_malformed() {
        assert_eq!(
            parse_manifest(&base(), b"<html>Not found</html>"),
            Err(ManifestError::Malformed)
        );
        assert_eq!(parse_manifest(&base(), b""), Err(ManifestError::Malformed));
    }

    #[test]
    fn backoff_first_failure_is_base_delay() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(0), Duration::from_secs(2));
    }

    #[test]
    fn backoff_exponential_growth_capped() {
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
        assert_eq!(backoff_delay(5), Duration::from_secs(30));
        assert_eq!(backoff_delay(50), Duration::from_secs(30));
    }

    /// Serve fixed playlists over plain HTTP on a loopback port.
    async fn serve(routes: Vec<(&'static str, &'static str)>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");
                    let response = match routes.iter().find(|(p, _)| *p == path) {
                        Some((_, body)) => format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        ),
                        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string(),
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn transport(retries: u32) -> (Box<dyn SegmentedTransport>, mpsc::UnboundedReceiver<SessionEvent>) {
        let factory = HlsTransportFactory::new(&HlsConfig {
            manifest_retries: retries,
            request_timeout_secs: 5,
        })
        .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (factory.create(SessionNotifier::new(SessionId(7), tx)), rx)
    }

    #[tokio::test]
    async fn test_load_source_announces_media_playlist() {
        let base = serve(vec![("/live/master.m3u8", MASTER), ("/live/high/index.m3u8", MEDIA)]).await;
        let (mut transport, mut rx) = transport(0);
        transport.load_source(&format!("{}/live/master.m3u8", base));

        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.session, SessionId(7));
        assert_eq!(
            evt.kind,
            SessionEventKind::ManifestReady {
                media_url: format!("{}/live/high/index.m3u8", base)
            }
        );
    }

    #[tokio::test]
    async fn test_missing_playlist_is_fatal_network_fault() {
        let base = serve(vec![]).await;
        let (mut transport, mut rx) = transport(0);
        transport.load_source(&format!("{}/gone.m3u8", base));

        match rx.recv().await.unwrap().kind {
            SessionEventKind::TransportFault(fault) => {
                assert!(fault.fatal);
                assert_eq!(fault.class, FaultClass::Network);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_playlist_is_fatal_other_fault() {
        let base = serve(vec![("/bad.m3u8", "<html>nope</html>")]).await;
        let (mut transport, mut rx) = transport(0);
        transport.load_source(&format!("{}/bad.m3u8", base));

        match rx.recv().await.unwrap().kind {
            SessionEventKind::TransportFault(fault) => {
                assert!(fault.fatal);
                assert_eq!(fault.class, FaultClass::Other);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_destroy_aborts_pending_load() {
        let base = serve(vec![("/live/master.m3u8", MASTER), ("/live/high/index.m3u8", MEDIA)]).await;
        let (mut transport, mut rx) = transport(0);
        transport.load_source(&format!("{}/live/master.m3u8", base));
        transport.destroy();
        transport.start_load();
        drop(transport);

        let outcome = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(!matches!(outcome, Ok(Some(_))));
    }
}
