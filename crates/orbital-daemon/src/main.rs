mod http;

use std::sync::Arc;

use orbital_player::ai::AiClient;
use orbital_player::catalog::CatalogClient;
use orbital_player::core::{CoreEvent, PlayerCore};
use orbital_player::hls::HlsTransportFactory;
use orbital_player::mpv::{MpvDriver, MpvEvent, MpvSink};
use orbital_player::BroadcastMessage;
use orbital_proto::capsules::CapsuleBoard;
use orbital_proto::config::Config;
use orbital_proto::ledger::Ledger;
use orbital_proto::state::StateManager;
use orbital_proto::store::{FileStore, KeyValueStore};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Load config ──────────────────────────────────────────────────────────
    let config = Config::load().unwrap_or_default();
    let data_dir = config.daemon.data_dir.clone();
    std::fs::create_dir_all(&data_dir)?;

    // ── Logging ──────────────────────────────────────────────────────────────
    let log_path = data_dir.join("orbital.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("orbital log: {}", log_path.display());
    info!("orbital starting…");
    info!("Config: {:?}", Config::config_path());

    // ── Persistence ──────────────────────────────────────────────────────────
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&data_dir));
    let ledger = Ledger::open(store.clone()).with_history_limit(config.player.history_limit);
    let capsules = Arc::new(CapsuleBoard::open(store));
    let state_manager = StateManager::new(config.player.default_volume);

    // ── Catalog (background; the globe fills in when it lands) ──────────────
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);
    match CatalogClient::new(config.catalog.clone()) {
        Ok(catalog) => {
            let state_manager = state_manager.clone();
            let broadcast_tx = broadcast_tx.clone();
            tokio::spawn(async move {
                let stations = catalog.fetch_stations().await;
                state_manager.set_stations(stations).await;
                let _ = broadcast_tx.send(BroadcastMessage::StateUpdated);
            });
        }
        Err(e) => warn!("Catalog client unavailable: {}", e),
    }

    // ── mpv sink ─────────────────────────────────────────────────────────────
    let mut driver = MpvDriver::new(&data_dir);
    driver.initial_volume = config.player.default_volume;
    let (mpv_event_tx, mpv_event_rx) = mpsc::channel::<MpvEvent>(256);
    let handle = driver.spawn_and_connect(mpv_event_tx).await?;
    match handle.send(json!(["get_property", "mpv-version"])).await {
        Ok(version) => info!("mpv: {}", version),
        Err(e) => debug!("mpv: version query failed: {}", e),
    }
    let sink = MpvSink::new(handle, mpv_event_rx);

    // ── Player core ──────────────────────────────────────────────────────────
    let transports = Arc::new(HlsTransportFactory::new(&config.hls)?);
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(1024);
    let core = PlayerCore::new(
        Box::new(sink),
        transports,
        ledger,
        state_manager.clone(),
        broadcast_tx.clone(),
        config.player.default_volume,
    );
    let core_task = tokio::spawn(async move {
        if let Err(e) = core.run(event_rx).await {
            error!("PlayerCore exited with error: {}", e);
        }
    });

    // ── HTTP server ──────────────────────────────────────────────────────────
    if config.http.enabled {
        let ai = Arc::new(AiClient::new(&config.ai)?);
        if !ai.is_available() {
            info!("AI suggestions unavailable");
        }
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                state_manager: state_manager.clone(),
                event_tx: event_tx.clone(),
                capsules,
                ai,
            },
        );
    }

    // ── Run until Ctrl-C ─────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    let _ = event_tx.send(CoreEvent::Shutdown).await;
    if let Err(e) = core_task.await {
        error!("PlayerCore task failed: {}", e);
    }
    driver.kill().await;

    Ok(())
}
