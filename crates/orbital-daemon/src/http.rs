use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use orbital_player::ai::{self, AiClient, Language, MoodQuery, StationGuide, Suggestion};
use orbital_player::core::CoreEvent;
use orbital_proto::capsules::{CapsuleBoard, MessageCapsule};
use orbital_proto::geo::{self, StationClick};
use orbital_proto::protocol::{Command, Coordinates, PlayerState, Station};
use orbital_proto::state::{Library, StateManager};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: StateManager,
    pub event_tx: mpsc::Sender<CoreEvent>,
    pub capsules: Arc<CapsuleBoard>,
    pub ai: Arc<AiClient>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

#[derive(Deserialize)]
struct NewCapsule {
    lat: f64,
    lng: f64,
    message: String,
    #[serde(default)]
    author: Option<String>,
}

#[derive(Deserialize)]
struct GuideParams {
    #[serde(default)]
    lang: Language,
}

#[derive(Deserialize)]
struct MoodRequest {
    text: String,
    #[serde(default)]
    lang: Language,
    /// Start the matched station right away.
    #[serde(default)]
    play: bool,
}

#[derive(Serialize)]
struct MoodResponse {
    query: Suggestion<MoodQuery>,
    station: Option<Station>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/stations", get(get_stations))
        .route("/api/stations/near/:lat/:lng", get(stations_near))
        .route("/api/play/:uuid", post(play_station))
        .route("/api/toggle", post(toggle_pause))
        .route("/api/stop", post(stop))
        .route("/api/volume/:percent", post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/favorite/:uuid", post(toggle_favorite))
        .route("/api/library", get(get_library))
        .route("/api/capsules", get(list_capsules).post(add_capsule))
        .route("/api/guide/:uuid", get(station_guide))
        .route("/api/mood", post(mood_search))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    let label = format!("{:?}", cmd);
    if state.event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
        error!("Failed to send {} command", label);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

// ── player ────────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<HttpState>) -> Json<PlayerState> {
    Json(state.state_manager.get_state().await)
}

async fn play_station(State(state): State<HttpState>, Path(uuid): Path<String>) -> StatusCode {
    info!("HTTP API: Play station {}", uuid);
    if state.state_manager.find_station(&uuid).await.is_none() {
        return StatusCode::NOT_FOUND;
    }
    dispatch(&state, Command::Play { uuid }).await
}

async fn toggle_pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle pause");
    dispatch(&state, Command::TogglePause).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    dispatch(&state, Command::Stop).await
}

async fn set_volume(State(state): State<HttpState>, Path(percent): Path<i32>) -> StatusCode {
    let value = (percent as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", percent);
    dispatch(&state, Command::Volume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let player = state.state_manager.get_state().await;
    let volume = (player.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

// ── catalog & library ─────────────────────────────────────────────────────────

async fn get_stations(State(state): State<HttpState>) -> Json<Vec<Station>> {
    Json(state.state_manager.stations().await)
}

async fn stations_near(
    State(state): State<HttpState>,
    Path((lat, lng)): Path<(f64, f64)>,
) -> Result<Json<StationClick>, StatusCode> {
    let stations = state.state_manager.stations().await;
    geo::resolve_click(&stations, Coordinates { lat, lng })
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn toggle_favorite(State(state): State<HttpState>, Path(uuid): Path<String>) -> StatusCode {
    info!("HTTP API: Toggle favorite {}", uuid);
    if state.state_manager.find_station(&uuid).await.is_none() {
        return StatusCode::NOT_FOUND;
    }
    dispatch(&state, Command::ToggleFavorite { uuid }).await
}

async fn get_library(State(state): State<HttpState>) -> Json<Library> {
    Json(state.state_manager.library().await)
}

// ── capsules ──────────────────────────────────────────────────────────────────

async fn list_capsules(State(state): State<HttpState>) -> Json<Vec<MessageCapsule>> {
    Json(state.capsules.list())
}

async fn add_capsule(State(state): State<HttpState>, Json(req): Json<NewCapsule>) -> Response {
    match state
        .capsules
        .add(req.lat, req.lng, &req.message, req.author.as_deref())
    {
        Ok(capsule) => (StatusCode::CREATED, Json(capsule)).into_response(),
        Err(e) => {
            warn!("HTTP API: capsule rejected: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

// ── AI ────────────────────────────────────────────────────────────────────────

async fn station_guide(
    State(state): State<HttpState>,
    Path(uuid): Path<String>,
    Query(params): Query<GuideParams>,
) -> Result<Json<Suggestion<StationGuide>>, StatusCode> {
    let station = state
        .state_manager
        .find_station(&uuid)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(state.ai.station_guide(&station, params.lang).await))
}

async fn mood_search(State(state): State<HttpState>, Json(req): Json<MoodRequest>) -> Json<MoodResponse> {
    let query = state.ai.analyze_mood(&req.text, req.lang).await;
    let station = match &query {
        Suggestion::Ready(mood) => {
            let stations = state.state_manager.stations().await;
            ai::best_match(&stations, mood).cloned()
        }
        _ => None,
    };

    if let (true, Some(station)) = (req.play, &station) {
        info!("HTTP API: mood match '{}'", station.name);
        dispatch(
            &state,
            Command::Play {
                uuid: station.uuid.clone(),
            },
        )
        .await;
    }

    Json(MoodResponse { query, station })
}
