use serde::{Deserialize, Serialize};

/// A radio station as served by the catalog.  Immutable once fetched.
///
/// Field names follow the radio-browser JSON schema so catalog responses and
/// persisted ledgers deserialize straight into this struct.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    #[serde(rename = "stationuuid")]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    /// Address after the catalog followed redirects; empty when unknown.
    #[serde(default)]
    pub url_resolved: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub favicon: String,
    /// Comma-separated tag list (genre, style, language, ...)
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub language: String,
    /// Free-text codec label, compared case-insensitively.
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub clickcount: i64,
    #[serde(default)]
    pub geo_lat: Option<f64>,
    #[serde(default)]
    pub geo_long: Option<f64>,
}

impl Station {
    /// The address to hand to a transport: the resolved URL when present,
    /// otherwise the primary URL.  `None` when neither is usable.
    pub fn playable_url(&self) -> Option<&str> {
        [self.url_resolved.trim(), self.url.trim()]
            .into_iter()
            .find(|u| !u.is_empty())
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.geo_lat, self.geo_long) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// What the user asked the player to do.  Processed strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackIntent {
    Select(Station),
    TogglePause,
    /// Volume in `[0, 1]`; out-of-range values are clamped.
    SetVolume(f32),
    Stop,
}

/// Control commands accepted from the HTTP API.  Stations are addressed by
/// uuid and resolved to a `PlaybackIntent` by the player core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { uuid: String },
    TogglePause,
    Volume { value: f32 },
    Stop,
    ToggleFavorite { uuid: String },
    GetState,
}

/// Normalized playback status exposed to the UI layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // no station
    Loading, // session started, no audio data yet
    Playing,
    Paused, // user pause or blocked play()
    Errored, // session failed; only a new Select recovers
}

/// Player state owned by the player core, read-only everywhere else.
///
/// `rev` is a monotonically increasing counter bumped on every change so
/// readers can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub rev: u64,
    pub station: Option<Station>,
    pub is_playing: bool,
    pub is_loading: bool,
    pub volume: f32,
    #[serde(default)]
    pub status: PlaybackStatus,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            rev: 0,
            station: None,
            is_playing: false,
            is_loading: false,
            volume: 0.8,
            status: PlaybackStatus::Idle,
        }
    }
}
