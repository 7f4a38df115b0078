use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub hls: HlsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Where the log file and the persisted ledgers live.
    #[serde(default = "platform::data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Segmented (HLS) transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlsConfig {
    /// Manifest fetch attempts before a network fault is escalated.
    #[serde(default = "default_manifest_retries")]
    pub manifest_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// radio-browser catalog queries.  The regional query boosts coverage of
/// East/South-East Asia, which the global top list under-represents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_global_limit")]
    pub global_limit: u32,
    #[serde(default = "default_regional_limit")]
    pub regional_limit: u32,
    #[serde(default = "default_regional_lat")]
    pub regional_lat: f64,
    #[serde(default = "default_regional_long")]
    pub regional_long: f64,
    #[serde(default = "default_regional_radius_km")]
    pub regional_radius_km: u32,
}

/// OpenAI-compatible chat completion endpoint used for station guides and
/// mood search.  The key is read from the environment, never from the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_api_key_env")]
    pub api_key_env: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: platform::data_dir(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            manifest_retries: default_manifest_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            global_limit: default_global_limit(),
            regional_limit: default_regional_limit(),
            regional_lat: default_regional_lat(),
            regional_long: default_regional_long(),
            regional_radius_km: default_regional_radius_km(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: default_ai_enabled(),
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            api_key_env: default_ai_api_key_env(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    0.8
}

fn default_history_limit() -> usize {
    crate::ledger::HISTORY_LIMIT
}

fn default_manifest_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_api_base() -> String {
    "https://de1.api.radio-browser.info/json/stations/search".to_string()
}

fn default_global_limit() -> u32 {
    4000
}

fn default_regional_limit() -> u32 {
    2500
}

fn default_regional_lat() -> f64 {
    30.0
}

fn default_regional_long() -> f64 {
    120.0
}

fn default_regional_radius_km() -> u32 {
    3500
}

fn default_ai_enabled() -> bool {
    true
}

fn default_ai_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_ai_model() -> String {
    "deepseek-chat".to_string()
}

fn default_ai_api_key_env() -> String {
    "ORBITAL_AI_API_KEY".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        let volume = config.player.default_volume;
        config.player.default_volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            default_volume()
        };
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.player.history_limit, 50);
        assert!(config.catalog.api_base.starts_with("https://"));
        assert!(config.daemon.data_dir.ends_with("orbital"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [player]
            default_volume = 3.0

            [hls]
            manifest_retries = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.player.default_volume, 1.0);
        assert_eq!(config.player.history_limit, 50);
        assert_eq!(config.hls.manifest_retries, 7);
        assert_eq!(config.hls.request_timeout_secs, 15);
        assert_eq!(config.ai.api_key_env, "ORBITAL_AI_API_KEY");
    }

    #[test]
    fn test_nan_volume_falls_back_to_default() {
        let config = Config::from_toml_str("[player]\ndefault_volume = nan\n").unwrap();
        assert_eq!(config.player.default_volume, default_volume());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.catalog.regional_radius_km, 3500);
        assert_eq!(back.ai.model, "deepseek-chat");
    }
}
