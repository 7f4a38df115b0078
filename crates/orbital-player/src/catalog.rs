//! radio-browser catalog client.

use std::collections::HashSet;
use std::time::Duration;

use orbital_proto::config::CatalogConfig;
use orbital_proto::protocol::Station;
use tracing::{info, warn};

const USER_AGENT: &str = concat!("orbital/", env!("CARGO_PKG_VERSION"));

pub struct CatalogClient {
    client: reqwest::Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    /// Fetch the global top list and the regional boost, merged and
    /// filtered to stations the player can place and play.  Never fails:
    /// a query that errors contributes nothing.
    pub async fn fetch_stations(&self) -> Vec<Station> {
        let global = self.global_query();
        let regional = self.regional_query();
        let (global, regional) = tokio::join!(self.fetch_subset(&global), self.fetch_subset(&regional));
        let merged = merge_playable([global, regional].into_iter().flatten());
        info!("catalog: {} playable stations", merged.len());
        merged
    }

    fn global_query(&self) -> Vec<(&'static str, String)> {
        let mut query = base_query();
        query.push(("limit", self.config.global_limit.to_string()));
        query
    }

    fn regional_query(&self) -> Vec<(&'static str, String)> {
        let mut query = base_query();
        query.push(("limit", self.config.regional_limit.to_string()));
        query.push(("lat", self.config.regional_lat.to_string()));
        query.push(("long", self.config.regional_long.to_string()));
        query.push(("radius", self.config.regional_radius_km.to_string()));
        query
    }

    async fn fetch_subset(&self, query: &[(&'static str, String)]) -> Vec<Station> {
        let request = self.client.get(&self.config.api_base).query(query);
        let result = async {
            request
                .send()
                .await?
                .error_for_status()?
                .json::<Vec<Station>>()
                .await
        }
        .await;
        match result {
            Ok(stations) => stations,
            Err(e) => {
                warn!("catalog: subset fetch failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn base_query() -> Vec<(&'static str, String)> {
    [
        ("hidebroken", "true"),
        ("order", "clickcount"),
        ("reverse", "true"),
        ("is_https", "true"),
        ("has_geo_info", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .collect()
}

/// Keep the first occurrence of each uuid among stations that are placeable
/// and playable.
pub fn merge_playable(stations: impl IntoIterator<Item = Station>) -> Vec<Station> {
    let mut seen = HashSet::new();
    stations
        .into_iter()
        .filter(is_playable)
        .filter(|s| seen.insert(s.uuid.clone()))
        .collect()
}

fn is_playable(station: &Station) -> bool {
    let codec = station.codec.trim().to_ascii_lowercase();
    let supported_codec = codec == "mp3" || codec == "audio/mpeg" || codec.contains("aac");

    let url = station.playable_url().unwrap_or_default().to_ascii_lowercase();
    let legacy_playlist =
        (url.ends_with(".m3u") || url.ends_with(".pls")) && !url.contains("m3u8");

    supported_codec && !legacy_playlist && station.coordinates().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(uuid: &str, codec: &str, url: &str) -> Station {
        Station {
            uuid: uuid.into(),
            name: uuid.into(),
            codec: codec.into(),
            url: url.into(),
            geo_lat: Some(10.0),
            geo_long: Some(20.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_codec_filter() {
        let merged = merge_playable(vec![
            station("a", "MP3", "https://x/a"),
            station("b", "AAC+", "https://x/b"),
            station("c", "audio/mpeg", "https://x/c"),
            station("d", "OGG", "https://x/d"),
            station("e", "", "https://x/e"),
        ]);
        let uuids: Vec<&str> = merged.iter().map(|s| s.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_legacy_playlists_dropped_hls_kept() {
        let merged = merge_playable(vec![
            station("m3u", "MP3", "https://x/listen.m3u"),
            station("pls", "MP3", "https://x/listen.PLS"),
            station("hls", "AAC", "https://x/live.m3u8"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].uuid, "hls");
    }

    #[test]
    fn test_requires_coordinates() {
        let mut no_geo = station("n", "MP3", "https://x/n");
        no_geo.geo_long = None;
        assert!(merge_playable(vec![no_geo]).is_empty());
    }

    #[test]
    fn test_dedupes_by_uuid_keeping_first() {
        let first = station("dup", "MP3", "https://x/first");
        let second = station("dup", "MP3", "https://x/second");
        let merged = merge_playable(vec![first.clone(), second]);
        assert_eq!(merged, vec![first]);
    }

    #[test]
    fn test_queries_carry_regional_boost() {
        let client = CatalogClient::new(CatalogConfig::default()).unwrap();
        let regional = client.regional_query();
        assert!(regional.contains(&("radius", "3500".to_string())));
        assert!(regional.contains(&("lat", "30".to_string())));
        assert!(regional.contains(&("limit", "2500".to_string())));
        let global = client.global_query();
        assert!(global.contains(&("limit", "4000".to_string())));
        assert!(global.contains(&("order", "clickcount".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_catalog_yields_empty() {
        let config = CatalogConfig {
            api_base: "http://127.0.0.1:9/json/stations/search".into(),
            ..CatalogConfig::default()
        };
        let client = CatalogClient::new(config).unwrap();
        assert!(client.fetch_stations().await.is_empty());
    }
}
