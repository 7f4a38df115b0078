//! Stream protocol detection.

use orbital_proto::protocol::Station;
use serde::{Deserialize, Serialize};

/// How a station's audio is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// Segmented playlist (HLS) fed through a segmented transport.
    Adaptive,
    /// A single continuous stream handed straight to the sink.
    Progressive,
}

/// Decide the transport for `station`.
///
/// Adaptive when the playable address's path ends in `.m3u8` or the codec
/// label is `hls` (both case-insensitive); query string and fragment are not
/// part of the path.  Everything else, including a station without any
/// address, is progressive.
pub fn classify(station: &Station) -> TransportKind {
    if station.codec.trim().eq_ignore_ascii_case("hls") {
        return TransportKind::Adaptive;
    }
    match station.playable_url() {
        Some(url) if url_path(url).to_ascii_lowercase().ends_with(".m3u8") => {
            TransportKind::Adaptive
        }
        _ => TransportKind::Progressive,
    }
}

fn url_path(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        // Relative or malformed: strip query/fragment by hand
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(url: &str, codec: &str) -> Station {
        Station {
            uuid: "s".into(),
            url: url.into(),
            codec: codec.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_m3u8_path_is_adaptive() {
        for url in [
            "https://cdn.example/live/index.m3u8",
            "https://cdn.example/live/INDEX.M3U8",
            "https://cdn.example/live/index.m3u8?token=abc",
            "https://cdn.example/live/index.m3u8#frag",
            "live/index.m3u8?x=1",
        ] {
            assert_eq!(classify(&station(url, "AAC")), TransportKind::Adaptive, "{url}");
        }
    }

    #[test]
    fn test_hls_codec_is_adaptive() {
        assert_eq!(
            classify(&station("https://cdn.example/stream", "HLS")),
            TransportKind::Adaptive
        );
        assert_eq!(classify(&station("", " hls ")), TransportKind::Adaptive);
    }

    #[test]
    fn test_everything_else_is_progressive() {
        for (url, codec) in [
            ("https://ice.example/stream.mp3", "MP3"),
            ("https://ice.example/stream?format=m3u8", "AAC"),
            ("https://ice.example/m3u8/stream", "AAC+"),
            ("https://ice.example/playlist.m3u", "MP3"),
            ("", ""),
        ] {
            assert_eq!(
                classify(&station(url, codec)),
                TransportKind::Progressive,
                "{url}"
            );
        }
    }

    #[test]
    fn test_resolved_url_takes_precedence() {
        let s = Station {
            url: "https://ice.example/stream.mp3".into(),
            url_resolved: "https://cdn.example/live.m3u8".into(),
            ..Default::default()
        };
        assert_eq!(classify(&s), TransportKind::Adaptive);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let s = station("https://cdn.example/a.m3u8?b=c", "mp3");
        let first = classify(&s);
        for _ in 0..10 {
            assert_eq!(classify(&s), first);
        }
    }
}
