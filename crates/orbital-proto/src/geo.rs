//! Geographic helpers for globe interaction.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;

use crate::protocol::{Coordinates, Station};

/// Mean Earth radius in km.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A click within this distance of a station selects it.
pub const CLICK_SNAP_KM: f64 = 637.0;

/// Stations within this distance of the click are listed alongside.
pub const NEARBY_KM: f64 = 255.0;

/// Great-circle distance (haversine).
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Result of clicking the globe near stations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationClick {
    pub station: Station,
    pub nearby: Vec<Station>,
}

/// Resolve a click at `point` into the closest station and its neighbours.
///
/// `None` when no station with coordinates lies within [`CLICK_SNAP_KM`].
/// `nearby` is ordered by distance and never empty: it falls back to the
/// clicked station itself.
pub fn resolve_click(stations: &[Station], point: Coordinates) -> Option<StationClick> {
    let mut located: Vec<(f64, &Station)> = stations
        .iter()
        .filter_map(|s| s.coordinates().map(|c| (distance_km(point, c), s)))
        .collect();
    located.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (closest_km, closest) = *located.first()?;
    if closest_km >= CLICK_SNAP_KM {
        return None;
    }

    let mut nearby: Vec<Station> = located
        .iter()
        .take_while(|(km, _)| *km < NEARBY_KM)
        .map(|(_, s)| (*s).clone())
        .collect();
    if nearby.is_empty() {
        nearby.push(closest.clone());
    }

    Some(StationClick {
        station: closest.clone(),
        nearby,
    })
}

/// Local wall-clock time approximated from longitude (15° per hour).
pub fn approximate_local_time(longitude: f64, now: DateTime<Utc>) -> NaiveTime {
    let offset_hours = (longitude / 15.0).round() as i64;
    (now + Duration::hours(offset_hours)).time()
}
