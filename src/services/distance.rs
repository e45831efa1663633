use serde::{Deserialize, Serialize};

/// Mean earth radius used by the haversine formula (WGS84 approximation)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 point. Serialized as `{"lat": .., "lng": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(rename = "lat", alias = "latitude")]
    pub latitude: f64,
    #[serde(rename = "lng", alias = "longitude")]
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Distance between two points, in kilometres.
pub trait DistanceProvider: Send + Sync {
    fn distance_km(&self, from: &Coordinates, to: &Coordinates) -> f64;
}

/// Great-circle distance on a spherical earth.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineDistance;

impl DistanceProvider for HaversineDistance {
    fn distance_km(&self, from: &Coordinates, to: &Coordinates) -> f64 {
        haversine_km(from, to)
    }
}

/// Great-circle distance between two coordinates in kilometres.
pub fn haversine_km(from: &Coordinates, to: &Coordinates) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lng = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Rounds a distance to whole tenths of a kilometre (35.04 km -> 350).
pub fn to_tenths_km(distance_km: f64) -> i64 {
    if !distance_km.is_finite() || distance_km <= 0.0 {
        return 0;
    }
    (distance_km * 10.0).round() as i64
}
