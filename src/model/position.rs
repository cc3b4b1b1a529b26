//! Geographic Position
//!
//! Value type for a player or marker location. Replaced wholesale on
//! update, never merged field-by-field.

use serde::{Deserialize, Serialize};

use crate::model::now_secs;

/// Earth radius in meters (spherical approximation).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic position with heading and accuracy metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Heading in degrees clockwise from north.
    #[serde(default)]
    pub heading: f64,
    /// Horizontal accuracy in meters.
    #[serde(default)]
    pub accuracy: f64,
    /// Elevation in meters.
    #[serde(default)]
    pub elevation: f64,
    /// When this position was last replaced (unix seconds).
    #[serde(default = "now_secs")]
    pub updated_at: f64,
}

impl Position {
    /// Create a position at the given coordinates, timestamped now.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            heading: 0.0,
            accuracy: 0.0,
            elevation: 0.0,
            updated_at: now_secs(),
        }
    }

    /// Great-circle distance to another position in meters.
    ///
    /// Haversine formula over a spherical earth. Used to suppress
    /// redundant position broadcasts under GPS jitter.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}
