//! Geographic primitives.
//!
//! Coordinates follow GeoJSON ordering: longitude first, then latitude,
//! both in decimal degrees.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Resolution of [`Coordinates::grid_key`], in steps per degree.
const GRID_STEPS_PER_DEGREE: f64 = 1_000_000.0;

/// A point on the Earth's surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Longitude in degrees, east positive.
    pub longitude: f64,
    /// Latitude in degrees, north positive.
    pub latitude: f64,
}

impl Coordinates {
    /// Create validated coordinates.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is not finite or is out of range.
    pub fn new(longitude: f64, latitude: f64) -> Result<Self> {
        if !longitude.is_finite() || !latitude.is_finite() {
            return Err(Error::invalid_coordinates(format!(
                "non-finite value ({longitude}, {latitude})"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::invalid_coordinates(format!(
                "longitude {longitude} out of range"
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::invalid_coordinates(format!(
                "latitude {latitude} out of range"
            )));
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }

    /// Build coordinates from a GeoJSON position array.
    ///
    /// Any elements past the second (depth, for quakes) are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two elements are present or the
    /// values are invalid.
    pub fn from_geojson(position: &[f64]) -> Result<Self> {
        match position {
            [longitude, latitude, ..] => Self::new(*longitude, *latitude),
            _ => Err(Error::invalid_coordinates(format!(
                "expected [longitude, latitude], got {} value(s)",
                position.len()
            ))),
        }
    }

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        haversine_km(self, other)
    }

    /// Key under which two points count as the same location.
    ///
    /// Values are quantised to a micro-degree grid (roughly 0.1 m).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn grid_key(&self) -> (i64, i64) {
        (
            (self.longitude * GRID_STEPS_PER_DEGREE).round() as i64,
            (self.latitude * GRID_STEPS_PER_DEGREE).round() as i64,
        )
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.longitude, self.latitude)
    }
}

impl FromStr for Coordinates {
    type Err = Error;

    /// Parse `"[lon, lat]"` or `"lon, lat"`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(trimmed);

        let values = inner
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::invalid_coordinates(format!("cannot parse {s:?}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_geojson(&values)
    }
}

/// Haversine great-circle distance between two points, in kilometres.
#[must_use]
pub fn haversine_km(a: &Coordinates, b: &Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair over 1 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}
