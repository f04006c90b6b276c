//! Core record types for feltmap.
//!
//! This module defines quakes, the felt reports submitted for them, and the
//! derived sensitivity records and map points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;

/// An earthquake as listed by the quake catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quake {
    /// Catalogue identifier, e.g. `2016p858000`.
    pub public_id: String,

    /// Epicentre.
    pub location: Coordinates,

    /// Origin time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    /// Preferred magnitude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,

    /// Depth below the surface in kilometres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_km: Option<f64>,

    /// Modelled Modified Mercalli Intensity at the epicentre.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmi: Option<i32>,

    /// Human-readable description of where the quake was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

impl Quake {
    /// Create a quake with only the fields the analysis needs.
    #[must_use]
    pub fn new(public_id: impl Into<String>, location: Coordinates) -> Self {
        Self {
            public_id: public_id.into(),
            location,
            time: None,
            magnitude: None,
            depth_km: None,
            mmi: None,
            locality: None,
        }
    }
}

/// Aggregated public felt reports at one location for one quake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeltReport {
    /// Where the shaking was felt.
    pub location: Coordinates,

    /// Reported Modified Mercalli Intensity.
    pub mmi: f64,

    /// Number of individual reports aggregated at this location.
    pub count: u32,
}

impl FeltReport {
    /// Create a report for a single observation.
    #[must_use]
    pub fn new(location: Coordinates, mmi: f64) -> Self {
        Self {
            location,
            mmi,
            count: 1,
        }
    }
}

/// The sensitivity factor: felt intensity multiplied by epicentral distance.
#[must_use]
pub fn sensitivity_factor(mmi: f64, distance_km: f64) -> f64 {
    mmi * distance_km
}

/// A felt report with its distance to the epicentre and sensitivity factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRecord {
    /// The quake this report belongs to, when known.
    ///
    /// Records merged from older exports may not carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,

    /// Where the shaking was felt.
    pub location: Coordinates,

    /// Reported intensity.
    pub mmi: f64,

    /// Great-circle distance from the epicentre in kilometres.
    pub distance_km: f64,

    /// `mmi * distance_km`.
    pub sensitivity: f64,
}

impl SensitivityRecord {
    /// Build a record, computing the sensitivity factor.
    #[must_use]
    pub fn new(
        public_id: Option<String>,
        location: Coordinates,
        mmi: f64,
        distance_km: f64,
    ) -> Self {
        Self {
            public_id,
            location,
            mmi,
            distance_km,
            sensitivity: sensitivity_factor(mmi, distance_km),
        }
    }
}

/// One row of the map layer: a location and its highest sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    /// Longitude in degrees.
    pub longitude: f64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Highest sensitivity factor seen at this location.
    pub sensitivity: f64,
}

impl From<&SensitivityRecord> for MapPoint {
    fn from(record: &SensitivityRecord) -> Self {
        Self {
            longitude: record.location.longitude,
            latitude: record.location.latitude,
            sensitivity: record.sensitivity,
        }
    }
}
