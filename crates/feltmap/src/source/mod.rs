//! Quake data sources.
//!
//! A [`QuakeSource`] lists quakes and the felt reports submitted for them.
//! The production implementation talks to the GeoNet API; tests plug in
//! fixed data. This module also holds the GeoJSON wire types both endpoints
//! answer with.

pub mod geonet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::geo::Coordinates;
use crate::report::{FeltReport, Quake};

pub use geonet::GeoNetClient;

/// A provider of quakes and felt reports.
#[async_trait]
pub trait QuakeSource: Send + Sync {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// List quakes whose modelled intensity is at least `min_mmi`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be reached or answers with
    /// something that is not a quake list.
    async fn quakes(&self, min_mmi: i32) -> Result<Vec<Quake>>;

    /// List the felt reports for one quake.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be reached, the ID is
    /// rejected, or the answer is not a report list.
    async fn felt_reports(&self, public_id: &str) -> Result<Vec<FeltReport>>;
}

/// A GeoJSON `FeatureCollection`.
#[derive(Debug, Deserialize)]
pub struct FeatureCollection<P> {
    /// The features; absent is treated as empty.
    #[serde(default = "Vec::new")]
    pub features: Vec<Feature<P>>,
}

/// A GeoJSON `Feature` with typed properties.
#[derive(Debug, Deserialize)]
pub struct Feature<P> {
    /// Point geometry, if any.
    pub geometry: Option<Geometry>,
    /// Endpoint-specific properties.
    pub properties: P,
}

/// A GeoJSON point geometry.
#[derive(Debug, Deserialize)]
pub struct Geometry {
    /// `[longitude, latitude]` or `[longitude, latitude, depth]`.
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

/// Properties of a feature from the quake endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuakeProperties {
    /// Catalogue identifier.
    #[serde(rename = "publicID")]
    pub public_id: String,
    /// Origin time.
    pub time: Option<DateTime<Utc>>,
    /// Depth in kilometres.
    pub depth: Option<f64>,
    /// Preferred magnitude.
    pub magnitude: Option<f64>,
    /// Modelled intensity.
    pub mmi: Option<i32>,
    /// Locality description.
    pub locality: Option<String>,
}

/// Properties of a feature from the reported-intensity endpoint.
#[derive(Debug, Deserialize)]
pub struct IntensityProperties {
    /// Reported intensity.
    pub mmi: f64,
    /// Number of reports aggregated at this point.
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

fn feature_location<P>(feature: &Feature<P>) -> Result<Coordinates> {
    let position = feature
        .geometry
        .as_ref()
        .map_or(&[][..], |g| g.coordinates.as_slice());
    Coordinates::from_geojson(position)
}

/// Parse a quake list body.
///
/// Features without usable coordinates are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the body is not a GeoJSON feature collection of
/// quakes.
pub fn parse_quakes(body: &str) -> Result<Vec<Quake>> {
    let collection: FeatureCollection<QuakeProperties> = serde_json::from_str(body)?;

    let quakes = collection
        .features
        .into_iter()
        .filter_map(|feature| match feature_location(&feature) {
            Ok(location) => {
                let p = feature.properties;
                Some(Quake {
                    public_id: p.public_id,
                    location,
                    time: p.time,
                    magnitude: p.magnitude,
                    depth_km: p.depth,
                    mmi: p.mmi,
                    locality: p.locality,
                })
            }
            Err(e) => {
                warn!("Skipping quake {}: {}", feature.properties.public_id, e);
                None
            }
        })
        .collect();

    Ok(quakes)
}

/// Parse a reported-intensity body.
///
/// Features without usable coordinates or with a non-finite intensity are
/// skipped with a warning.
///
/// # Errors
///
/// Returns an error if the body is not a GeoJSON feature collection of
/// intensity points.
pub fn parse_felt_reports(body: &str) -> Result<Vec<FeltReport>> {
    let collection: FeatureCollection<IntensityProperties> = serde_json::from_str(body)?;

    let reports = collection
        .features
        .into_iter()
        .filter_map(|feature| {
            let location = match feature_location(&feature) {
                Ok(location) => location,
                Err(e) => {
                    warn!("Skipping felt report: {}", e);
                    return None;
                }
            };
            if !feature.properties.mmi.is_finite() {
                warn!("Skipping felt report at {}: bad intensity", location);
                return None;
            }
            Some(FeltReport {
                location,
                mmi: feature.properties.mmi,
                count: feature.properties.count,
            })
        })
        .collect();

    Ok(reports)
}
