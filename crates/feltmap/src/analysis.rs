//! Sensitivity analysis.
//!
//! Turns the felt reports of a quake into sensitivity records, and collapses
//! sensitivity records into one map point per location.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::config::AnalysisConfig;
use crate::report::{FeltReport, MapPoint, Quake, SensitivityRecord};

/// Result of assessing one quake's felt reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assessment {
    /// Reports that passed validation, with sensitivity computed.
    pub records: Vec<SensitivityRecord>,
    /// Reports dropped because they were implausibly far from the epicentre.
    pub rejected: usize,
}

/// Compute sensitivity records for a quake's felt reports.
///
/// A report further than `config.max_distance_km` from the epicentre is
/// dropped; such distances only come from bad coordinates.
#[must_use]
pub fn assess(quake: &Quake, reports: &[FeltReport], config: &AnalysisConfig) -> Assessment {
    let mut assessment = Assessment::default();

    for report in reports {
        let distance_km = quake.location.distance_km(&report.location);
        if distance_km > config.max_distance_km {
            debug!(
                "Dropping report at {} for {}: {:.1} km from epicentre",
                report.location, quake.public_id, distance_km
            );
            assessment.rejected += 1;
            continue;
        }

        assessment.records.push(SensitivityRecord::new(
            Some(quake.public_id.clone()),
            report.location,
            report.mmi,
            distance_km,
        ));
    }

    assessment
}

/// Collapse sensitivity records into map points.
///
/// Points west of `min_longitude` are dropped. For every remaining location
/// only the highest sensitivity is kept. The result is ordered by ascending
/// sensitivity, then by longitude and latitude.
#[must_use]
pub fn collate_map_points(records: &[SensitivityRecord], min_longitude: f64) -> Vec<MapPoint> {
    let mut best: HashMap<(i64, i64), MapPoint> = HashMap::new();

    for record in records {
        if record.location.longitude < min_longitude {
            continue;
        }
        let candidate = MapPoint::from(record);
        best.entry(record.location.grid_key())
            .and_modify(|current| {
                if candidate.sensitivity > current.sensitivity {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mut points: Vec<MapPoint> = best.into_values().collect();
    points.sort_by(compare_points);
    points
}

fn compare_points(a: &MapPoint, b: &MapPoint) -> Ordering {
    a.sensitivity
        .total_cmp(&b.sensitivity)
        .then_with(|| a.longitude.total_cmp(&b.longitude))
        .then_with(|| a.latitude.total_cmp(&b.latitude))
}
