//! CSV export and import.
//!
//! Three files are produced: the processed quake list, the full sensitivity
//! table, and the map layer (one row per location, highest sensitivity)
//! that is loaded into the mapping software. Quake lists and sensitivity
//! tables can be read back, including the older layouts keyed by
//! `properties.publicID`, `properties.mmi`, `geometry.coordinates` and
//! `distance` columns.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::collate_map_points;
use crate::config::{AnalysisConfig, ExportConfig};
use crate::error::{Error, Result};
use crate::geo::Coordinates;
use crate::report::{MapPoint, Quake, SensitivityRecord};
use crate::storage::Storage;

#[derive(Debug, Serialize)]
struct QuakeRow<'a> {
    public_id: &'a str,
    longitude: f64,
    latitude: f64,
    time: Option<String>,
    magnitude: Option<f64>,
    depth_km: Option<f64>,
    mmi: Option<i32>,
    locality: Option<&'a str>,
}

impl<'a> From<&'a Quake> for QuakeRow<'a> {
    fn from(quake: &'a Quake) -> Self {
        Self {
            public_id: &quake.public_id,
            longitude: quake.location.longitude,
            latitude: quake.location.latitude,
            time: quake.time.map(|t| t.to_rfc3339()),
            magnitude: quake.magnitude,
            depth_km: quake.depth_km,
            mmi: quake.mmi,
            locality: quake.locality.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SensitivityRow<'a> {
    public_id: Option<&'a str>,
    longitude: f64,
    latitude: f64,
    mmi: f64,
    distance_km: f64,
    sensitivity: f64,
}

impl<'a> From<&'a SensitivityRecord> for SensitivityRow<'a> {
    fn from(record: &'a SensitivityRecord) -> Self {
        Self {
            public_id: record.public_id.as_deref(),
            longitude: record.location.longitude,
            latitude: record.location.latitude,
            mmi: record.mmi,
            distance_km: record.distance_km,
            sensitivity: record.sensitivity,
        }
    }
}

/// Map layer row; header spelling is what the GIS import expects.
#[derive(Debug, Serialize)]
struct MapPointRow {
    #[serde(rename = "Longitude")]
    longitude: f64,
    #[serde(rename = "Latitude")]
    latitude: f64,
    #[serde(rename = "Sensitivity")]
    sensitivity: f64,
}

/// A sensitivity row as read back, in either layout.
#[derive(Debug, Deserialize)]
struct ImportRow {
    #[serde(default, alias = "properties.publicID")]
    public_id: Option<String>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default, rename = "geometry.coordinates")]
    coordinates: Option<String>,
    #[serde(alias = "properties.mmi")]
    mmi: f64,
    #[serde(alias = "distance")]
    distance_km: f64,
}

impl ImportRow {
    fn into_record(self, line: u64) -> Result<SensitivityRecord> {
        let location = match (self.longitude, self.latitude, self.coordinates.as_deref()) {
            (Some(lon), Some(lat), _) => Coordinates::new(lon, lat),
            (_, _, Some(text)) => text.parse(),
            _ => return Err(Error::invalid_record(line, "missing coordinates")),
        }
        .map_err(|e| Error::invalid_record(line, e.to_string()))?;

        if !self.mmi.is_finite() {
            return Err(Error::invalid_record(line, "intensity is not a number"));
        }
        if !(self.distance_km.is_finite() && self.distance_km >= 0.0) {
            return Err(Error::invalid_record(
                line,
                format!("distance {} is not a non-negative number", self.distance_km),
            ));
        }

        let public_id = self.public_id.filter(|id| !id.trim().is_empty());
        Ok(SensitivityRecord::new(
            public_id,
            location,
            self.mmi,
            self.distance_km,
        ))
    }
}

/// A quake list row as read back, in either layout.
#[derive(Debug, Deserialize)]
struct QuakeImportRow {
    #[serde(alias = "properties.publicID")]
    public_id: String,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default, rename = "geometry.coordinates")]
    coordinates: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    magnitude: Option<f64>,
    #[serde(default)]
    depth_km: Option<f64>,
    #[serde(default)]
    mmi: Option<i32>,
    #[serde(default)]
    locality: Option<String>,
}

impl QuakeImportRow {
    fn into_quake(self, line: u64) -> Result<Quake> {
        let public_id = self.public_id.trim();
        if public_id.is_empty() {
            return Err(Error::invalid_record(line, "missing quake ID"));
        }

        let location = match (self.longitude, self.latitude, self.coordinates.as_deref()) {
            (Some(lon), Some(lat), _) => Coordinates::new(lon, lat),
            (_, _, Some(text)) => text.parse(),
            _ => return Err(Error::invalid_record(line, "missing coordinates")),
        }
        .map_err(|e| Error::invalid_record(line, e.to_string()))?;

        let time = match self.time.as_deref() {
            None => None,
            Some(text) => Some(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|e| Error::invalid_record(line, format!("bad time {text:?}: {e}")))?
                    .with_timezone(&Utc),
            ),
        };

        let mut quake = Quake::new(public_id, location);
        quake.time = time;
        quake.magnitude = self.magnitude;
        quake.depth_km = self.depth_km;
        quake.mmi = self.mmi;
        quake.locality = self.locality;
        Ok(quake)
    }
}

/// Write the quake list as CSV.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_quakes<W: Write>(writer: W, quakes: &[Quake]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for quake in quakes {
        wtr.serialize(QuakeRow::from(quake))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the sensitivity table as CSV.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_sensitivity<W: Write>(writer: W, records: &[SensitivityRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(SensitivityRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the map layer as CSV.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_map_points<W: Write>(writer: W, points: &[MapPoint]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for point in points {
        wtr.serialize(MapPointRow {
            longitude: point.longitude,
            latitude: point.latitude,
            sensitivity: point.sensitivity,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a sensitivity table.
///
/// Sensitivity is recomputed from intensity and distance rather than taken
/// from the file.
///
/// # Errors
///
/// Returns an error on malformed CSV or on the first row that lacks usable
/// coordinates, intensity or distance.
pub fn read_sensitivity<R: Read>(reader: R) -> Result<Vec<SensitivityRecord>> {
    read_rows(reader, ImportRow::into_record)
}

/// Read a sensitivity table from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or parsed.
pub fn read_sensitivity_file(path: &Path) -> Result<Vec<SensitivityRecord>> {
    let file = File::open(path)?;
    read_sensitivity(file)
}

/// Read a quake list.
///
/// # Errors
///
/// Returns an error on malformed CSV or on the first row without a quake ID
/// or usable coordinates.
pub fn read_quakes<R: Read>(reader: R) -> Result<Vec<Quake>> {
    read_rows(reader, QuakeImportRow::into_quake)
}

/// Read a quake list from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or parsed.
pub fn read_quakes_file(path: &Path) -> Result<Vec<Quake>> {
    let file = File::open(path)?;
    read_quakes(file)
}

/// Deserialize every row and convert it, passing along the line the row
/// starts on.
fn read_rows<R, T, U>(reader: R, mut convert: impl FnMut(T, u64) -> Result<U>) -> Result<Vec<U>>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let mut record = csv::StringRecord::new();
    let mut rows = Vec::new();

    while rdr.read_record(&mut record)? {
        let line = record.position().map_or(0, csv::Position::line);
        let row: T = record.deserialize(Some(&headers))?;
        rows.push(convert(row, line)?);
    }

    Ok(rows)
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// Rows in the quake list.
    pub quakes: usize,
    /// Rows in the sensitivity table.
    pub records: usize,
    /// Rows in the map layer.
    pub map_points: usize,
    /// Files written.
    pub files: Vec<PathBuf>,
}

/// Export everything in storage to the configured output directory.
///
/// # Errors
///
/// Returns an error if reading storage, creating the directory, or writing
/// any file fails.
pub fn export_all(
    storage: &Storage,
    export: &ExportConfig,
    analysis: &AnalysisConfig,
) -> Result<ExportSummary> {
    if !export.output_dir.exists() {
        std::fs::create_dir_all(&export.output_dir).map_err(|source| Error::DirectoryCreate {
            path: export.output_dir.clone(),
            source,
        })?;
    }

    let quakes = storage.quakes()?;
    let records = storage.records()?;
    let points = collate_map_points(&records, analysis.min_longitude);

    let quakes_path = export.quakes_path();
    write_quakes(File::create(&quakes_path)?, &quakes)?;

    let sensitivity_path = export.sensitivity_path();
    write_sensitivity(File::create(&sensitivity_path)?, &records)?;

    let map_path = export.map_path();
    write_map_points(File::create(&map_path)?, &points)?;

    info!(
        "Exported {} quake(s), {} record(s), {} map point(s) to {}",
        quakes.len(),
        records.len(),
        points.len(),
        export.output_dir.display()
    );

    Ok(ExportSummary {
        quakes: quakes.len(),
        records: records.len(),
        map_points: points.len(),
        files: vec![quakes_path, sensitivity_path, map_path],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lon: f64, lat: f64) -> Coordinates {
        Coordinates::new(lon, lat).unwrap()
    }

    fn to_string(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_write_quakes() {
        let mut quake = Quake::new("2016p858000", point(173.02, -42.69));
        quake.magnitude = Some(7.8);
        quake.locality = Some("Culverden, Canterbury".to_string());

        let out = to_string(|buf| write_quakes(buf, &[quake]));
        let mut lines = out.lines();

        assert_eq!(
            lines.next(),
            Some("public_id,longitude,latitude,time,magnitude,depth_km,mmi,locality")
        );
        assert_eq!(
            lines.next(),
            Some("2016p858000,173.02,-42.69,,7.8,,,\"Culverden, Canterbury\"")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_write_sensitivity() {
        let records = [
            SensitivityRecord::new(Some("q1".to_string()), point(174.5, -41.5), 4.0, 10.5),
            SensitivityRecord::new(None, point(175.0, -40.0), 3.0, 2.0),
        ];

        let out = to_string(|buf| write_sensitivity(buf, &records));
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(
            lines[0],
            "public_id,longitude,latitude,mmi,distance_km,sensitivity"
        );
        assert_eq!(lines[1], "q1,174.5,-41.5,4.0,10.5,42.0");
        assert_eq!(lines[2], ",175.0,-40.0,3.0,2.0,6.0");
    }

    #[test]
    fn test_write_map_points_headers() {
        let points = [MapPoint {
            longitude: 172.6,
            latitude: -43.5,
            sensitivity: 250.0,
        }];

        let out = to_string(|buf| write_map_points(buf, &points));
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "Longitude,Latitude,Sensitivity");
        assert_eq!(lines[1], "172.6,-43.5,250.0");
    }

    #[test]
    fn test_read_own_layout() {
        let records = [
            SensitivityRecord::new(Some("q1".to_string()), point(174.5, -41.5), 4.0, 10.5),
            SensitivityRecord::new(None, point(175.0, -40.0), 3.0, 2.0),
        ];
        let out = to_string(|buf| write_sensitivity(buf, &records));

        let read = read_sensitivity(out.as_bytes()).unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_read_legacy_layout() {
        let legacy = "\
,properties.mmi,geometry.coordinates,distance,sensitivity
0,4,\"[174.78, -41.29]\",212.5,850.0
1,5,\"[172.63, -43.53]\",95.0,475.0
";
        let records = read_sensitivity(legacy.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].public_id.is_none());
        assert_eq!(records[0].location, point(174.78, -41.29));
        assert_eq!(records[0].mmi, 4.0);
        assert_eq!(records[0].distance_km, 212.5);
        assert_eq!(records[0].sensitivity, 850.0);
        assert_eq!(records[1].sensitivity, 475.0);
    }

    #[test]
    fn test_read_recomputes_sensitivity() {
        let csv = "\
public_id,longitude,latitude,mmi,distance_km,sensitivity
q1,174.5,-41.5,2.0,10.0,9999.0
";
        let records = read_sensitivity(csv.as_bytes()).unwrap();
        assert_eq!(records[0].sensitivity, 20.0);
    }

    #[test]
    fn test_read_missing_coordinates() {
        let csv = "\
public_id,mmi,distance_km
q1,4,10
";
        let err = read_sensitivity(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { line: 2, .. }), "got {err:?}");
    }

    #[test]
    fn test_read_negative_distance() {
        let csv = "\
public_id,longitude,latitude,mmi,distance_km
q1,174.5,-41.5,4,10
q1,174.6,-41.5,4,-3
";
        let err = read_sensitivity(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { line: 3, .. }), "got {err:?}");
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn test_read_line_follows_multiline_fields() {
        let csv = "\
public_id,longitude,latitude,mmi,distance_km
\"q
1\",174.5,-41.5,4,10
q2,174.6,-41.5,4,-3
";
        let err = read_sensitivity(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { line: 4, .. }), "got {err:?}");
    }

    #[test]
    fn test_read_quakes_own_layout() {
        let mut quake = Quake::new("2016p858000", point(173.02, -42.69));
        quake.magnitude = Some(7.8);
        quake.mmi = Some(8);
        quake.locality = Some("Culverden, Canterbury".to_string());
        let out = to_string(|buf| write_quakes(buf, std::slice::from_ref(&quake)));

        let read = read_quakes(out.as_bytes()).unwrap();
        assert_eq!(read, vec![quake]);
    }

    #[test]
    fn test_read_quakes_legacy_layout() {
        let legacy = "\
,properties.publicID,geometry.coordinates
0,2016p858000,\"[173.02, -42.69]\"
1,2021p405872,\"[176.2, -38.1]\"
";
        let quakes = read_quakes(legacy.as_bytes()).unwrap();

        assert_eq!(quakes.len(), 2);
        assert_eq!(quakes[0].public_id, "2016p858000");
        assert_eq!(quakes[0].location, point(173.02, -42.69));
        assert!(quakes[0].time.is_none());
        assert_eq!(quakes[1].public_id, "2021p405872");
    }

    #[test]
    fn test_read_quakes_with_time() {
        let csv = "\
public_id,longitude,latitude,time
2016p858000,173.02,-42.69,2016-11-13T11:02:56+00:00
";
        let quakes = read_quakes(csv.as_bytes()).unwrap();
        let time = quakes[0].time.unwrap();
        assert_eq!(time.to_rfc3339(), "2016-11-13T11:02:56+00:00");
    }

    #[test]
    fn test_read_quakes_missing_id() {
        let csv = "\
public_id,longitude,latitude
2016p858000,173.02,-42.69
,176.2,-38.1
";
        let err = read_quakes(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { line: 3, .. }), "got {err:?}");
    }

    #[test]
    fn test_read_quakes_bad_time() {
        let csv = "\
public_id,longitude,latitude,time
2016p858000,173.02,-42.69,last tuesday
";
        let err = read_quakes(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { line: 2, .. }), "got {err:?}");
    }

    #[test]
    fn test_read_bad_number_is_csv_error() {
        let csv = "\
public_id,longitude,latitude,mmi,distance_km
q1,174.5,-41.5,four,10
";
        let err = read_sensitivity(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Csv(_)));
    }

    #[test]
    fn test_export_all_writes_three_files() {
        let storage = Storage::open_in_memory().unwrap();
        let quake = Quake::new("2016p858000", point(173.0, -42.7));
        let records = vec![
            SensitivityRecord::new(Some("2016p858000".to_string()), point(174.8, -41.3), 5.0, 215.0),
            SensitivityRecord::new(Some("2016p858000".to_string()), point(172.6, -43.5), 6.0, 95.0),
        ];
        storage.record_quake(&quake, 2, &records).unwrap();
        // Same place as the first record, lower sensitivity; merged away on the map
        storage
            .insert_records(&[SensitivityRecord::new(None, point(174.8, -41.3), 1.0, 215.0)])
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let export = ExportConfig {
            output_dir: dir.path().join("out"),
            ..ExportConfig::default()
        };

        let summary = export_all(&storage, &export, &AnalysisConfig::default()).unwrap();

        assert_eq!(summary.quakes, 1);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.map_points, 2);
        assert_eq!(summary.files.len(), 3);
        for file in &summary.files {
            assert!(file.exists(), "{} missing", file.display());
        }

        let map = std::fs::read_to_string(export.map_path()).unwrap();
        let lines: Vec<&str> = map.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "172.6,-43.5,570.0");
        assert_eq!(lines[2], "174.8,-41.3,1075.0");

        let reread = read_sensitivity_file(&export.sensitivity_path()).unwrap();
        assert_eq!(reread.len(), 3);
    }
}
