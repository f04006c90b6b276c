//! `feltmap` - Earthquake felt-report sensitivity mapping
//!
//! This library fetches quakes and their public felt reports from GeoNet,
//! scores every report location by felt intensity times distance from the
//! epicentre, keeps the results in a local `SQLite` store, and exports them
//! as CSV for a GIS.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod geo;
pub mod logging;
pub mod report;
pub mod source;
pub mod storage;
pub mod update;

pub use config::Config;
pub use error::{Error, Result};
pub use geo::Coordinates;
pub use logging::init_logging;
pub use report::{FeltReport, MapPoint, Quake, SensitivityRecord};
pub use source::{GeoNetClient, QuakeSource};
pub use storage::{Storage, StorageStats};
pub use update::{UpdateSummary, Updater};
