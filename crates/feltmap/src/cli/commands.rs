//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::geo::Coordinates;

/// Update command arguments.
#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// Only fetch quakes with at least this modelled intensity (-1 to 8)
    #[arg(
        short,
        long,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(-1..=8)
    )]
    pub min_mmi: Option<i32>,

    /// Do not write CSV files after updating
    #[arg(long)]
    pub no_export: bool,

    /// Directory to write CSV files to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Directory to write CSV files to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

/// Import command arguments.
#[derive(Debug, Args)]
pub struct ImportCommand {
    /// Sensitivity CSV to merge into storage
    #[arg(required_unless_present = "quakes")]
    pub file: Option<PathBuf>,

    /// Quake list CSV; its quakes are marked as processed
    #[arg(long, value_name = "FILE")]
    pub quakes: Option<PathBuf>,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Distance command arguments.
#[derive(Debug, Args)]
pub struct DistanceCommand {
    /// Epicentre as "LON,LAT"
    #[arg(allow_hyphen_values = true)]
    pub from: Coordinates,

    /// Felt location as "LON,LAT"
    #[arg(allow_hyphen_values = true)]
    pub to: Coordinates,

    /// Felt intensity; also prints the sensitivity factor
    #[arg(short, long)]
    pub mmi: Option<f64>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
