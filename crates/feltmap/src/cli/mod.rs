//! Command-line interface for feltmap.
//!
//! This module provides the CLI structure for the `feltmap` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DistanceCommand, ExportCommand, ImportCommand, StatusCommand, UpdateCommand,
};

/// feltmap - Map which areas feel earthquakes more than expected
///
/// Fetches felt reports for recent strong quakes from GeoNet, scores each
/// report location by intensity times distance from the epicentre, and
/// writes CSV files ready for a GIS.
#[derive(Debug, Parser)]
#[command(name = "feltmap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch new quakes and felt reports, then export
    Update(UpdateCommand),

    /// Write CSV files from stored data
    Export(ExportCommand),

    /// Merge a previously exported sensitivity CSV
    Import(ImportCommand),

    /// Show what is stored
    Status(StatusCommand),

    /// Compute distance and sensitivity for one pair of points
    Distance(DistanceCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
