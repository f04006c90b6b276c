//! `feltmap` - CLI for feltmap
//!
//! This binary fetches felt reports, maintains the local store and writes
//! the CSV exports.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use feltmap::cli::{
    Cli, Command, ConfigCommand, DistanceCommand, ExportCommand, ImportCommand, UpdateCommand,
};
use feltmap::export::{export_all, read_quakes_file, read_sensitivity_file, ExportSummary};
use feltmap::report::sensitivity_factor;
use feltmap::{init_logging, Config, GeoNetClient, Storage, Updater};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Update(cmd) => handle_update(config, cmd).await,
        Command::Export(cmd) => handle_export(config, &cmd),
        Command::Import(cmd) => handle_import(&config, &cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Distance(cmd) => {
            handle_distance(&cmd);
            Ok(())
        }
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("cannot open store {}", path.display()))
}

fn with_output_dir(mut config: Config, output_dir: Option<PathBuf>) -> Config {
    if let Some(dir) = output_dir {
        config.export.output_dir = dir;
    }
    config
}

async fn handle_update(config: Config, cmd: UpdateCommand) -> anyhow::Result<()> {
    let config = with_output_dir(config, cmd.output_dir);
    let min_mmi = cmd.min_mmi.unwrap_or(config.api.min_mmi);

    let storage = open_storage(&config)?;
    let client = GeoNetClient::new(&config.api)?;

    info!("Checking {} for quakes at MMI {} or above", client.base_url(), min_mmi);
    let summary = Updater::new(&client, &storage, &config.analysis, min_mmi)
        .run()
        .await?;

    if summary.is_empty() {
        println!("There are no new quakes to add.");
    } else {
        println!(
            "Added {} quake(s): {} felt report point(s), {} sensitivity record(s), {} rejected as too distant.",
            summary.quakes_recorded(),
            summary.reports_fetched,
            summary.records_stored,
            summary.rejected_reports
        );
        if summary.quakes_without_reports > 0 {
            println!(
                "{} quake(s) had no felt reports.",
                summary.quakes_without_reports
            );
        }
    }

    if !cmd.no_export {
        let exported = export_all(&storage, &config.export, &config.analysis)?;
        print_export(&exported);
    }

    if summary.failed_quakes > 0 {
        anyhow::bail!(
            "{} quake(s) could not be fetched; run update again to retry them",
            summary.failed_quakes
        );
    }
    Ok(())
}

fn handle_export(config: Config, cmd: &ExportCommand) -> anyhow::Result<()> {
    let config = with_output_dir(config, cmd.output_dir.clone());
    let storage = open_storage(&config)?;
    let exported = export_all(&storage, &config.export, &config.analysis)?;
    print_export(&exported);
    Ok(())
}

fn print_export(summary: &ExportSummary) {
    println!(
        "Wrote {} quake(s), {} sensitivity record(s), {} map point(s):",
        summary.quakes, summary.records, summary.map_points
    );
    for file in &summary.files {
        println!("  {}", file.display());
    }
}

fn handle_import(config: &Config, cmd: &ImportCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;

    if let Some(path) = &cmd.quakes {
        let quakes = read_quakes_file(path)
            .with_context(|| format!("cannot import {}", path.display()))?;
        let marked = storage.mark_processed(&quakes)?;
        println!(
            "Marked {} of {} quake(s) from {} as processed ({} already stored).",
            marked,
            quakes.len(),
            path.display(),
            quakes.len() - marked
        );
    }

    if let Some(path) = &cmd.file {
        let records = read_sensitivity_file(path)
            .with_context(|| format!("cannot import {}", path.display()))?;
        let stored = storage.insert_records(&records)?;
        println!(
            "Imported {} of {} record(s) from {} ({} already stored).",
            stored,
            records.len(),
            path.display(),
            records.len() - stored
        );
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let never = || "never".to_string();
        println!("feltmap status");
        println!("--------------");
        println!("Database:           {}", storage.path().display());
        println!("Size:               {} bytes", stats.db_size_bytes);
        println!("Quakes processed:   {}", stats.total_quakes);
        println!("  without reports:  {}", stats.quakes_without_reports);
        println!("Sensitivity rows:   {}", stats.total_records);
        println!(
            "Newest quake:       {}",
            stats.newest_quake.map_or_else(never, |t| t.to_rfc3339())
        );
        println!(
            "Last update:        {}",
            stats.last_update.map_or_else(never, |t| t.to_rfc3339())
        );
    }
    Ok(())
}

fn handle_distance(cmd: &DistanceCommand) {
    let distance_km = cmd.from.distance_km(&cmd.to);
    println!("Distance:    {distance_km:.3} km");
    if let Some(mmi) = cmd.mmi {
        println!("Sensitivity: {:.3}", sensitivity_factor(mmi, distance_km));
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[API]");
                println!("  Base URL:           {}", config.api.base_url);
                println!("  Timeout (s):        {}", config.api.timeout_secs);
                println!("  Max retries:        {}", config.api.max_retries);
                println!("  Minimum MMI:        {}", config.api.min_mmi);
                println!();
                println!("[Analysis]");
                println!("  Max distance (km):  {}", config.analysis.max_distance_km);
                println!("  Min longitude:      {}", config.analysis.min_longitude);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Export]");
                println!("  Output directory:   {}", config.export.output_dir.display());
                println!("  Quakes file:        {}", config.export.quakes_file);
                println!("  Sensitivity file:   {}", config.export.sensitivity_file);
                println!("  Map file:           {}", config.export.map_file);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
