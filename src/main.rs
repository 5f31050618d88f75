use anyhow::{bail, Context, Result};
use clap::Parser;
use scene_stack::config::{default_config_toml, PipelineConfig};
use scene_stack::s3::Provider;
use scene_stack::stac_operations::StacCatalog;
use scene_stack::tile_bounds::VectorBoundsTable;
use scene_stack::{DateOutcome, Pipeline};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

/// Download Landsat scenes matching change-detection layers and stack them
/// into composites.
#[derive(Parser, Debug)]
#[command(name = "scene-stack")]
#[command(version)]
struct Args {
    /// Directory holding one change-detection shapefile (repeatable)
    #[arg(long = "shp-dir")]
    shp_dirs: Vec<PathBuf>,

    /// File listing one directory per line (first comma separated column)
    #[arg(short, long)]
    dir_list: Option<PathBuf>,

    /// Pipeline configuration (TOML); the built-in DEA settings otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the built-in configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

fn read_dir_list(path: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Unable to read directory list {}", path.display()))?;
    Ok(parse_dir_list(&content))
}

fn parse_dir_list(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// The error followed by its chain of causes.
fn describe(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scene_stack=info")),
        )
        .init();

    let args = Args::parse();

    if let Some(path) = &args.write_config {
        PipelineConfig::write_default(path)?;
        info!("Default configuration written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &args.config {
        Some(path) => PipelineConfig::read(path)
            .with_context(|| format!("Unable to load config {}", path.display()))?,
        None => PipelineConfig::from_template(&default_config_toml())?,
    };

    let mut dirs = args.shp_dirs.clone();
    if let Some(list) = &args.dir_list {
        dirs.extend(read_dir_list(list)?);
    }
    if dirs.is_empty() {
        bail!("Nothing to do: pass --shp-dir or --dir-list");
    }

    let catalog = StacCatalog::new(&config.catalog_url);
    let store = Provider::connect(&config.storage.region, config.storage.unsigned_requests).await;
    let bounds = VectorBoundsTable::new(&config.bounds_table, &config.tile_field);
    let pipeline = Pipeline::new(catalog, store, bounds, config)?;

    let mut failed = 0;
    for dir in &dirs {
        info!("Processing {}", dir.display());
        match pipeline.run(dir).await {
            Ok(report) => {
                for outcome in &report.outcomes {
                    match outcome {
                        DateOutcome::Resolved {
                            collection,
                            composite,
                            ..
                        } => info!(
                            "{}: {} composite {}",
                            outcome.date(),
                            collection,
                            composite.path.display()
                        ),
                        // Already reported by the pipeline
                        DateOutcome::NoCoverage { .. } => {}
                        DateOutcome::Failed { error, .. } => {
                            error!("{}: {}", outcome.date(), describe(error))
                        }
                    }
                }
                if report.has_failures() {
                    failed += 1;
                }
            }
            Err(e) => {
                let scope = if e.is_directory_wide() { "skipped" } else { "failed" };
                error!("{} {}: {}", dir.display(), scope, describe(&e));
                failed += 1;
            }
        }
    }

    info!("{} of {} directories completed", dirs.len() - failed, dirs.len());
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
