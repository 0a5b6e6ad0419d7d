use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use stitch_catalog::api::{
    ApiResponse, ExportDesignRequest, ListMediaRequest, RegisterMediumRequest,
    RemoveFromMediumRequest,
};
use stitch_catalog::preview::{import_designs_async, PecIconRenderer};
use stitch_catalog::{Catalog, Config, MediaService};

#[derive(Parser)]
#[command(name = "stitch-catalog")]
#[command(about = "Embroidery design catalog and USB media export", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the catalog database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Override the directory removable devices are mounted under
    #[arg(long, global = true)]
    mount_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices
    List {
        /// Only show registered media
        #[arg(long)]
        registered_only: bool,
    },
    /// Show the designs on a registered medium
    Contents { medium_id: i64 },
    /// Register a connected device
    Register {
        /// Directory name the device is mounted under
        current_name: String,
        /// Name to register it as
        new_name: String,
    },
    /// Copy a design onto a medium
    Export { design_id: i64, medium_id: i64 },
    /// Delete a design from a medium
    Remove { medium_id: i64, design_id: i64 },
    /// Check a medium's manifest against its files and the catalog
    Verify { medium_id: i64 },
    /// Import the design files in the patterns directory
    Import,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(mount_root) = cli.mount_root {
        config.mount_root = mount_root;
    }

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let catalog = Arc::new(Catalog::open(&config.database_path)?);
    let service = MediaService::new(catalog.clone(), &config);

    match cli.command {
        Commands::List { registered_only } => {
            print_response(&service.list_media(&ListMediaRequest { registered_only }))
        }
        Commands::Contents { medium_id } => print_response(&service.medium_contents(medium_id)),
        Commands::Register {
            current_name,
            new_name,
        } => print_response(&service.register_medium(&RegisterMediumRequest {
            current_name,
            new_name,
        })),
        Commands::Export {
            design_id,
            medium_id,
        } => print_response(&service.export_design(&ExportDesignRequest {
            design_id,
            medium_id,
        })),
        Commands::Remove {
            medium_id,
            design_id,
        } => print_response(&service.remove_from_medium(&RemoveFromMediumRequest {
            medium_id,
            design_id,
        })),
        Commands::Verify { medium_id } => print_response(&service.verify_medium(medium_id)),
        Commands::Import => {
            let runtime = tokio::runtime::Builder::new_current_thread().build()?;
            let summary = runtime.block_on(import_designs_async(
                catalog,
                Arc::new(PecIconRenderer),
                config.patterns_dir.clone(),
                config.previews_dir.clone(),
            ))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_response<T: Serialize>(response: &ApiResponse<T>) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
