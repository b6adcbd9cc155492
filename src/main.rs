//! recipe-sync command line
//!
//! Runs one synchronization job against the plant and prints its report.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use recipe_sync::config::SyncConfig;
use recipe_sync::controller::{ControllerConnector, UaConnector};
use recipe_sync::store::SqliteStore;
use recipe_sync::sync::SyncEngine;
use recipe_sync::worker::{Job, SyncService};
use recipe_sync::{logging, RecipeId, StructureId, UnitId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "recipe-sync",
    about = "Synchronize recipes between the recipe store and the plant controllers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: platform config dir or RECIPE_SYNC_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides `store.database_url`
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Dry run against the simulated controllers of a plant file
    #[cfg(feature = "mock-controller")]
    #[arg(short, long, global = true)]
    plant: Option<PathBuf>,

    /// Seconds to wait for the job to finish
    #[arg(long, global = true, default_value_t = 600)]
    timeout: u64,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the controllers of a structure into a recipe
    Download {
        #[arg(short, long)]
        recipe: RecipeId,
        #[arg(short, long)]
        structure: StructureId,
    },
    /// Write a stored recipe to the controllers
    Upload {
        #[arg(short, long)]
        recipe: RecipeId,
        /// Recipe name recorded as active and written to the satellites
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Compare a stored recipe with the live controller values
    Check {
        #[arg(short, long)]
        recipe: RecipeId,
        #[arg(short, long)]
        structure: StructureId,
    },
    /// Probe every unit's endpoint
    Ping,
    /// List the address space below a node of one unit
    Browse {
        #[arg(short, long)]
        unit: UnitId,
        /// Namespace-relative path such as "StepData"."RunningSteps"
        #[arg(short, long)]
        address: String,
        /// Levels to descend (default: controller.max_browse_depth)
        #[arg(long)]
        depth: Option<usize>,
    },
}

/// The simulated plant when `--plant` is given, the real controllers otherwise
fn connector(cli: &Cli, config: &SyncConfig) -> anyhow::Result<Arc<dyn ControllerConnector>> {
    #[cfg(feature = "mock-controller")]
    if let Some(path) = &cli.plant {
        tracing::info!("Dry run against plant file {}", path.display());
        let plant = recipe_sync::controller::mock::PlantSpec::load(path)?
            .build(&config.controller.namespace_uri, &config.addresses)?;
        return Ok(Arc::new(plant));
    }
    #[cfg(not(feature = "mock-controller"))]
    let _ = cli;

    Ok(Arc::new(UaConnector::new(&config.controller)))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::load_or_default(),
    };
    let _log_guard = logging::init(&config.logging);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let store = runtime.block_on(async {
        match &cli.database {
            Some(path) => SqliteStore::from_path(path).await,
            None => SqliteStore::connect(&config.store.database_url).await,
        }
    })?;

    let connector = connector(&cli, &config)?;
    let engine = SyncEngine::new(connector, Arc::new(store), config.clone());

    let job = match cli.command {
        Commands::Download { recipe, structure } => Job::Download {
            recipe_id: recipe,
            structure_id: structure,
        },
        Commands::Upload { recipe, name } => Job::Upload {
            recipe_id: recipe,
            recipe_name: name,
        },
        Commands::Check { recipe, structure } => Job::Check {
            recipe_id: recipe,
            structure_id: structure,
        },
        Commands::Ping => Job::ProbeUnits,
        Commands::Browse {
            unit,
            address,
            depth,
        } => {
            let entries = runtime.block_on(engine.browse(unit, &address, depth))?;
            for entry in entries {
                let indent = "  ".repeat(entry.depth.saturating_sub(1));
                match entry.value {
                    Some(value) => println!("{}{} = {}", indent, entry.node.display_name, value),
                    None => println!("{}{}", indent, entry.node.display_name),
                }
            }
            return Ok(());
        }
    };

    let (service, jobs) = SyncService::new(engine, config.queue.capacity);
    let worker = service.spawn()?;

    tracing::info!("Submitting {}", job);
    let id = jobs.submit(job)?;
    let outcome = jobs.wait_for(id, Duration::from_secs(cli.timeout))?;

    jobs.shutdown()?;
    if worker.join().is_err() {
        tracing::error!("Sync worker panicked");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome);
    }

    if !outcome.is_success() {
        bail!("job {} did not succeed", id);
    }
    Ok(())
}
