//! Command line front end: runs a world until Ctrl+C, or inspects a
//! region file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use chunkvault::constants::REGION_SIZE;
use chunkvault::storage::{Compression, RegionSerializer, RegionStore};
use chunkvault::utils::settings::{self, WorldSettings};
use chunkvault::world::{World, WorldConfig, split_block_coord};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (default: world.ron in the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the world and keep it saved until Ctrl+C
    Serve {
        /// World directory, overrides the settings file
        #[arg(long)]
        world: Option<PathBuf>,

        /// Seed for a new world
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the allocation table of a region file
    Inspect { region: PathBuf },
}

pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve {
        world: None,
        seed: None,
    }) {
        Command::Serve { world, seed } => {
            let mut settings = load_settings(args.config.as_deref())?;
            if let Some(world) = world {
                settings.world_path = world;
            }
            if seed.is_some() {
                settings.seed = seed;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(num_cpus::get().max(2))
                .thread_name("chunkvault-worker")
                .enable_all()
                .build()
                .context("failed to create tokio runtime")?;
            runtime.block_on(serve(settings))
        }
        Command::Inspect { region } => inspect(&region),
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<WorldSettings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => settings::default_config_path().unwrap_or_else(|| PathBuf::from("world.ron")),
    };
    Ok(settings::load_settings(&path)?)
}

async fn serve(settings: WorldSettings) -> anyhow::Result<()> {
    let level = settings::load_or_create_level(&settings.world_path, settings.seed)?;
    let serializer = RegionSerializer::connect(&settings.world_path, settings.storage.compression)?;
    let config = WorldConfig::from_settings(&settings, &level).context("invalid generation stages")?;
    let world = World::new(Arc::new(serializer), config);

    tracing::info!("====================================================");
    tracing::info!("Serving world at {}", settings.world_path.display());
    tracing::info!("Press Ctrl+C to stop.");
    tracing::info!("====================================================");

    let (spawn_x, _, spawn_z) = level.spawn;
    let spawn_chunk = (split_block_coord(spawn_x).0, split_block_coord(spawn_z).0);
    world
        .warm(spawn_chunk, settings.spawn.pin_radius)
        .await
        .context("failed to load the spawn area")?;

    let flusher = world.spawn_flusher(Duration::from_millis(settings.persistence.flush_interval_ms.max(1)));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Shutting down, flushing dirty chunks...");

    flusher.abort();
    let remaining = world.flush_all().await;
    let stats = world.stats();
    tracing::info!(
        "Loaded {}, generated {}, {} still resident",
        stats.loaded,
        stats.generated,
        stats.resident
    );
    if remaining > 0 {
        bail!("{} chunks could not be saved", remaining);
    }
    Ok(())
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let mut store = RegionStore::new(path, Compression::default());
    if !store.exists() {
        bail!("{} does not exist", path.display());
    }

    let entries = store
        .entries()
        .with_context(|| format!("failed to read directory of {}", path.display()))?;
    println!("{}: {} chunks", path.display(), entries.len());
    for (index, allocation) in &entries {
        let (x, z) = ((*index as i32) % REGION_SIZE, (*index as i32) / REGION_SIZE);
        let payload = match store.get(x, z) {
            Ok(bytes) => format!("{} bytes", bytes.len()),
            Err(e) => format!("unreadable: {}", e),
        };
        println!(
            "  ({:>2}, {:>2})  pages {:>5}..{:<5} {}",
            x,
            z,
            allocation.start,
            allocation.start + allocation.pages as u32,
            payload
        );
    }

    let free: Vec<u32> = store.free_pages()?.iter().copied().collect();
    println!("free pages: {:?}", free);
    Ok(())
}
