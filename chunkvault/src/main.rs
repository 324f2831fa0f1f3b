use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chunkvault_anvil::{ChunkPos, CompressionFormat};
use chunkvault_metrics::StorageMetrics;
use chunkvault_storage::nbt_json::{json_to_nbt, nbt_to_json};
use chunkvault_storage::{AnvilChunkStorage, ChunkStorage, StorageConfig};

#[derive(Parser)]
#[command(name = "chunkvault", about = "Inspect and maintain Anvil region file worlds")]
pub struct Args {
    /// Directory containing the r.<x>.<z>.mca files
    #[arg(short, long, env = "CHUNKVAULT_WORLD", default_value = "world/region")]
    pub world: PathBuf,

    /// Codec for new writes: "zlib", "gzip", "lz4" or "none"
    #[arg(long, env = "CHUNKVAULT_COMPRESSION", default_value = "zlib")]
    pub compression: CompressionFormat,

    /// Maximum number of region files kept open
    #[arg(long, env = "CHUNKVAULT_CACHE_SIZE", default_value = "256")]
    pub cache_size: usize,

    /// Print a storage report on exit
    #[arg(long, env = "CHUNKVAULT_REPORT")]
    pub report: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print every stored chunk position
    List,
    /// Print a chunk as JSON
    Dump {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
    },
    /// Store a JSON document as a chunk
    Import {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
        file: PathBuf,
    },
    /// Remove a chunk
    Delete {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
    },
    /// Zero unused sectors in every region file
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = StorageConfig {
        cache_capacity: args.cache_size,
        compression: args.compression,
        ..StorageConfig::from_env(&args.world)
    };
    let metrics = Arc::new(StorageMetrics::new());
    let storage = AnvilChunkStorage::with_metrics(&config, tokio::runtime::Handle::current(), metrics.clone());

    let result = run(&storage, &config, args.command).await;
    if let Err(e) = storage.close().await {
        log::error!("Failed to close region files: {:?}", e);
    }

    if args.report {
        println!("{}", metrics.generate_report());
    }
    result
}

async fn run(storage: &AnvilChunkStorage, config: &StorageConfig, command: Command) -> Result<()> {
    match command {
        Command::List => {
            let mut stream = storage.enumerate();
            let mut count = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                println!("{} {}", chunk.pos().x, chunk.pos().z);
                count += 1;
            }
            log::info!("{} chunks in {:?}", count, config.region_dir);
        }
        Command::Dump { x, z } => {
            let pos = ChunkPos::new(x, z);
            match storage.load(pos).await? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&nbt_to_json(&doc))?),
                None => anyhow::bail!("No chunk stored at ({}, {})", x, z),
            }
        }
        Command::Import { x, z, file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let json: serde_json::Value =
                serde_json::from_str(&text).with_context(|| format!("{:?} is not valid JSON", file))?;
            storage.save(ChunkPos::new(x, z), &json_to_nbt(&json)).await?;
            println!("Stored chunk ({}, {}) using {}", x, z, storage.compression());
        }
        Command::Delete { x, z } => {
            if storage.delete(ChunkPos::new(x, z)).await? {
                println!("Deleted chunk ({}, {})", x, z);
            } else {
                println!("No chunk stored at ({}, {})", x, z);
            }
        }
        Command::Compact => {
            let compacted = tokio::task::block_in_place(|| -> Result<usize> {
                let mut compacted = 0;
                for region in storage.cache().enumerate()? {
                    let region = region?;
                    region.compact()?;
                    log::debug!("Compacted {:?}", region.path());
                    compacted += 1;
                }
                Ok(compacted)
            })?;
            println!("Compacted {} region files in {:?}", compacted, config.region_dir);
        }
    }
    Ok(())
}
