//! Operator CLI for inspecting and maintaining a shard directory.
//!
//! # Responsibility
//! - Verify `shardline_core` linkage (`ping`, `version`).
//! - Resolve libraries and list shards through the same code paths
//!   application hosts use.

use clap::{Parser, Subcommand};
use log::error;
use shardline_core::{
    init_logging_from_config, ClusterConfig, DatabaseRegistry, LibraryId, ShardId,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "shardline")]
#[command(about = "Shard directory tooling", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a liveness check response.
    Ping,
    /// Print the core crate version.
    Version,
    /// List every shard of a group with host and effective state.
    Shards {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "main")]
        group: String,
    },
    /// Print the shard a library lives on.
    Resolve {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "main")]
        group: String,
        #[arg(long)]
        library: i64,
    },
    /// Place a library on a shard; picks the least loaded shard when omitted.
    Assign {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "main")]
        group: String,
        #[arg(long)]
        library: i64,
        #[arg(long)]
        shard: Option<i64>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_command module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Ping => println!("shardline_core ping={}", shardline_core::ping()),
        Command::Version => println!("shardline_core version={}", shardline_core::core_version()),
        Command::Shards { config, group } => {
            let mut registry = open_registry(&config)?;
            let db = registry.require_mut(&group)?;
            for shard_id in db.shard_ids()? {
                let info = db.shard_info(shard_id)?;
                println!(
                    "shard={} host={}:{} db={} tls={} state={}",
                    info.shard_id,
                    info.host,
                    info.port,
                    info.database,
                    info.tls,
                    info.state.as_db()
                );
            }
            registry.close_all()?;
        }
        Command::Resolve {
            config,
            group,
            library,
        } => {
            let mut registry = open_registry(&config)?;
            let shard_id = registry
                .require_mut(&group)?
                .resolve_shard(LibraryId(library))?;
            println!("library={library} shard={shard_id}");
            registry.close_all()?;
        }
        Command::Assign {
            config,
            group,
            library,
            shard,
        } => {
            let mut registry = open_registry(&config)?;
            let db = registry.require_mut(&group)?;
            let shard_id = match shard {
                Some(shard) => ShardId(shard),
                None => db.next_shard()?,
            };
            db.assign_library(LibraryId(library), shard_id)?;
            println!("library={library} shard={shard_id}");
            registry.close_all()?;
        }
    }
    Ok(())
}

fn open_registry(path: &Path) -> Result<DatabaseRegistry, Box<dyn Error>> {
    let config = ClusterConfig::load(path)?;
    if let Some(logging) = &config.logging {
        init_logging_from_config(logging)?;
    }
    Ok(DatabaseRegistry::from_config(&config)?)
}
