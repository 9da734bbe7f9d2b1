//! Command-line utility for working with rebound redelivery configurations
//!
//! This tool can:
//! - Validate a configuration file
//! - Show which exception policy a failure type resolves to
//! - Push a failing route through the configured engine and report the outcome

#![deny(clippy::pedantic, clippy::all)]
#![allow(clippy::must_use_candidate)]

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use rebound::{Rebound, controller};
use rebound_common::logging;
use rebound_redelivery::{Disposition, ExceptionPolicy, RedeliveryExt};

/// Command-line utility for rebound redelivery configurations
#[derive(Parser, Debug)]
#[command(name = "rebound")]
#[command(about = "Inspect and exercise rebound redelivery policies", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and list its policies
    Check,
    /// Show which policy handles a failure type
    Resolve {
        /// Root-first failure lineage, e.g. Exception/RuntimeException/IllegalArgumentException
        lineage: String,
    },
    /// Run a route that fails a number of times through the engine
    Simulate {
        /// Root-first failure lineage raised by the route
        lineage: String,

        /// Attempts that fail before the route succeeds
        #[arg(long, default_value = "3")]
        failures: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init();

    let config_path = cli.config.map_or_else(find_config_file, Ok)?;
    let config = Rebound::from_file(&config_path)?;
    let engine = config.build()?;

    match cli.command {
        Commands::Check => {
            println!("{}: OK", config_path.display());
            for (index, policy) in engine.processor().table().iter().enumerate() {
                println!("  [{index}] {}", describe(policy));
            }
            for endpoint in config.endpoints() {
                println!("  endpoint {} ({:?})", endpoint.name, endpoint.kind);
            }
        }
        Commands::Resolve { lineage } => match engine.resolve(&lineage)? {
            Some(resolution) => println!(
                "{lineage} -> [{}] via {}: {}",
                resolution.index,
                resolution.matched,
                describe(&resolution.policy)
            ),
            None => println!("{lineage} -> no policy, the failure propagates"),
        },
        Commands::Simulate { lineage, failures } => {
            let engine = Arc::new(engine);

            let watcher = tokio::spawn({
                let engine = Arc::clone(&engine);
                async move { engine.watch_shutdown().await }
            });
            let signals = tokio::spawn(controller::shutdown());

            let simulation = engine.simulate(&lineage, failures).await?;

            signals.abort();
            watcher.abort();

            println!("Route invoked {} times", simulation.invocations);
            let succeeded = match &simulation.outcome {
                Ok(exchange) => {
                    println!(
                        "Exchange {} finished {} after {} redelivery attempts",
                        exchange.id(),
                        exchange
                            .disposition()
                            .map_or("unknown", Disposition::as_str),
                        exchange.redelivery_counter()
                    );
                    true
                }
                Err(rejected) => {
                    println!("{rejected}");
                    false
                }
            };

            println!(
                "{}",
                ron::ser::to_string_pretty(&simulation.stats, ron::ser::PrettyConfig::default())?
            );

            if !succeeded {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn describe(policy: &ExceptionPolicy) -> String {
    let exceptions = policy
        .exceptions()
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(", ");

    format!(
        "{exceptions}: delay {:?}, maximum {}, handled {}, while {}, to {}",
        policy.delay(),
        policy
            .maximum_redeliveries()
            .map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
        policy.handled(),
        policy
            .retry_while()
            .map_or_else(|| "always".into(), |predicate| predicate.describe()),
        policy.failure_destination().unwrap_or("nowhere"),
    )
}

/// Find the configuration file using the following precedence:
/// 1. `REBOUND_CONFIG` environment variable
/// 2. ./rebound.config.ron (current working directory)
/// 3. /etc/rebound/rebound.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("REBOUND_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "REBOUND_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        Path::new("./rebound.config.ron"),
        Path::new("/etc/rebound/rebound.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.to_path_buf());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - REBOUND_CONFIG environment variable\n{paths_tried}"
    )
}
