use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use gridstream_stream::ServerConfig;
use tracing_subscriber::EnvFilter;

mod sim;

#[derive(Parser)]
#[command(name = "gridstream-cli", about = "CLI tool for gridstream operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Validate a configuration and print it with defaults filled in
    Config {
        /// YAML or JSON configuration file; built-in defaults when omitted
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
    /// Run a deterministic streaming simulation against the in-memory backend
    Simulate {
        /// YAML or JSON configuration file; built-in defaults when omitted
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Number of wandering observers
        #[arg(short, long, default_value = "8")]
        observers: u32,
        /// Entities defined per streamed kind
        #[arg(short, long, default_value = "2000")]
        entities: usize,
        /// Number of ticks to simulate after tick 0
        #[arg(short, long, default_value = "30")]
        ticks: u64,
        /// RNG seed for entity placement and observer movement
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = if path.extension().is_some_and(|ext| ext == "json") {
        ServerConfig::from_json_str(&text)
    } else {
        ServerConfig::from_yaml_str(&text)
    };
    config.with_context(|| format!("loading {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("gridstream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("stream: {}", gridstream_stream::crate_info());
            let config = ServerConfig::default();
            println!("tick interval: {:?}", config.tick_interval());
            for streamer in &config.streamers {
                println!(
                    "  {}: max_visible={}, streaming_distance={}",
                    streamer.kind, streamer.max_visible, streamer.streaming_distance
                );
            }
        }
        Commands::Config { path, json } => {
            let config = load_config(path.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", config.to_yaml_string()?);
            }
        }
        Commands::Simulate {
            path,
            observers,
            entities,
            ticks,
            seed,
        } => {
            let config = load_config(path.as_deref())?;
            println!(
                "Simulation: seed={seed}, ticks={ticks}, observers={observers}, entities/kind={entities}"
            );
            let params = sim::SimulationParams {
                observers,
                entities,
                ticks,
                seed,
            };
            let report = sim::run(&config, &params)?;
            println!(
                "Ticks run: {} (min {:?}, avg {:?}, max {:?})",
                report.ticks, report.min_tick, report.average_tick, report.max_tick
            );
            for kind in &report.kinds {
                println!(
                    "  {}: defined={}, live={}, materialized={}, dematerialized={}, failed={}, respawn queue={}",
                    kind.kind,
                    kind.defined,
                    kind.live,
                    kind.counters.materialized,
                    kind.counters.dematerialized,
                    kind.counters.failed,
                    kind.respawn_pending,
                );
            }
        }
    }

    Ok(())
}
