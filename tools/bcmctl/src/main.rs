//! bcmctl - Body-control case store inspection and simulation tool

mod config;
mod inspect;
mod script;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::info;

use bcm_cases::MemoryStore;
use bcm_common::{init_logging, load_config};

use crate::config::{AppConfig, CONFIG_NAME};
use crate::script::Script;

#[derive(Parser)]
#[command(name = "bcmctl")]
#[command(about = "Body-control case store inspection and simulation")]
#[command(long_about = "Body-control case store inspection and simulation

Commands:
  layout      Show the ON/OFF case address table
  decode      Decode case records from a store image
  simulate    Run a scripted input sequence through the case engine

Examples:
  bcmctl layout
  bcmctl decode --image cases.bin --input 3
  bcmctl simulate --script flasher.yaml")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: config/bcm.{toml,yaml,json})
    #[arg(short = 'c', long = "config", global = true, env = "BCM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ON/OFF case address table
    Layout,

    /// Decode case records from a store image
    Decode {
        /// Raw 4096-byte store image
        #[arg(short, long)]
        image: PathBuf,

        /// Only this input (1-44)
        #[arg(short = 'n', long)]
        input: Option<u8>,

        /// Also list unconfigured slots
        #[arg(short, long)]
        all: bool,
    },

    /// Run a scripted sequence through the case engine
    Simulate {
        /// Store image to start from (default: engine.store_image, else erased)
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// YAML script with cases and steps
        #[arg(short, long)]
        script: PathBuf,
    },
}

fn load_image(path: &Path) -> Result<MemoryStore> {
    MemoryStore::load(path).with_context(|| format!("Failed to load image {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut app: AppConfig =
        load_config(CONFIG_NAME, cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.verbose {
        app.log.level = "debug".to_string();
    } else if cli.json {
        // Keep stdout parseable
        app.log.level = "warn".to_string();
    }
    app.log.ansi &= !cli.no_color;
    init_logging(&app.log).context("Failed to initialize logging")?;
    app.engine
        .validate()
        .context("Invalid engine configuration")?;

    match cli.command {
        Commands::Layout => inspect::print_layout(cli.json)?,
        Commands::Decode { image, input, all } => {
            let store = load_image(&image)?;
            inspect::decode_image(store, input, all, cli.json)?;
        },
        Commands::Simulate { image, script } => {
            let image = match image.or_else(|| app.engine.store_image.clone()) {
                Some(path) => load_image(&path)?,
                None => {
                    info!("No store image given, starting from an erased store");
                    MemoryStore::erased()
                },
            };
            let script = Script::load(&script)?;
            if !cli.json {
                println!(
                    "{} {} cases, {} steps, {}ms tick",
                    "Simulating:".bright_cyan(),
                    script.cases.len(),
                    script.steps.len(),
                    app.engine.tick_ms
                );
            }
            simulate::run(image, &script, &app.engine, cli.json)?;
        },
    }

    Ok(())
}
