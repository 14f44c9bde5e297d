//! Mixdeck CLI
//!
//! Command-line front end for offline mixing with the Mixdeck engine.

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;

use mixdeck::cli::commands::{self, MixEffects};
use mixdeck::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Mixdeck v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref(), cli.sample_rate)?;

    match cli.command {
        Some(cmd) => handle_command(cmd, config),
        None => {
            println!("Mixdeck v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config: mixdeck::EngineConfig) -> Result<()> {
    match cmd {
        Commands::Mix {
            tracks,
            at,
            eq,
            compress,
            reverb,
            duration,
            out,
        } => {
            let effects = MixEffects {
                eq,
                compressor: compress,
                reverb,
            };
            commands::mix(config, &tracks, &at, effects, duration, &out).map(|_| ())
        }
        Commands::Info { path, points } => commands::info(&path, points),
        Commands::Split { path, at, out_dir } => {
            commands::split(config, &path, at, &out_dir).map(|_| ())
        }
    }
}
