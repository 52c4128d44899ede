mod cli;
mod commands;
mod config;
mod error;

use crate::{
    cli::{Args, Commands},
    commands::{CommandExecutor, ReplayPlan},
    config::AppConfig,
    error::{AppError, Result},
};
use clap::Parser;
use danmaku::{EngineConfig, ExportOptions};
use std::process;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let config = AppConfig::load(args.config.as_deref())?;
    let executor = CommandExecutor::new(config.clone());

    match args.command {
        Commands::Replay {
            input,
            from,
            to,
            step,
            seeks,
            rate,
            blocklist,
            output,
        } => {
            let plan = ReplayPlan {
                from,
                to,
                step,
                seeks,
                rate,
            };
            executor
                .replay(&input, plan, blocklist.as_deref(), output)
                .await?;
        }

        Commands::Stats {
            input,
            bucket,
            top,
            json,
        } => {
            executor.stats(&input, bucket, top, json).await?;
        }

        Commands::Convert {
            input,
            output,
            exclude_blocked,
            pretty,
        } => {
            let options = ExportOptions {
                exclude_blocked,
                pretty,
            };
            executor.convert(&input, &output, options).await?;
        }

        Commands::Config { defaults } => {
            let shown = if defaults {
                EngineConfig::default()
            } else {
                config
            };
            println!("{}", AppConfig::show(&shown)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // stdout carries replay output
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
