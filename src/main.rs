use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use opds_reader::app::AppContext;
use opds_reader::cli::commands::{self, ReadOptions};
use opds_reader::cli::{Cli, Commands};
use opds_reader::config::Config;
use opds_reader::prefetch::FixedPressure;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(radius) = cli.preload_radius {
        config.reader = config.reader.with_preload_radius(radius);
    }

    let ctx = match cli.simulate_pressure {
        Some(fraction) => AppContext::with_memory(config, Arc::new(FixedPressure::new(fraction)))?,
        None => AppContext::new(config)?,
    };

    match cli.command {
        Commands::Browse { url } => {
            commands::browse(&ctx, url.as_deref()).await?;
        }
        Commands::Read {
            url,
            entry,
            page,
            resume,
            turns,
            double,
        } => {
            let options = ReadOptions {
                url,
                entry,
                page,
                resume,
                turns,
                double,
            };
            commands::read(&ctx, &options).await?;
        }
    }

    Ok(())
}
