pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opds-reader")]
#[command(about = "Browse OPDS catalogs and read comics page by page", long_about = None)]
pub struct Cli {
    /// Path to the config file (default: ~/.config/opds-reader/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    /// Pages to preload on each side of the current page
    #[arg(long, global = true)]
    pub preload_radius: Option<u32>,

    /// Pretend this fraction of memory is in use (0.0 to 1.0)
    #[arg(long, global = true)]
    pub simulate_pressure: Option<f32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the entries of a catalog feed
    Browse {
        /// Feed URL (default: the configured server)
        url: Option<String>,
    },
    /// Open an entry of a feed and page through it
    Read {
        /// Feed URL containing the entry
        url: String,

        /// Index of the entry, as shown by `browse`
        #[arg(short, long)]
        entry: usize,

        /// Jump to this page after opening
        #[arg(short, long)]
        page: Option<u32>,

        /// Resume at the server's last-read page when it has one
        #[arg(long)]
        resume: bool,

        /// Turn forward this many times
        #[arg(long, default_value_t = 0)]
        turns: u32,

        /// Pair portrait pages side by side
        #[arg(long)]
        double: bool,
    },
}
