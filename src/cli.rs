use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::engine::cleanup::CleanupMode;
use crate::DRYDOCK_VERSION;

#[derive(Parser, Debug)]
#[clap(version = DRYDOCK_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the storage plan and persist it without applying
    Plan,

    /// Compute the storage plan and make the live system match it
    Apply,

    /// Dismantle the storage stacks on the given root disks
    Cleanup {
        /// Root disks to clean, e.g. /dev/sda /dev/sdb
        #[clap(required = true)]
        roots: Vec<PathBuf>,

        #[clap(long, value_enum, default_value_t = CleanupMode::WipeSignatures)]
        mode: CleanupMode,
    },

    /// Print the existing storage layout as JSON
    Detect,
}
