use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tapestry", version, about = "Dataset sync and integration engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the sync scheduler (default if no subcommand given).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Data directory (SQLite database + master key).
        #[arg(long, env = "TAPESTRY_DATA_DIR", default_value = ".tapestry")]
        data_dir: PathBuf,
    },

    /// Run one sync pass over every dataset, print the report and exit.
    SyncOnce {
        #[arg(long, env = "TAPESTRY_DATA_DIR", default_value = ".tapestry")]
        data_dir: PathBuf,
    },

    /// Print the effective configuration (secrets redacted).
    Config,
}
