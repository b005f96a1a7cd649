use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml, the records export and local snapshots.
    /// Defaults to ~/.local/share/digest-search
    #[clap(long, env = "DIGEST_SEARCH_DIR", global = true)]
    pub base_path: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[clap(short, long, default_value = "false", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search indexed records
    Search {
        /// Search query
        query: String,

        /// Maximum number of results (config default_limit if omitted)
        #[clap(short, long)]
        limit: Option<usize>,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Re-index every record and write a fresh snapshot
    Rebuild {},

    /// Print index statistics as json
    Stats {},

    /// Serve the search api over http
    Daemon {
        /// Address to bind
        #[clap(long, default_value = "0.0.0.0:8080")]
        listen: String,
    },
}
