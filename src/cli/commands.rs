use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "memconn")]
#[command(about = "Talk to a cluster of memcached-style nodes over one multiplexed event loop")]
pub struct Cli {
    /// Configuration file to use instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask every node for its version
    ///
    /// Examples:
    ///   memconn version
    ///   memconn version --servers "10.0.0.1:11211 10.0.0.2:11211"
    Version {
        /// Servers to query, separated by spaces or commas. Overrides the config file
        #[arg(short, long)]
        servers: Option<String>,
    },

    /// Query every node repeatedly, showing queue depth and reconnect state
    ///
    /// Useful for watching the client ride out a node restart.
    ///
    /// Examples:
    ///   memconn watch
    ///   memconn watch --interval-ms 500 --count 20
    Watch {
        /// Servers to query, separated by spaces or commas. Overrides the config file
        #[arg(short, long)]
        servers: Option<String>,
        /// Pause between rounds in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,
        /// Stop after this many rounds (runs until Ctrl-C when omitted)
        #[arg(short = 'n', long)]
        count: Option<u32>,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
