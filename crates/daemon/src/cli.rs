//! Command-line interface for btrfsd.
//!
//! Provides commands for running the service and talking to it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// btrfsd - control endpoint for the btrfs filesystem driver
#[derive(Debug, Parser)]
#[command(name = "btrfsd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "BTRFSD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "BTRFSD_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Override the pipe name or socket path
    #[arg(short, long, global = true, env = "BTRFSD_ENDPOINT")]
    pub endpoint: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the service in the foreground
    Start,

    /// Check whether the service answers
    Status,

    /// List mounted volumes
    List,

    /// Send a raw request and print the reply
    Send {
        /// Command name followed by argument lines, e.g. `Mount <arg>...`
        #[arg(required = true, num_args = 1..)]
        lines: Vec<String>,
    },
}
