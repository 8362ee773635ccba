// CLI module - command-line argument parsing
//
// `topicd` serves by default; `topicd migrate` creates the store schema
// and exits. Flags override the config file and environment.

use crate::config::VERSION;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Topic catalog service
#[derive(Parser)]
#[command(name = "topicd")]
#[command(version = VERSION)]
#[command(about = "Topic catalog service with a cache-coherent read path", long_about = None)]
pub struct Cli {
    /// Config file path (default: platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the RPC bind address
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the store schema and exit
    Migrate,
}
