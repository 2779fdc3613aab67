//! CLI arguments for the server

use std::path::PathBuf;

use clap::Parser;

/// Roster presence-and-relay server
#[derive(Parser, Debug)]
#[command(name = "roster-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/roster/server.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
