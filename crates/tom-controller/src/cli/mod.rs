pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
/// Tom Controller CLI
///
/// This CLI provides commands to manage the Tom Controller, the HTTP-facing
/// half of the network automation broker.
pub struct Cli {
    /// Path to a configuration file
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Tom Controller server
    Serve,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
