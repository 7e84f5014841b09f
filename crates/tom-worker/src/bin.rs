//! Tom Worker CLI application

use clap::{Parser, Subcommand};
use tom_utils::config::Settings;
use tom_worker::runner::Runner;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Tom Worker CLI
///
/// Runs a queue-consuming worker that executes device commands over SSH.
struct Cli {
    /// Path to a configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Settings::new(cli.config.clone()).expect("Failed to load configuration");
    tom_utils::logging::init(&config.log.level, &config.log.format)
        .expect("Failed to initialize logger");

    match cli.command {
        Commands::Serve => {
            let runner = Runner::new(config).await?;
            runner.run().await?;
        }
    }
    Ok(())
}
