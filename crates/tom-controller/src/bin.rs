//! Tom Controller CLI application
//!
//! This module provides the command-line interface for the Tom Controller.

use tom_controller::cli::{parse_cli, Commands};
use tom_controller::cli::commands;
use tom_utils::config::Settings;

/// Main function to run the Tom Controller application
///
/// This function initializes the application, parses command-line arguments,
/// and executes the appropriate command based on user input.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_cli();

    // Load configuration
    let config = Settings::new(cli.config.clone()).expect("Failed to load configuration");

    // Initialize logger
    tom_utils::logging::init(&config.log.level, &config.log.format)
        .expect("Failed to initialize logger");

    // Execute the appropriate command
    match cli.command {
        Commands::Serve => commands::serve(&config).await?,
    }
    Ok(())
}
