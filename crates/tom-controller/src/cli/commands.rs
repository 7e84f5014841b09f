/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::api;
use crate::auth::validator::JwtValidator;
use crate::inventory::build_inventory;
use crate::state::AppState;
use crate::supervisor::{start_supervisor_sweep, SupervisorConfig};
use tokio::signal;
use tom_store::Store;
use tom_utils::config::Settings;
use tom_utils::logging::prelude::*;

/// Function to start the Tom Controller server
///
/// This function connects to the shared store, constructs the configured
/// inventory plugin, resolves the JWT providers, starts the supervisor
/// sweep, and serves the API with graceful shutdown support.
pub async fn serve(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Tom Controller");

    // Connect to the shared store
    info!("Connecting to the shared store");
    let store = Store::connect(config).await?;
    info!("Store connection established");

    // Construct the configured inventory plugin
    info!(
        "Building inventory plugin: {}",
        config.controller.inventory_type
    );
    let inventory = build_inventory(config)?;

    // Resolve JWT providers through OIDC discovery. A provider that fails
    // discovery is skipped so one identity outage cannot block startup.
    let mut validators = Vec::new();
    if matches!(config.controller.auth_mode.as_str(), "jwt" | "hybrid") {
        let http = reqwest::Client::new();
        for provider in &config.controller.jwt_providers {
            match JwtValidator::discover(
                provider,
                config.controller.jwt_require_https,
                config.controller.jwt_leeway_s,
                &http,
            )
            .await
            {
                Ok(validator) => validators.push(validator),
                Err(e) => {
                    error!("Skipping JWT provider '{}': {}", provider.kind, e);
                }
            }
        }
        if validators.is_empty() && config.controller.auth_mode == "jwt" {
            return Err("jwt auth mode configured but no provider resolved".into());
        }
    }

    // Start the stalled-job supervisor sweep
    info!("Starting background tasks");
    start_supervisor_sweep(
        store.clone(),
        SupervisorConfig {
            interval_seconds: config.controller.sweep_interval_s,
        },
    );

    // Configure API routes
    info!("Configuring API routes");
    let state = AppState::new(config.clone(), store, inventory, validators);
    let app = api::configure_routes(state);

    // Set up the server address
    let addr = format!("{}:{}", config.controller.host, config.controller.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Set up shutdown signal handler
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
        shutdown_tx.send(()).ok();
    });

    // Start the server with graceful shutdown
    info!("Tom Controller is now running");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
