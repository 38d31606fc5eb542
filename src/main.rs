// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use audio_vault_server::{
    api::router,
    config::AppConfig,
    logging,
    retention_scheduler::RetentionScheduler,
    state::AppState,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from the same settings, so it is not up yet.
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.log_format);

    let state = match AppState::open(&config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to open storage");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let scheduler = RetentionScheduler::new(state.audio.clone()).with_interval(config.scan_interval);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.bind_addr, error = %e, "Failed to bind");
            shutdown.cancel();
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %config.bind_addr, "Audio vault listening (docs at /docs)");

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await;

    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Retention scheduler task failed");
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
