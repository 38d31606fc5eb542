// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Ciphertext directory accepts a write-read-delete probe.
    pub storage: String,
    /// Metadata database answers a read transaction.
    pub metadata: String,
}

impl HealthChecks {
    fn all_ok(&self) -> bool {
        self.storage == "ok" && self.metadata == "ok"
    }
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn probe(state: &AppState) -> HealthChecks {
    let storage = match state.paths.health_check() {
        Ok(()) => "ok",
        Err(e) => {
            warn!(error = %e, "Storage health check failed");
            "unavailable"
        }
    };
    let metadata = match state.metadata.health_check() {
        Ok(()) => "ok",
        Err(e) => {
            warn!(error = %e, "Metadata health check failed");
            "unavailable"
        }
    };
    HealthChecks {
        service: "ok".to_string(),
        storage: storage.to_string(),
        metadata: metadata.to_string(),
    }
}

/// Health check endpoint handler.
///
/// Returns 200 if all checks pass, 503 if any check fails.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let checks = tokio::task::spawn_blocking(move || probe(&state))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Health probe task failed");
            HealthChecks {
                service: "ok".to_string(),
                storage: "unknown".to_string(),
                metadata: "unknown".to_string(),
            }
        });

    let all_ok = checks.all_ok();
    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks,
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}
