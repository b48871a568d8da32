pub mod callback;
pub mod chain;
pub mod forms;
pub mod payment_methods;
pub mod transactions;

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub db: String,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match state.ledger.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::error!(error = %e, "Ledger health check failed");
            "disconnected"
        }
    };

    let healthy = db_status == "connected";
    let health_response = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db: db_status.to_string(),
    };

    // Return 503 if the ledger is unreachable, 200 otherwise
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_response))
}
