use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;

use crate::admin::AdminState;
use crate::domain::{OperationId, Transaction};
use crate::queue::Delivery;
use crate::resilience::circuit_breaker::BreakerSnapshot;

#[derive(Serialize)]
pub struct HealthStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub chains: Vec<&'static str>,
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn get_health(State(state): State<AdminState>) -> Json<HealthStatus> {
    let mut chains: Vec<&'static str> = state.registry.chains().map(|h| h.chain.as_str()).collect();
    chains.sort_unstable();
    Json(HealthStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        chains,
    })
}

pub async fn get_transaction(
    State(state): State<AdminState>,
    Path(operation_id): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let id = OperationId::parse(&operation_id)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.repository.get_by_operation_id(id).await {
        Ok(Some(tx)) => Ok(Json(tx)),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("transaction {} not found", id),
        )),
        Err(e) => {
            tracing::error!(operation_id = %id, error = %e, "Transaction lookup failed");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "transaction lookup failed"))
        }
    }
}

pub async fn get_circuit_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.registry.breaker_snapshots())
}

/// Enqueue the raw body; the worker pool validates it.
pub async fn submit_job(State(state): State<AdminState>, body: String) -> Result<StatusCode, ApiError> {
    if serde_json::from_str::<serde_json::Value>(&body).is_err() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "body is not valid JSON"));
    }

    match state.jobs.try_send(Delivery::new(body)) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(TrySendError::Full(_)) => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "job queue is full",
        )),
        Err(TrySendError::Closed(_)) => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "job queue is closed",
        )),
    }
}
