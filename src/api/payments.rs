//! POST /api/payments/topup and the health endpoints

use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::identity::{identity_middleware, AuthenticatedUser};
use crate::services::payment_orchestrator::{PaymentOrchestrator, TopUpRequest, TopUpResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct PaymentsState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub health_checker: HealthChecker,
}

/// Every classified outcome, including a failed payment, is a 200 with the
/// status in the body. Error responses are reserved for requests that never
/// reached a classified outcome.
pub async fn top_up(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    user: AuthenticatedUser,
    payload: Result<Json<TopUpRequest>, JsonRejection>,
) -> Result<Json<TopUpResult>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let with_request_id = |e: AppError| match &request_id {
        Some(id) => e.with_request_id(id.clone()),
        None => e,
    };

    let Json(request) = payload.map_err(|rejection| {
        with_request_id(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidField {
                field: "body".to_string(),
                reason: rejection.body_text(),
            },
        )))
    })?;

    info!(
        user_id = %user.user_id,
        idempotency_key = %request.idempotency_key,
        method = %request.method,
        amount = request.amount,
        "top-up requested"
    );

    let result = state
        .orchestrator
        .initiate(user.user_id, request)
        .await
        .map_err(|e| with_request_id(e.into()))?;

    info!(
        txn_ref_no = %result.txn_ref_no,
        status = %result.status,
        "top-up answered"
    );
    Ok(Json(result))
}

pub async fn health(
    State(state): State<PaymentsState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Liveness probe - the process is up and serving
pub async fn liveness() -> &'static str {
    "OK"
}

pub fn router(state: PaymentsState) -> Router {
    Router::new()
        .route("/api/payments/topup", post(top_up))
        .route_layer(axum::middleware::from_fn(identity_middleware))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .with_state(state)
}
