//! HTTP API for health checks, Prometheus metrics and operator actions

use agent_lib::{
    error::OptimizerError,
    health::{ComponentStatus, HealthRegistry},
    models::ActionState,
    operator::OperatorService,
    policy::PolicyUpdate,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Decisions returned when no limit is given
const DEFAULT_DECISION_LIMIT: usize = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub operator: OperatorService,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, operator: OperatorService) -> Self {
        Self {
            health_registry,
            operator,
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

/// Library error mapped onto an HTTP status
pub struct ApiError(OptimizerError);

impl From<OptimizerError> for ApiError {
    fn from(e: OptimizerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OptimizerError::NotFound(_) => StatusCode::NOT_FOUND,
            OptimizerError::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            OptimizerError::ConflictingInFlightAction { .. }
            | OptimizerError::InvalidTransition { .. } => StatusCode::CONFLICT,
            e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn pending_decisions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.operator.pending().await)
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub limit: Option<usize>,
}

async fn list_decisions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_DECISION_LIMIT);
    Json(state.operator.decisions(limit).await)
}

/// Body of approve and reject requests
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReviewRequest {
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ReviewRequest {
    fn reviewer(&self) -> &str {
        self.reviewer.as_deref().unwrap_or("operator")
    }
}

async fn approve_decision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ReviewRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let record = state
        .operator
        .approve(&id, request.reviewer(), request.reason.clone())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

async fn reject_decision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ReviewRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let review = state
        .operator
        .reject(&id, request.reviewer(), request.reason.clone())
        .await?;
    Ok(Json(review))
}

#[derive(Debug, Deserialize)]
pub struct ActionsQuery {
    pub state: Option<ActionState>,
}

async fn list_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActionsQuery>,
) -> impl IntoResponse {
    Json(state.operator.actions(query.state).await)
}

async fn get_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.operator.action(&id).await?))
}

async fn get_policy(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.operator.policy().await)
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PolicyUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.operator.update_policy(&update).await?))
}

async fn last_run(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state
        .operator
        .last_run()
        .await
        .map(Json)
        .ok_or_else(|| ApiError(OptimizerError::NotFound("no run has finished yet".to_string())))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub started: bool,
}

async fn trigger_run(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.operator.trigger_run() {
        (StatusCode::ACCEPTED, Json(TriggerResponse { started: true }))
    } else {
        (StatusCode::CONFLICT, Json(TriggerResponse { started: false }))
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/decisions", get(list_decisions))
        .route("/api/v1/decisions/pending", get(pending_decisions))
        .route("/api/v1/decisions/:id/approve", post(approve_decision))
        .route("/api/v1/decisions/:id/reject", post(reject_decision))
        .route("/api/v1/actions", get(list_actions))
        .route("/api/v1/actions/:id", get(get_action))
        .route("/api/v1/policy", get(get_policy).put(update_policy))
        .route("/api/v1/runs", post(trigger_run))
        .route("/api/v1/runs/last", get(last_run))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
