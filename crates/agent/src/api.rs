//! HTTP API: health checks, Prometheus metrics and lifecycle operations

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ops_lib::{
    duty::summarize_alerts,
    health::{ComponentStatus, HealthRegistry},
    monitoring::{Alert, MonitoringClient},
    observability::StructuredLogger,
    relay, Error, LifecycleController, OperationKind, OperationState, ProgressEvent,
    TargetLocks, WorkloadRef,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub lifecycle: LifecycleController,
    pub locks: TargetLocks,
    pub monitoring: Option<MonitoringClient>,
    pub logger: StructuredLogger,
    /// Parent of every operation's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        lifecycle: LifecycleController,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            health_registry,
            lifecycle,
            locks: TargetLocks::new(),
            monitoring: None,
            logger,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_monitoring(mut self, client: MonitoringClient) -> Self {
        self.monitoring = Some(client);
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

/// Body of `POST /api/v1/operations`
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    /// `namespace/name`
    pub target: String,
    pub operation: OperationKind,
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// Result of a finished operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub target: String,
    pub operation: String,
    pub state: OperationState,
    pub summary: String,
    pub elapsed_ms: u64,
    pub events: Vec<ProgressEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionView {
    pub revision: i64,
    pub replica_set: String,
    pub image: String,
    pub created_at: Option<String>,
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodPhaseView {
    pub namespace: String,
    pub pod: String,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub summary: String,
    pub alerts: Vec<Alert>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn status_for_error(err: &Error) -> StatusCode {
    match err {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        Error::Transient(_) | Error::Monitoring(_) => StatusCode::BAD_GATEWAY,
        Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
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
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Run a lifecycle operation to completion and return its progress log
async fn run_operation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OperationRequest>,
) -> Response {
    let target: WorkloadRef = match request.target.parse() {
        Ok(target) => target,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{e}")),
    };

    let Some(_guard) = state.locks.try_acquire(&target, request.operation.name()) else {
        let holder = state.locks.holder(&target).unwrap_or_default();
        return error_response(
            StatusCode::CONFLICT,
            format!("{target} is busy with a {holder} operation"),
        );
    };

    state.logger.log_operation_request(
        &target.to_string(),
        request.operation.name(),
        request.requested_by.as_deref(),
    );

    let op = state.lifecycle.operation(target, request.operation);
    let (tx, rx) = relay::channel(relay::DEFAULT_CAPACITY);
    let collector = tokio::spawn(rx.drain());
    let outcome = state
        .lifecycle
        .execute(op, tx, state.shutdown.child_token())
        .await;
    let events = collector.await.unwrap_or_default();

    let status = match (&outcome.state, &outcome.error) {
        (OperationState::Succeeded, _) => StatusCode::OK,
        (_, Some(err)) => status_for_error(err),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = OperationResponse {
        target: outcome.target.to_string(),
        operation: outcome.kind.to_string(),
        state: outcome.state,
        summary: outcome.summary,
        elapsed_ms: outcome.elapsed.as_millis() as u64,
        events,
    };
    (status, Json(body)).into_response()
}

async fn deployment_status(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let target = WorkloadRef::new(namespace, name);
    match state.lifecycle.status(&target).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(status_for_error(&e), e.to_string()),
    }
}

async fn deployment_revisions(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let target = WorkloadRef::new(namespace, name);
    match state.lifecycle.revisions(&target).await {
        Ok(listing) => {
            let views: Vec<RevisionView> = listing
                .snapshots
                .iter()
                .map(|s| RevisionView {
                    revision: s.revision,
                    replica_set: s.replica_set.clone(),
                    image: s.image.clone(),
                    created_at: s.created_at.map(|t| t.to_rfc3339()),
                    current: listing.current == Some(s.revision),
                })
                .collect();
            Json(views).into_response()
        }
        Err(e) => error_response(status_for_error(&e), e.to_string()),
    }
}

async fn pod_phase(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod)): Path<(String, String)>,
) -> Response {
    match state.lifecycle.pod_phase(&namespace, &pod).await {
        Ok(phase) => Json(PodPhaseView {
            namespace,
            pod,
            phase,
        })
        .into_response(),
        Err(e) => error_response(status_for_error(&e), e.to_string()),
    }
}

async fn active_alerts(State(state): State<Arc<AppState>>) -> Response {
    let Some(client) = &state.monitoring else {
        return error_response(StatusCode::NOT_FOUND, "monitoring is not configured");
    };
    match client.active_alerts().await {
        Ok(alerts) => Json(AlertsResponse {
            summary: summarize_alerts(&alerts),
            alerts,
        })
        .into_response(),
        Err(e) => error_response(status_for_error(&e), e.to_string()),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/operations", post(run_operation))
        .route(
            "/api/v1/deployments/:namespace/:name/status",
            get(deployment_status),
        )
        .route(
            "/api/v1/deployments/:namespace/:name/revisions",
            get(deployment_revisions),
        )
        .route("/api/v1/pods/:namespace/:pod/phase", get(pod_phase))
        .route("/api/v1/alerts", get(active_alerts))
        .with_state(state)
}

/// Start the API server, returning once `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
