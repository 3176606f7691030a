//! HTTP Surface
//!
//! Transport-thin axum layer over the coordinator. The actor identity arrives
//! pre-verified from the upstream identity provider in the
//! `x-actor-identity` header; this layer never authenticates, it only maps
//! requests to coordinator calls and custody errors to status codes.

use crate::coordinator::CustodyCoordinator;
use crate::error::CustodyError;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::TryStreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

const ACTOR_IDENTITY_HEADER: &str = "x-actor-identity";
const DEFAULT_PAGE_LIMIT: u64 = 50;

pub fn router(coordinator: Arc<CustodyCoordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/evidence/:id/upload", post(upload_evidence))
        .route("/api/evidence/:id/verify", post(verify_evidence))
        .route("/api/evidence/:id/transfer", post(transfer_evidence))
        .route("/api/evidence/:id/export", post(export_evidence))
        .route("/api/evidence/:id/events", get(subject_events))
        .route("/api/evidence/:id/ledger", get(ledger_events))
        .route("/api/actors/me/events", get(actor_events))
        .route("/api/admin/events", get(admin_events))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).into_inner())
        .with_state(coordinator)
}

impl IntoResponse for CustodyError {
    fn into_response(self) -> Response {
        let status = match &self {
            CustodyError::InvalidInput(_)
            | CustodyError::InvalidIdentity(_)
            | CustodyError::InvalidPageBounds { .. } => StatusCode::BAD_REQUEST,
            CustodyError::Unauthorized(_) => StatusCode::FORBIDDEN,
            CustodyError::NoPriorUpload(_) => StatusCode::NOT_FOUND,
            CustodyError::DuplicateEvidence(_) | CustodyError::DuplicateOnLedger(_) => {
                StatusCode::CONFLICT
            }
            CustodyError::StorageUnavailable(_) | CustodyError::LedgerUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CustodyError::LedgerTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CustodyError::IoFailure(_)
            | CustodyError::ConfigurationError(_)
            | CustodyError::LedgerRejected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PageParams {
    offset: Option<u64>,
    limit: Option<u64>,
}

impl PageParams {
    fn bounds(&self) -> (u64, u64) {
        (
            self.offset.unwrap_or(0),
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
    }
}

#[derive(Debug, Deserialize)]
struct TransferRequest {
    to_identity: String,
}

#[derive(Debug, Deserialize)]
struct ExportRequest {
    format: String,
}

fn actor_identity(headers: &HeaderMap) -> Result<String, CustodyError> {
    headers
        .get(ACTOR_IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            CustodyError::InvalidIdentity(format!("Missing {} header", ACTOR_IDENTITY_HEADER))
        })
}

fn body_reader(body: Body) -> impl tokio::io::AsyncRead + Unpin + Send {
    StreamReader::new(
        body.into_data_stream()
            .map_err(std::io::Error::other),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "evidence-custody",
        "timestamp": chrono::Utc::now()
    }))
}

async fn upload_evidence(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    Path(evidence_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, CustodyError> {
    let actor = actor_identity(&headers)?;
    let outcome = coordinator
        .record_upload(&evidence_id, body_reader(body), &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn verify_evidence(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    Path(evidence_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, CustodyError> {
    let actor = actor_identity(&headers)?;
    let outcome = coordinator
        .record_verification(&evidence_id, body_reader(body), &actor)
        .await?;
    Ok(Json(outcome))
}

async fn transfer_evidence(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    Path(evidence_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<impl IntoResponse, CustodyError> {
    let actor = actor_identity(&headers)?;
    let outcome = coordinator
        .record_transfer(&evidence_id, &actor, &request.to_identity)
        .await?;
    Ok(Json(outcome))
}

async fn export_evidence(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    Path(evidence_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ExportRequest>,
) -> Result<impl IntoResponse, CustodyError> {
    let actor = actor_identity(&headers)?;
    let outcome = coordinator
        .record_export(&evidence_id, &actor, &request.format)
        .await?;
    Ok(Json(outcome))
}

async fn subject_events(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    Path(evidence_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, CustodyError> {
    let (offset, limit) = params.bounds();
    let page = coordinator
        .events_for_subject(&evidence_id, offset, limit)
        .await?;
    Ok(Json(page))
}

async fn ledger_events(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    Path(evidence_id): Path<String>,
) -> Result<impl IntoResponse, CustodyError> {
    let events = coordinator.ledger_history(&evidence_id).await?;
    Ok(Json(events))
}

async fn actor_events(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, CustodyError> {
    let actor = actor_identity(&headers)?;
    let (offset, limit) = params.bounds();
    let page = coordinator.events_for_actor(&actor, offset, limit).await?;
    Ok(Json(page))
}

async fn admin_events(
    State(coordinator): State<Arc<CustodyCoordinator>>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, CustodyError> {
    let (offset, limit) = params.bounds();
    let page = coordinator.admin_events(offset, limit).await?;
    Ok(Json(page))
}
