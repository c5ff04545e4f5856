use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::audit::{AuditQuery, AuditSink};
use super::domain::{Actor, AllocationId, ApplicationId, RoomId, RunId};
use super::engine::{EngineError, OverrideRequest};
use super::features::FeatureRecord;
use super::repository::{ClaimError, HousingStore, RepositoryError, RunTracker, RunTrackingError};
use super::service::{AllocationService, AllocationServiceError};

type SharedService<R, A, T> = Arc<AllocationService<R, A, T>>;

#[derive(Debug, Deserialize)]
pub(crate) struct StartRunRequest {
    academic_session: String,
    #[serde(default)]
    started_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OverrideBody {
    application_id: String,
    room_id: String,
    #[serde(default)]
    bed_space: Option<u16>,
    admin_id: String,
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AllocationActionBody {
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn actor_from(id: Option<String>) -> Actor {
    id.map(Actor::User).unwrap_or(Actor::System)
}

/// Router exposing run control, manual allocation actions and the scoring endpoints.
pub fn allocation_router<R, A, T>(service: SharedService<R, A, T>) -> Router
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    Router::new()
        .route("/api/v1/allocation/runs", post(start_run_handler::<R, A, T>))
        .route(
            "/api/v1/allocation/runs/:run_id",
            get(run_status_handler::<R, A, T>),
        )
        .route(
            "/api/v1/allocation/runs/:run_id/cancel",
            post(cancel_run_handler::<R, A, T>),
        )
        .route(
            "/api/v1/allocation/override",
            post(override_handler::<R, A, T>),
        )
        .route(
            "/api/v1/allocation/allocations/:allocation_id/confirm",
            post(confirm_handler::<R, A, T>),
        )
        .route(
            "/api/v1/allocation/allocations/:allocation_id/cancel",
            post(cancel_allocation_handler::<R, A, T>),
        )
        .route(
            "/api/v1/allocation/audit",
            get(audit_trail_handler::<R, A, T>),
        )
        .route(
            "/api/v1/allocation/ml/predict",
            post(predict_handler::<R, A, T>),
        )
        .route(
            "/api/v1/allocation/ml/status",
            get(model_status_handler::<R, A, T>),
        )
        .with_state(service)
}

pub(crate) async fn start_run_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    axum::Json(request): axum::Json<StartRunRequest>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    if request.academic_session.trim().is_empty() {
        let payload = json!({ "error": "academic_session is required" });
        return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
    }

    match service.spawn_run(&request.academic_session, actor_from(request.started_by)) {
        Ok((run, _handle)) => {
            let payload = json!({
                "run_id": run.id,
                "status": run.status.label(),
                "academic_session": run.academic_session,
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(other) => error_response(other),
    }
}

pub(crate) async fn run_status_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    Path(run_id): Path<String>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    let id = RunId(run_id);
    match service.run_status(&id) {
        Ok(run) => {
            let payload = json!({
                "run": run,
                "report": service.report(&id),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(other) => error_response(other),
    }
}

pub(crate) async fn cancel_run_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    Path(run_id): Path<String>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    match service.cancel_run(&RunId(run_id)) {
        Ok(run) => (StatusCode::OK, axum::Json(run)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn override_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    axum::Json(body): axum::Json<OverrideBody>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    let request = OverrideRequest {
        application_id: ApplicationId(body.application_id),
        room_id: RoomId(body.room_id),
        bed_space: body.bed_space,
        actor: Actor::User(body.admin_id),
        reason: body.reason,
    };

    match service.override_allocation(request) {
        Ok(allocation) => (StatusCode::CREATED, axum::Json(allocation)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn confirm_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    Path(allocation_id): Path<String>,
    body: Option<axum::Json<AllocationActionBody>>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    let body = body.map(|axum::Json(body)| body).unwrap_or_default();
    let actor = actor_from(body.actor);
    match service.confirm_allocation(&AllocationId(allocation_id), &actor) {
        Ok(allocation) => (StatusCode::OK, axum::Json(allocation)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn cancel_allocation_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    Path(allocation_id): Path<String>,
    body: Option<axum::Json<AllocationActionBody>>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    let body = body.map(|axum::Json(body)| body).unwrap_or_default();
    let actor = actor_from(body.actor);
    let reason = body
        .reason
        .unwrap_or_else(|| "cancelled on request".to_string());
    match service.cancel_allocation(&AllocationId(allocation_id), &actor, &reason) {
        Ok(allocation) => (StatusCode::OK, axum::Json(allocation)).into_response(),
        Err(other) => error_response(other),
    }
}

pub(crate) async fn audit_trail_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    Query(query): Query<AuditQuery>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    match service.audit_trail(&query) {
        Ok(events) => {
            let payload = json!({ "count": events.len(), "events": events });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(other) => error_response(other),
    }
}

pub(crate) async fn predict_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
    axum::Json(record): axum::Json<FeatureRecord>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    let scored = service.predict_adhoc(&record);
    let payload = json!({
        "prediction": scored.prediction,
        "features": scored.features.to_named(),
        "feature_schema": scored.features.schema,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn model_status_handler<R, A, T>(
    State(service): State<SharedService<R, A, T>>,
) -> Response
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    (StatusCode::OK, axum::Json(service.model_info())).into_response()
}

fn error_response(error: AllocationServiceError) -> Response {
    let status = match &error {
        AllocationServiceError::Run(RunTrackingError::NotFound(_))
        | AllocationServiceError::Engine(
            EngineError::ApplicationNotFound(_)
            | EngineError::RoomNotFound(_)
            | EngineError::AllocationNotFound(_),
        ) => StatusCode::NOT_FOUND,
        AllocationServiceError::Run(RunTrackingError::State(_))
        | AllocationServiceError::Engine(
            EngineError::AllocationInactive(_)
            | EngineError::Claim(
                ClaimError::BedOccupied { .. }
                | ClaimError::RoomFull(_)
                | ClaimError::BedUnavailable { .. },
            )
            | EngineError::Repository(RepositoryError::Conflict),
        ) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
