use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    middleware::super_admin::SuperAdminAuth,
    models::tenant::{CreateTrainerRequest, UpdateSubscriptionRequest, UpdateTrainerRequest},
    routes::{notice, respond, ApiError},
    services::trainers::TrainerService,
    AppState,
};

// ─── Trainer CRUD ─────────────────────────────────────────────────────────────

pub async fn list_trainers(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
) -> Result<Json<Value>, ApiError> {
    let trainers = TrainerService::list(state.backend.as_ref()).await.map_err(notice)?;
    respond(&trainers)
}

pub async fn get_trainer(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let trainer = TrainerService::get(state.backend.as_ref(), &id).await.map_err(notice)?;
    respond(&trainer)
}

/// POST /trainers — principal, trainer row, tenant schema, verification.
pub async fn create_trainer(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Json(body): Json<CreateTrainerRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let onboarding = TrainerService::create(state.backend.as_ref(), &body)
        .await
        .map_err(notice)?;
    Ok((StatusCode::CREATED, respond(&onboarding)?))
}

pub async fn update_trainer(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<String>,
    Json(body): Json<UpdateTrainerRequest>,
) -> Result<Json<Value>, ApiError> {
    let trainer = TrainerService::update(state.backend.as_ref(), &id, &body)
        .await
        .map_err(notice)?;
    respond(&trainer)
}

pub async fn delete_trainer(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    TrainerService::delete(state.backend.as_ref(), &id).await.map_err(notice)?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Subscriptions & schema ───────────────────────────────────────────────────

pub async fn update_subscription(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<String>,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> Result<Json<Value>, ApiError> {
    let trainer = TrainerService::update_subscription(state.backend.as_ref(), &id, &body)
        .await
        .map_err(notice)?;
    respond(&trainer)
}

pub async fn reprovision_trainer(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (path, report) = TrainerService::reprovision(state.backend.as_ref(), &id)
        .await
        .map_err(notice)?;
    Ok(Json(json!({
        "provisioning": path,
        "complete": report.is_complete(),
        "schema": report,
    })))
}

pub async fn verify_trainer_schema(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = TrainerService::verify(state.backend.as_ref(), &id).await.map_err(notice)?;
    Ok(Json(json!({ "complete": report.is_complete(), "schema": report })))
}

/// GET /subscriptions/export — CSV download of every trainer's subscription.
pub async fn export_subscriptions(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
) -> Result<impl IntoResponse, ApiError> {
    let csv = TrainerService::export_subscriptions_csv(state.backend.as_ref())
        .await
        .map_err(notice)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"subscriptions.csv\""),
        ],
        csv,
    ))
}
