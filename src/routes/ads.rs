use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    middleware::super_admin::SuperAdminAuth,
    models::shop::{CreateAdRequest, UpdateAdRequest},
    routes::{notice, respond, ApiError},
    services::shop::AdService,
    AppState,
};

pub async fn list_ads(State(state): State<AppState>, _auth: SuperAdminAuth) -> Result<Json<Value>, ApiError> {
    let ads = AdService::list(state.backend.as_ref()).await.map_err(notice)?;
    respond(&ads)
}

pub async fn create_ad(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Json(body): Json<CreateAdRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ad = AdService::create(state.backend.as_ref(), &body).await.map_err(notice)?;
    Ok((StatusCode::CREATED, respond(&ad)?))
}

pub async fn update_ad(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAdRequest>,
) -> Result<Json<Value>, ApiError> {
    let ad = AdService::update(state.backend.as_ref(), id, &body).await.map_err(notice)?;
    respond(&ad)
}

pub async fn delete_ad(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    AdService::delete(state.backend.as_ref(), id).await.map_err(notice)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /ads/active/{slot} — public. `{"ad": null}` when nothing runs.
pub async fn active_ad(State(state): State<AppState>, Path(slot): Path<String>) -> Result<Json<Value>, ApiError> {
    let ad = AdService::active_for_slot(state.backend.as_ref(), &slot, Utc::now())
        .await
        .map_err(notice)?;
    Ok(Json(json!({ "ad": ad })))
}
