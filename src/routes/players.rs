use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::Error,
    middleware::tenant::TenantContext,
    models::{
        player::{CreateHomeworkRequest, CreatePlayerRequest, RegisterPlayerAccountRequest, UpdatePlayerRequest},
        profile::Profile,
    },
    routes::{notice, respond, ApiError},
    services::players::{self, HomeworkService, PlayerService},
    AppState,
};

/// GET /tenant — which schema the session is bound to, or preview mode.
pub async fn tenant_status(tenant: TenantContext) -> Result<Json<Value>, ApiError> {
    respond(&tenant.resolver.status())
}

// ─── Players ──────────────────────────────────────────────────────────────────

pub async fn list_players(tenant: TenantContext) -> Result<Json<Value>, ApiError> {
    respond(&PlayerService::list(&tenant.resolver).await.map_err(notice)?)
}

pub async fn create_player(
    tenant: TenantContext,
    Json(body): Json<CreatePlayerRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let player = PlayerService::create(&tenant.resolver, &body).await.map_err(notice)?;
    Ok((StatusCode::CREATED, Json(player)))
}

pub async fn update_player(
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePlayerRequest>,
) -> Result<Json<Value>, ApiError> {
    let player = PlayerService::update(&tenant.resolver, id, &body).await.map_err(notice)?;
    Ok(Json(player))
}

pub async fn delete_player(tenant: TenantContext, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    PlayerService::delete(&tenant.resolver, id).await.map_err(notice)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /players/accounts — trainers only; creates a sign-in for a player.
pub async fn register_player_account(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(body): Json<RegisterPlayerAccountRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let trainer_id = match &tenant.session.profile {
        Some(Profile::Trainer { id, .. }) => id.clone(),
        Some(Profile::Superadmin { .. }) => return Err(notice(Error::SimulatedTenant)),
        _ => {
            return Err(notice(Error::PermissionDenied(
                "only trainers register player accounts".into(),
            )))
        }
    };
    let link = PlayerService::register_account(state.backend.as_ref(), &trainer_id, &tenant.resolver, &body)
        .await
        .map_err(notice)?;
    Ok((StatusCode::CREATED, respond(&link)?))
}

// ─── Homework ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct HomeworkFilter {
    pub player_id: Option<Uuid>,
}

pub async fn list_homework(
    tenant: TenantContext,
    Query(filter): Query<HomeworkFilter>,
) -> Result<Json<Value>, ApiError> {
    respond(
        &HomeworkService::list(&tenant.resolver, filter.player_id)
            .await
            .map_err(notice)?,
    )
}

pub async fn create_homework(
    tenant: TenantContext,
    Json(body): Json<CreateHomeworkRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let created = HomeworkService::create(&tenant.resolver, &body).await.map_err(notice)?;
    Ok((StatusCode::CREATED, respond(&created)?))
}

pub async fn list_homework_items(tenant: TenantContext, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    respond(&HomeworkService::items(&tenant.resolver, id).await.map_err(notice)?)
}

/// GET /payments — sample rows until payments are stored.
pub async fn list_payments(tenant: TenantContext) -> Result<Json<Value>, ApiError> {
    respond(&players::payments(&tenant.resolver))
}
