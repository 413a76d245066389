use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    middleware::{auth::AuthenticatedSession, super_admin::SuperAdminAuth},
    models::shop::{CreateShopItemRequest, UpdateShopItemRequest},
    routes::{notice, respond, ApiError},
    services::shop::{OrderService, ShopItemService},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ShopFilter {
    #[serde(default)]
    pub active_only: bool,
}

/// GET /shop/items — trainers only ever see active items.
pub async fn list_items(
    State(state): State<AppState>,
    AuthenticatedSession(session): AuthenticatedSession,
    Query(filter): Query<ShopFilter>,
) -> Result<Json<Value>, ApiError> {
    let active_only = filter.active_only || !session.is_superadmin();
    let items = ShopItemService::list(state.backend.as_ref(), active_only)
        .await
        .map_err(notice)?;
    respond(&items)
}

pub async fn create_item(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Json(body): Json<CreateShopItemRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let item = ShopItemService::create(state.backend.as_ref(), &body).await.map_err(notice)?;
    Ok((StatusCode::CREATED, respond(&item)?))
}

pub async fn update_item(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateShopItemRequest>,
) -> Result<Json<Value>, ApiError> {
    let item = ShopItemService::update(state.backend.as_ref(), id, &body)
        .await
        .map_err(notice)?;
    respond(&item)
}

pub async fn delete_item(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ShopItemService::delete(state.backend.as_ref(), id).await.map_err(notice)?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Orders ───────────────────────────────────────────────────────────────────

pub async fn list_orders(State(state): State<AppState>, _auth: SuperAdminAuth) -> Result<Json<Value>, ApiError> {
    let orders = OrderService::list(state.backend.as_ref()).await.map_err(notice)?;
    respond(&orders)
}

pub async fn list_order_items(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let items = OrderService::items(state.backend.as_ref(), id).await.map_err(notice)?;
    Ok(Json(json!({ "order_id": id, "items": items })))
}
