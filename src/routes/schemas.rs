use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    middleware::super_admin::SuperAdminAuth,
    routes::{notice, respond, ApiError},
    services::schema_inspector::SchemaInspector,
    AppState,
};

pub async fn list_schemas(State(state): State<AppState>, _auth: SuperAdminAuth) -> Result<Json<Value>, ApiError> {
    respond(&SchemaInspector::schemas(state.backend.as_ref()).await.map_err(notice)?)
}

pub async fn list_tables(State(state): State<AppState>, _auth: SuperAdminAuth) -> Result<Json<Value>, ApiError> {
    respond(&SchemaInspector::tables(state.backend.as_ref()).await.map_err(notice)?)
}

pub async fn list_policies(State(state): State<AppState>, _auth: SuperAdminAuth) -> Result<Json<Value>, ApiError> {
    respond(&SchemaInspector::policies(state.backend.as_ref()).await.map_err(notice)?)
}

/// POST /schemas/policies/repair
pub async fn create_missing_policies(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
) -> Result<Json<Value>, ApiError> {
    let result = SchemaInspector::create_missing_policies(state.backend.as_ref())
        .await
        .map_err(notice)?;
    Ok(Json(json!({ "result": result })))
}
