pub mod ads;
pub mod auth;
pub mod health;
pub mod metrics;
pub mod navigation;
pub mod players;
pub mod schemas;
pub mod settings;
pub mod shop;
pub mod storage;
pub mod trainers;

use std::any::Any;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::AppState;

/// Error half of every handler result: a status plus a JSON notice.
pub type ApiError = (StatusCode, Json<Value>);

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidCredentials | Error::Unauthenticated => StatusCode::UNAUTHORIZED,
        Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
        Error::NoRows | Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidIdentifier(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::TenantNotReady | Error::SimulatedTenant => StatusCode::CONFLICT,
        Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::Network(_) | Error::Provisioning { .. } => StatusCode::BAD_GATEWAY,
        Error::Backend { status, .. } => match StatusCode::from_u16(*status) {
            Ok(code) if code.is_client_error() => code,
            _ => StatusCode::BAD_GATEWAY,
        },
        Error::Serialization(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turns a failed operation into the notice the operator sees, and logs it.
pub fn notice(err: Error) -> ApiError {
    let status = status_for(&err);
    tracing::warn!("{} ({}): {err}", status.as_u16(), err.kind());
    (status, Json(json!({ "error": err.to_string(), "code": err.kind() })))
}

/// Serializes a service result into the success half of a handler result.
pub fn respond<T: Serialize>(value: &T) -> Result<Json<Value>, ApiError> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| notice(Error::from(e)))
}

fn panic_notice(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("Handler panicked; answering with a generic failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Something went wrong", "code": "internal" })),
    )
        .into_response()
}

pub fn build_router(state: AppState) -> Router {
    // The console runs next to its operator; only local front-ends may call it.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([header::CONTENT_TYPE, header::ACCEPT]))
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1"))
                .unwrap_or(false)
        }));

    // Multipart framing on top of the largest accepted file.
    let body_limit = state.config.upload_max_bytes + 64 * 1024;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        // Session
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/session", get(auth::session))
        .route("/auth/events", get(auth::events))
        .route("/auth/display-name", put(auth::update_display_name))
        .route("/navigation", get(navigation::navigation))
        // Superadmin console
        .route("/trainers", get(trainers::list_trainers).post(trainers::create_trainer))
        .route(
            "/trainers/{id}",
            get(trainers::get_trainer)
                .put(trainers::update_trainer)
                .delete(trainers::delete_trainer),
        )
        .route("/trainers/{id}/subscription", put(trainers::update_subscription))
        .route("/trainers/{id}/provision", post(trainers::reprovision_trainer))
        .route("/trainers/{id}/schema", get(trainers::verify_trainer_schema))
        .route("/subscriptions/export", get(trainers::export_subscriptions))
        .route("/ads", get(ads::list_ads).post(ads::create_ad))
        .route("/ads/{id}", put(ads::update_ad).delete(ads::delete_ad))
        .route("/ads/active/{slot}", get(ads::active_ad))
        .route("/shop/items", get(shop::list_items).post(shop::create_item))
        .route("/shop/items/{id}", put(shop::update_item).delete(shop::delete_item))
        .route("/orders", get(shop::list_orders))
        .route("/orders/{id}/items", get(shop::list_order_items))
        .route("/schemas", get(schemas::list_schemas))
        .route("/schemas/tables", get(schemas::list_tables))
        .route("/schemas/policies", get(schemas::list_policies))
        .route("/schemas/policies/repair", post(schemas::create_missing_policies))
        // Trainer console
        .route("/tenant", get(players::tenant_status))
        .route("/players", get(players::list_players).post(players::create_player))
        .route("/players/accounts", post(players::register_player_account))
        .route("/players/{id}", put(players::update_player).delete(players::delete_player))
        .route("/homework", get(players::list_homework).post(players::create_homework))
        .route("/homework/{id}/items", get(players::list_homework_items))
        .route("/payments", get(players::list_payments))
        // Storage
        .route("/storage/{bucket}", get(storage::list_objects).post(storage::upload_object))
        // Settings
        .route("/settings/diagnostics", get(settings::diagnostics))
        .route("/settings/connectivity/retry", post(settings::retry_connectivity))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_notice))
        .with_state(state)
}

#[cfg(test)]
mod tests;
