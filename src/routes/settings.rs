use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    middleware::auth::AuthenticatedSession,
    services::config_cache::{self, CachedConnection},
    AppState,
};

/// GET /settings/diagnostics — live connection settings, the cached record
/// and the last connectivity probe.
pub async fn diagnostics(State(state): State<AppState>, _session: AuthenticatedSession) -> Json<Value> {
    let live = CachedConnection::from_config(&state.config);
    let cached = config_cache::load(&state.config.config_cache_path);
    let drifted = cached
        .as_ref()
        .is_some_and(|c| c.url != live.url || c.key_prefix != live.key_prefix);

    Json(json!({
        "live": {
            "url": live.url,
            "key_prefix": live.key_prefix,
            "service_role_available": live.service_role_available,
            "placeholder": state.config.is_placeholder(),
        },
        "cached": cached,
        "cache_drifted": drifted,
        "connectivity": state.connectivity.status(),
    }))
}

/// POST /settings/connectivity/retry — probe now instead of waiting.
pub async fn retry_connectivity(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.connectivity.check().await))
}
