use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde_json::{json, Value};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};

use crate::{
    middleware::auth::AuthenticatedSession,
    models::auth::{SignInRequest, UpdateDisplayNameRequest},
    routes::{notice, respond, ApiError},
    AppState,
};

pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .session
        .sign_in(body.email.trim(), &body.password)
        .await
        .map_err(notice)?;
    respond(&session)
}

/// Local state is cleared even when the backend call fails; the failure is
/// still reported.
pub async fn sign_out(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.session.sign_out().await.map_err(notice)?;
    Ok(Json(json!({ "signed_out": true })))
}

pub async fn refresh(
    State(state): State<AppState>,
    _session: AuthenticatedSession,
) -> Result<Json<Value>, ApiError> {
    let session = state.session.refresh().await.map_err(notice)?;
    respond(&session)
}

/// GET /auth/session — current snapshot, whatever the phase.
pub async fn session(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    respond(&state.session.snapshot())
}

/// GET /auth/events — every published session state, starting with the
/// current one.
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.session.subscribe()).map(|snapshot| {
        let event = Event::default().event("session");
        Ok(event
            .json_data(&snapshot)
            .unwrap_or_else(|_| Event::default().event("session").data("{}")))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn update_display_name(
    State(state): State<AppState>,
    _session: AuthenticatedSession,
    Json(body): Json<UpdateDisplayNameRequest>,
) -> Result<Json<Value>, ApiError> {
    let principal = state
        .session
        .update_display_name(&body.display_name)
        .await
        .map_err(notice)?;
    Ok(Json(json!({ "principal": principal, "display_name": principal.display_name() })))
}
