use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::Error;
use crate::routes::{notice, ApiError};
use crate::services::session::SessionState;
use crate::AppState;

/// Snapshot of the console session; rejects with 401 when nobody is signed in.
pub struct AuthenticatedSession(pub SessionState);

impl FromRequestParts<AppState> for AuthenticatedSession {
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = state.session.snapshot();
        if !session.is_authenticated() {
            return Err(notice(Error::Unauthenticated));
        }
        Ok(AuthenticatedSession(session))
    }
}
