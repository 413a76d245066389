use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::Error;
use crate::routes::{notice, ApiError};
use crate::services::session::SessionState;
use crate::AppState;

/// Extractor admitting only a session the privilege classifier marked as
/// superadmin.
pub struct SuperAdminAuth(pub SessionState);

impl FromRequestParts<AppState> for SuperAdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = state.session.snapshot();
        if !session.is_authenticated() {
            return Err(notice(Error::Unauthenticated));
        }
        if !session.privilege.is_superadmin {
            return Err(notice(Error::PermissionDenied("superadmin access required".into())));
        }
        Ok(SuperAdminAuth(session))
    }
}
