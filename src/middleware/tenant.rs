use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::Error;
use crate::routes::{notice, ApiError};
use crate::services::session::SessionState;
use crate::services::tenant_resolver::TenantResolver;
use crate::AppState;

/// Tenant binding for the signed-in profile. Refuses before any query is
/// issued when the profile cannot be bound.
pub struct TenantContext {
    pub session: SessionState,
    pub resolver: TenantResolver,
}

impl FromRequestParts<AppState> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = state.session.snapshot();
        if !session.is_authenticated() {
            return Err(notice(Error::Unauthenticated));
        }
        let resolver = TenantResolver::for_profile(
            state.backend.clone(),
            session.profile.as_ref(),
            state.config.simulate_on_backend_error,
        )
        .map_err(notice)?;
        Ok(TenantContext { session, resolver })
    }
}
