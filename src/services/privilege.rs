use serde::Serialize;
use serde_json::{json, Value};

use crate::db::query::Query;
use crate::db::{maybe_single, Backend};
use crate::error::Result;
use crate::models::auth::Principal;
use crate::models::profile::{Profile, Role};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PrivilegeState {
    pub is_superadmin: bool,
    /// Set while the session is still resolving.
    pub loading: bool,
}

impl PrivilegeState {
    pub fn loading() -> Self {
        Self {
            is_superadmin: false,
            loading: true,
        }
    }

    pub fn decided(is_superadmin: bool) -> Self {
        Self {
            is_superadmin,
            loading: false,
        }
    }
}

/// Which check settled the answer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    SeedEmail,
    ProfileRole,
    RemoteLookup,
}

/// Ordered checks, first decisive one wins: seed e-mail, then the resolved
/// profile's role, then the backend.
pub async fn classify(
    backend: &dyn Backend,
    principal: &Principal,
    profile: Option<&Profile>,
    seed_email: &str,
) -> (bool, Decision) {
    if principal.email.eq_ignore_ascii_case(seed_email) {
        return (true, Decision::SeedEmail);
    }
    if let Some(role) = profile.and_then(Profile::role) {
        return (role == Role::Superadmin, Decision::ProfileRole);
    }
    let remote = match remote_lookup(backend, principal).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Superadmin lookup for {} failed, treating as not privileged: {e}", principal.email);
            false
        }
    };
    (remote, Decision::RemoteLookup)
}

/// `is_superadmin(user_id)`; a direct `superadmins` read when the procedure
/// itself is unavailable.
async fn remote_lookup(backend: &dyn Backend, principal: &Principal) -> Result<bool> {
    match backend.rpc("is_superadmin", json!({ "user_id": principal.id })).await {
        Ok(Value::Bool(b)) => Ok(b),
        Ok(other) => Ok(other.as_array().is_some_and(|rows| !rows.is_empty())),
        Err(e) => {
            tracing::debug!("is_superadmin RPC failed, reading superadmins: {e}");
            let query = Query::table("superadmins").eq("id", principal.id.to_string());
            Ok(maybe_single(backend, &query).await?.is_some())
        }
    }
}
