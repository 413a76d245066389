use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::Error,
    middleware::auth::AuthenticatedSession,
    models::{profile::Profile, storage::Bucket},
    routes::{notice, respond, ApiError},
    services::{session::SessionState, storage::StorageService},
    AppState,
};

/// Avatars are open to every signed-in user, ad images to superadmins, and a
/// trainer bucket to its trainer and superadmins.
fn authorize(session: &SessionState, bucket: &Bucket) -> Result<(), Error> {
    let allowed = match bucket {
        Bucket::Avatars => true,
        _ if session.is_superadmin() => true,
        Bucket::AdsImages => false,
        Bucket::Trainer(owner) => matches!(
            &session.profile,
            Some(Profile::Trainer { id, .. }) if Bucket::Trainer(id.clone()).name() == Bucket::Trainer(owner.clone()).name()
        ),
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::PermissionDenied(format!("no access to bucket {}", bucket.name())))
    }
}

fn bucket_from_path(name: &str) -> Result<Bucket, ApiError> {
    Bucket::parse(name).ok_or_else(|| notice(Error::NotFound(format!("bucket {name}"))))
}

/// POST /storage/{bucket} — multipart with a `path` text field and a `file`
/// part. Files over the configured limit are refused before upload.
pub async fn upload_object(
    State(state): State<AppState>,
    AuthenticatedSession(session): AuthenticatedSession,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let bucket = bucket_from_path(&bucket)?;
    authorize(&session, &bucket).map_err(notice)?;

    let mut path: Option<String> = None;
    let mut file: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| notice(Error::InvalidInput(e.to_string())))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("path") => {
                path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| notice(Error::InvalidInput(e.to_string())))?,
                );
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        notice(Error::PayloadTooLarge {
                            size: state.config.upload_max_bytes + 1,
                            limit: state.config.upload_max_bytes,
                        })
                    } else {
                        notice(Error::InvalidInput(e.to_string()))
                    }
                })?;
                file = Some((file_name, content_type, data));
            }
            _ => {}
        }
    }

    let Some((file_name, content_type, data)) = file else {
        return Err(notice(Error::InvalidInput("missing file part".into())));
    };
    let path = path.filter(|p| !p.trim().is_empty()).unwrap_or(file_name);

    let stored = StorageService::upload(
        state.backend.as_ref(),
        &bucket,
        path.trim(),
        data,
        content_type.as_deref(),
        state.config.upload_max_bytes,
    )
    .await
    .map_err(notice)?;
    Ok((StatusCode::CREATED, respond(&stored)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsQuery {
    #[serde(default)]
    pub prefix: String,
}

pub async fn list_objects(
    State(state): State<AppState>,
    AuthenticatedSession(session): AuthenticatedSession,
    Path(bucket): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<Json<Value>, ApiError> {
    let bucket = bucket_from_path(&bucket)?;
    authorize(&session, &bucket).map_err(notice)?;
    let objects = StorageService::list(state.backend.as_ref(), &bucket, &query.prefix)
        .await
        .map_err(notice)?;
    respond(&objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::privilege::PrivilegeState;
    use crate::services::session::SessionPhase;
    use uuid::Uuid;

    fn trainer_session(id: &str) -> SessionState {
        SessionState {
            phase: SessionPhase::Authenticated,
            principal: None,
            profile: Some(Profile::Trainer {
                id: id.into(),
                email: "coach@sportiko.eu".into(),
                name: "Coach".into(),
            }),
            privilege: PrivilegeState::decided(false),
            expires_at: None,
        }
    }

    #[test]
    fn trainers_reach_only_their_own_bucket() {
        let session = trainer_session("Coach_1");
        assert!(authorize(&session, &Bucket::Avatars).is_ok());
        assert!(authorize(&session, &Bucket::Trainer("coach-1".into())).is_ok());
        assert!(authorize(&session, &Bucket::Trainer("coach-2".into())).is_err());
        assert!(authorize(&session, &Bucket::AdsImages).is_err());
    }

    #[test]
    fn superadmins_reach_every_bucket() {
        let session = SessionState {
            profile: Some(Profile::Superadmin {
                id: Uuid::new_v4(),
                email: "admin@sportiko.eu".into(),
                name: "Admin".into(),
            }),
            privilege: PrivilegeState::decided(true),
            ..trainer_session("x")
        };
        assert!(authorize(&session, &Bucket::AdsImages).is_ok());
        assert!(authorize(&session, &Bucket::Trainer("coach-2".into())).is_ok());
    }
}
