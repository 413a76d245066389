//! HTTP client for the managed backend: GoTrue-style auth under `/auth/v1`,
//! PostgREST tables and procedures under `/rest/v1`, object storage under
//! `/storage/v1`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::query::{Query, TableRef};
use super::Backend;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::auth::{token_expiry, AuthEvent, AuthSession, Principal};
use crate::models::storage::StoredObject;
use crate::services::metrics::BACKEND_CALLS;

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    service_role_key: Option<String>,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

impl From<UserResponse> for Principal {
    fn from(u: UserResponse) -> Self {
        Principal {
            id: u.id,
            email: u.email.unwrap_or_default().to_lowercase(),
            metadata: u.user_metadata,
        }
    }
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = token_expiry(&self.access_token)
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(self.expires_in.unwrap_or(3600)));
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            principal: self.user.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StorageListEntry {
    name: String,
    #[serde(default)]
    metadata: Option<StorageMetadata>,
}

#[derive(Debug, Deserialize)]
struct StorageMetadata {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mimetype: Option<String>,
}

/// Maps a non-success response body onto the error taxonomy. PostgREST
/// answers `{code, message}`; the auth service answers `{error, error_description}`
/// or `{error_code, msg}`.
fn parse_error(status: StatusCode, body: &str) -> Error {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| parsed.get(*n).and_then(Value::as_str))
            .map(str::to_string)
    };
    let code = field(&["code", "error_code", "error"]);
    let message = field(&["message", "msg", "error_description"]).unwrap_or_else(|| body.trim().to_string());

    if code.as_deref() == Some("invalid_grant") || code.as_deref() == Some("invalid_credentials") {
        return Error::InvalidCredentials;
    }
    Error::from_backend(status.as_u16(), code.as_deref(), &message)
}

/// The auth service refused a refresh token: the session was revoked or
/// ended elsewhere.
fn is_refresh_rejection(err: &Error) -> bool {
    match err {
        Error::InvalidCredentials | Error::Unauthenticated => true,
        Error::Backend { status, .. } => matches!(status, 400 | 401),
        _ => false,
    }
}

impl RestBackend {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            service_role_key: config.service_role_key.clone(),
            session: RwLock::new(None),
            events,
        })
    }

    fn table_url(&self, target: &TableRef) -> String {
        format!("{}/rest/v1/{}", self.base_url, target.table)
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    /// Bearer for data calls: the signed-in principal's token, else the anon key.
    async fn bearer(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let token = self.bearer().await;
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    /// Schema selection headers; reads use `Accept-Profile`, writes
    /// `Content-Profile`.
    fn with_profile(builder: RequestBuilder, target: &TableRef, write: bool) -> RequestBuilder {
        let name = if write { "Content-Profile" } else { "Accept-Profile" };
        builder.header(name, &target.schema)
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        let result = builder.send().await;
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                BACKEND_CALLS.with_label_values(&[operation, "network"]).inc();
                return Err(e.into());
            }
        };
        let status = response.status();
        if status.is_success() {
            BACKEND_CALLS.with_label_values(&[operation, "ok"]).inc();
            return Ok(response);
        }
        BACKEND_CALLS.with_label_values(&[operation, "error"]).inc();
        let body = response.text().await.unwrap_or_default();
        let err = parse_error(status, &body);
        tracing::debug!("{operation} failed with {status}: {err}");
        Err(err)
    }

    async fn send_json(&self, operation: &str, builder: RequestBuilder) -> Result<Value> {
        let response = self.send(operation, builder).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<AuthSession> {
        let url = format!("{}/auth/v1/token?grant_type={grant_type}", self.base_url);
        let builder = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body);
        let response = self.send("auth_token", builder).await?;
        let token: TokenResponse = response.json().await?;
        let session = token.into_session();
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        let builder = self.request(Method::POST, &url).await;
        // The local token is discarded whatever the remote answer.
        let result = self.send("auth_logout", builder).await;
        *self.session.write().await = None;
        result?;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<AuthSession>> {
        Ok(self.session.read().await.clone())
    }

    async fn refresh_session(&self) -> Result<AuthSession> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(Error::Unauthenticated)?;
        let session = match self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(session) => session,
            Err(e) if is_refresh_rejection(&e) => {
                tracing::warn!("Refresh token rejected, dropping the local session: {e}");
                *self.session.write().await = None;
                self.emit(AuthEvent::SignedOut);
                return Err(Error::Unauthenticated);
            }
            Err(e) => return Err(e),
        };
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn create_principal(&self, email: &str, password: &str, metadata: Value) -> Result<Principal> {
        // The admin endpoint creates a confirmed user without touching the
        // current session; without a service key only public signup remains.
        let builder = match &self.service_role_key {
            Some(key) => self
                .http
                .post(format!("{}/auth/v1/admin/users", self.base_url))
                .header("apikey", key)
                .bearer_auth(key)
                .json(&json!({
                    "email": email,
                    "password": password,
                    "email_confirm": true,
                    "user_metadata": metadata,
                })),
            None => self
                .http
                .post(format!("{}/auth/v1/signup", self.base_url))
                .header("apikey", &self.anon_key)
                .json(&json!({ "email": email, "password": password, "data": metadata })),
        };
        let body = self.send_json("auth_create_user", builder).await?;
        // Signup answers either the user or a session wrapping it.
        let user = body.get("user").cloned().unwrap_or(body);
        let user: UserResponse = serde_json::from_value(user)?;
        Ok(user.into())
    }

    async fn update_user_metadata(&self, metadata: Value) -> Result<Principal> {
        if self.session.read().await.is_none() {
            return Err(Error::Unauthenticated);
        }
        let url = format!("{}/auth/v1/user", self.base_url);
        let builder = self.request(Method::PUT, &url).await.json(&json!({ "data": metadata }));
        let user: UserResponse = serde_json::from_value(self.send_json("auth_update_user", builder).await?)?;
        let principal: Principal = user.into();

        if let Some(session) = self.session.write().await.as_mut() {
            session.principal = principal.clone();
        }
        self.emit(AuthEvent::UserUpdated(principal.clone()));
        Ok(principal)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let builder = self.request(Method::GET, &self.table_url(&query.target)).await;
        let builder = Self::with_profile(builder, &query.target, false).query(&query.to_params());
        let body = self.send_json("select", builder).await?;
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    async fn select_single(&self, query: &Query) -> Result<Value> {
        let builder = self.request(Method::GET, &self.table_url(&query.target)).await;
        let builder = Self::with_profile(builder, &query.target, false)
            .header(header::ACCEPT, SINGLE_OBJECT)
            .query(&query.to_params());
        self.send_json("select_single", builder).await
    }

    async fn insert(&self, target: &TableRef, row: Value) -> Result<Value> {
        let builder = self.request(Method::POST, &self.table_url(target)).await;
        let builder = Self::with_profile(builder, target, true)
            .header("Prefer", "return=representation")
            .header(header::ACCEPT, SINGLE_OBJECT)
            .json(&row);
        self.send_json("insert", builder).await
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        let builder = self.request(Method::PATCH, &self.table_url(&query.target)).await;
        let builder = Self::with_profile(builder, &query.target, true)
            .header("Prefer", "return=representation")
            .query(&query.to_params())
            .json(&patch);
        let body = self.send_json("update", builder).await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>> {
        let builder = self.request(Method::DELETE, &self.table_url(&query.target)).await;
        let builder = Self::with_profile(builder, &query.target, true)
            .header("Prefer", "return=representation")
            .query(&query.to_params());
        let body = self.send_json("delete", builder).await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        let url = format!("{}/rest/v1/rpc/{function}", self.base_url);
        let builder = self.request(Method::POST, &url).await.json(&args);
        self.send_json("rpc", builder).await
    }

    async fn upload(&self, bucket: &str, path: &str, body: Bytes, content_type: &str) -> Result<()> {
        let url = format!("{}/storage/v1/object/{bucket}/{path}", self.base_url);
        let builder = self
            .request(Method::POST, &url)
            .await
            .header(header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(body);
        self.send("storage_upload", builder).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>> {
        let url = format!("{}/storage/v1/object/list/{bucket}", self.base_url);
        let builder = self
            .request(Method::POST, &url)
            .await
            .json(&json!({ "prefix": prefix, "limit": 100, "offset": 0 }));
        let entries: Vec<StorageListEntry> = serde_json::from_value(self.send_json("storage_list", builder).await?)?;

        let dir = prefix.trim_end_matches('/');
        Ok(entries
            .into_iter()
            .map(|e| {
                let path = if dir.is_empty() { e.name } else { format!("{dir}/{}", e.name) };
                StoredObject {
                    bucket: bucket.to_string(),
                    public_url: self.public_url(bucket, &path),
                    path,
                    size_bytes: e.metadata.as_ref().and_then(|m| m.size),
                    content_type: e.metadata.and_then(|m| m.mimetype),
                }
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}/auth/v1/health", self.base_url);
        let builder = self.http.get(url).header("apikey", &self.anon_key);
        match builder.send().await {
            Ok(r) if r.status().is_server_error() => Err(Error::Network(format!("backend answered {}", r.status()))),
            Ok(_) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> RestBackend {
        let mut config = Config::local();
        config.backend_url = "https://abc.backend.test/".into();
        RestBackend::new(&config).unwrap()
    }

    #[test]
    fn tables_are_addressed_by_name_and_schema_by_header() {
        let rest = backend();
        let target = TableRef::in_schema("trainer_abc", "players");
        assert_eq!(rest.table_url(&target), "https://abc.backend.test/rest/v1/players");

        let req = RestBackend::with_profile(rest.http.get("https://abc.backend.test/rest/v1/players"), &target, false)
            .build()
            .unwrap();
        assert_eq!(req.headers()["Accept-Profile"], "trainer_abc");
    }

    #[test]
    fn public_urls_follow_storage_layout() {
        assert_eq!(
            backend().public_url("avatars", "u1/me.png"),
            "https://abc.backend.test/storage/v1/object/public/avatars/u1/me.png"
        );
    }

    #[test]
    fn refresh_rejections_are_recognised() {
        let revoked = parse_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token: Already Used"}"#,
        );
        assert!(is_refresh_rejection(&revoked));
        let missing = parse_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":400,"error_code":"refresh_token_not_found","msg":"Invalid Refresh Token"}"#,
        );
        assert!(is_refresh_rejection(&missing));
        assert!(!is_refresh_rejection(&Error::Network("connection reset".into())));
    }

    /// Auth endpoint that accepts any password grant and rejects every refresh.
    async fn revoking_auth_server() -> String {
        use axum::{extract::Query as UrlQuery, http::StatusCode as Status, routing::post, Json, Router};
        use std::collections::HashMap;

        let app = Router::new().route(
            "/auth/v1/token",
            post(|UrlQuery(params): UrlQuery<HashMap<String, String>>| async move {
                if params.get("grant_type").map(String::as_str) == Some("password") {
                    (
                        Status::OK,
                        Json(json!({
                            "access_token": "opaque-access",
                            "refresh_token": "opaque-refresh",
                            "expires_in": 3600,
                            "user": { "id": Uuid::new_v4(), "email": "coach@sportiko.eu" },
                        })),
                    )
                } else {
                    (
                        Status::BAD_REQUEST,
                        Json(json!({ "error": "invalid_grant", "error_description": "Invalid Refresh Token" })),
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn rejected_refresh_drops_the_session_and_signs_out() {
        let mut config = Config::local();
        config.backend_url = revoking_auth_server().await;
        let rest = RestBackend::new(&config).unwrap();
        let mut events = rest.auth_events();

        rest.sign_in("coach@sportiko.eu", "pw-123456").await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn(_)));

        let err = rest.refresh_session().await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
        assert!(rest.current_session().await.unwrap().is_none());
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedOut));
    }

    #[test]
    fn error_bodies_are_classified() {
        let err = parse_error(
            StatusCode::NOT_ACCEPTABLE,
            r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned"}"#,
        );
        assert!(err.is_not_found());

        let err = parse_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert!(matches!(err, Error::InvalidCredentials));

        let err = parse_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, Error::Backend { status: 502, ref message, .. } if message == "upstream down"));
    }

    #[tokio::test]
    async fn data_calls_use_anon_key_until_signed_in() {
        let rest = backend();
        assert_eq!(rest.bearer().await, rest.anon_key);
        assert!(rest.current_session().await.unwrap().is_none());
    }
}
