use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::build_router;
use crate::config::Config;
use crate::db::memory::MemoryBackend;
use crate::AppState;

fn app() -> (Arc<MemoryBackend>, Router) {
    let memory = Arc::new(MemoryBackend::new());
    let state = AppState::new(memory.clone(), Arc::new(Config::local()));
    (memory, build_router(state))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let res = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn sign_in(app: &Router, email: &str, password: &str) -> (StatusCode, Value) {
    call(app, Method::POST, "/auth/sign-in", Some(json!({ "email": email, "password": password }))).await
}

#[tokio::test]
async fn tenant_routes_refuse_without_a_session() {
    let (_, app) = app();
    let (status, body) = call(&app, Method::GET, "/players", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");

    let (status, _) = call(&app, Method::GET, "/trainers", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_password_is_reported_as_invalid_credentials() {
    let (memory, app) = app();
    memory.add_user("trainer_pt@sportiko.eu", "pw-123456", json!({}));

    let (status, body) = sign_in(&app, "trainer_pt@sportiko.eu", "nope").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_credentials");

    let (_, session) = call(&app, Method::GET, "/auth/session", None).await;
    assert_ne!(session["phase"], "authenticated");
}

#[tokio::test]
async fn seed_trainer_gets_a_tenant_on_first_sign_in() {
    let (memory, app) = app();
    memory.add_user("trainer_pt@sportiko.eu", "pw-123456", json!({ "name": "PT Coach" }));

    let (status, session) = sign_in(&app, "trainer_pt@sportiko.eu", "pw-123456").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["phase"], "authenticated");
    assert_eq!(session["profile"]["role"], "trainer");
    assert_eq!(session["privilege"]["is_superadmin"], false);

    let (_, nav) = call(&app, Method::GET, "/navigation", None).await;
    assert_eq!(nav["tree"], "trainer");

    let (status, tenant) = call(&app, Method::GET, "/tenant", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tenant["mode"], "tenant");
    let schema = tenant["schema"].as_str().unwrap().to_string();
    assert!(schema.starts_with("trainer_"));
    assert_eq!(memory.tables_in(&schema).len(), 7);

    let (status, _) = call(&app, Method::POST, "/players", Some(json!({ "name": "Ana" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, players) = call(&app, Method::GET, "/players", None).await;
    assert_eq!(players["source"], "live");
    assert_eq!(players["rows"].as_array().unwrap().len(), 1);
    assert_eq!(players["rows"][0]["name"], "Ana");

    let (status, body) = call(&app, Method::GET, "/trainers", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission_denied");
}

#[tokio::test]
async fn superadmin_previews_sample_data_and_onboards_trainers() {
    let (memory, app) = app();
    memory.add_user("admin@sportiko.eu", "pw-123456", json!({}));

    let (status, _) = sign_in(&app, "admin@sportiko.eu", "pw-123456").await;
    assert_eq!(status, StatusCode::OK);

    let (_, nav) = call(&app, Method::GET, "/navigation", None).await;
    assert_eq!(nav["tree"], "superadmin");

    let (_, players) = call(&app, Method::GET, "/players", None).await;
    assert_eq!(players["source"]["simulated"]["reason"], "superadmin_preview");
    assert!(!players["rows"].as_array().unwrap().is_empty());

    let (status, body) = call(&app, Method::POST, "/players", Some(json!({ "name": "Ana" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "simulated_tenant");

    let (status, onboarding) = call(
        &app,
        Method::POST,
        "/trainers",
        Some(json!({ "email": "coach@sportiko.eu", "password": "secret1", "name": "Coach" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(onboarding["provisioning"], "script");
    assert_eq!(onboarding["trainer"]["subscription_status"], "trial");

    let (_, trainers) = call(&app, Method::GET, "/trainers", None).await;
    assert_eq!(trainers.as_array().unwrap().len(), 1);

    let id = onboarding["trainer"]["id"].as_str().unwrap();
    let (status, report) = call(&app, Method::GET, &format!("/trainers/{id}/schema"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["complete"], true);
}

#[tokio::test]
async fn sign_out_returns_to_unauthenticated() {
    let (memory, app) = app();
    memory.add_user("admin@sportiko.eu", "pw-123456", json!({}));
    sign_in(&app, "admin@sportiko.eu", "pw-123456").await;

    let (status, _) = call(&app, Method::POST, "/auth/sign-out", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, session) = call(&app, Method::GET, "/auth/session", None).await;
    assert_eq!(session["phase"], "unauthenticated");
    assert!(session["profile"].is_null());
}

#[tokio::test]
async fn public_ad_lookup_answers_null_when_nothing_runs() {
    let (_, app) = app();
    let (status, body) = call(&app, Method::GET, "/ads/active/home_banner", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["ad"].is_null());
}

#[tokio::test]
async fn health_reports_backend_reachability() {
    let (memory, app) = app();
    let (status, _) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    memory.set_offline(true);
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
}
