use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::middleware::auth::AuthenticatedSession;
use crate::routes::ApiError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct NavItem {
    pub key: &'static str,
    pub label: &'static str,
    pub path: &'static str,
}

const fn item(key: &'static str, label: &'static str, path: &'static str) -> NavItem {
    NavItem { key, label, path }
}

pub const SUPERADMIN_TREE: &[NavItem] = &[
    item("trainers", "Trainers", "/trainers"),
    item("subscriptions", "Subscriptions", "/subscriptions/export"),
    item("shop", "Shop items", "/shop/items"),
    item("orders", "Orders", "/orders"),
    item("ads", "Ads", "/ads"),
    item("schemas", "Tenant schemas", "/schemas"),
    item("preview", "Trainer preview", "/players"),
    item("settings", "Settings", "/settings/diagnostics"),
];

pub const TRAINER_TREE: &[NavItem] = &[
    item("players", "Players", "/players"),
    item("homework", "Homework", "/homework"),
    item("shop", "Shop", "/shop/items"),
    item("payments", "Payments", "/payments"),
    item("settings", "Settings", "/settings/diagnostics"),
];

/// GET /navigation — exactly one of the two trees. While privilege is still
/// loading no tree is chosen.
pub async fn navigation(AuthenticatedSession(session): AuthenticatedSession) -> Result<Json<Value>, ApiError> {
    if session.privilege.loading {
        return Ok(Json(json!({ "loading": true, "tree": null, "items": [] })));
    }
    let (tree, items) = if session.privilege.is_superadmin {
        ("superadmin", SUPERADMIN_TREE)
    } else {
        ("trainer", TRAINER_TREE)
    };
    Ok(Json(json!({ "loading": false, "tree": tree, "items": items })))
}
