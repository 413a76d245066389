pub mod memory;
pub mod query;
pub mod rest;
pub mod tenant;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::auth::{AuthEvent, AuthSession, Principal};
use crate::models::storage::StoredObject;

use query::{Query, TableRef};

/// The managed backend service: auth, schema-addressed tables, named
/// remote procedures and object storage. One handle is shared by the whole
/// process.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;
    async fn sign_out(&self) -> Result<()>;
    async fn current_session(&self) -> Result<Option<AuthSession>>;
    async fn refresh_session(&self) -> Result<AuthSession>;
    /// Creates a principal without signing in as it.
    async fn create_principal(&self, email: &str, password: &str, metadata: Value) -> Result<Principal>;
    async fn update_user_metadata(&self, metadata: Value) -> Result<Principal>;
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    async fn select(&self, query: &Query) -> Result<Vec<Value>>;
    /// Exactly one row; `Error::NoRows` when nothing matched.
    async fn select_single(&self, query: &Query) -> Result<Value>;
    async fn insert(&self, target: &TableRef, row: Value) -> Result<Value>;
    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>>;
    async fn delete(&self, query: &Query) -> Result<Vec<Value>>;
    async fn rpc(&self, function: &str, args: Value) -> Result<Value>;

    async fn upload(&self, bucket: &str, path: &str, body: Bytes, content_type: &str) -> Result<()>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>>;

    /// Cheap reachability check used by the connectivity probe.
    async fn ping(&self) -> Result<()>;
}

pub fn create_client(config: &Config) -> anyhow::Result<Arc<dyn Backend>> {
    let client = rest::RestBackend::new(config)?;
    Ok(Arc::new(client))
}

/// Single-row read where "no row" is an expected answer.
pub async fn maybe_single(backend: &dyn Backend, query: &Query) -> Result<Option<Value>> {
    match backend.select_single(query).await {
        Ok(row) => Ok(Some(row)),
        Err(Error::NoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn select_as<T: DeserializeOwned>(backend: &dyn Backend, query: &Query) -> Result<Vec<T>> {
    backend
        .select(query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

pub async fn maybe_single_as<T: DeserializeOwned>(backend: &dyn Backend, query: &Query) -> Result<Option<T>> {
    maybe_single(backend, query)
        .await?
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .transpose()
}

/// Deserializes the single row an insert/update returned.
pub fn row_as<T: DeserializeOwned>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

/// Re-provision every active trainer's schema (idempotent).
pub async fn reprovision_all_trainers(backend: &dyn Backend) -> Result<usize> {
    let rows = backend
        .select(&Query::table("trainers").eq("is_active", true))
        .await?;

    let mut count = 0;
    for row in rows {
        let Some(id) = row.get("id").and_then(Value::as_str) else {
            continue;
        };
        match tenant::provision_tenant_schema(backend, id).await {
            Ok(path) => {
                count += 1;
                tracing::info!("Re-provisioned tenant schema for trainer {id} via {path:?}");
            }
            Err(e) => tracing::error!("Re-provisioning trainer {id} failed: {e}"),
        }
    }
    Ok(count)
}
