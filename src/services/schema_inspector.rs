use serde_json::{json, Value};

use crate::db::Backend;
use crate::error::Result;
use crate::models::schema_info::{PolicyInfo, SchemaInfo, TableInfo};

/// Read-only views over the backend catalog, plus the one repair action.
pub struct SchemaInspector;

impl SchemaInspector {
    pub async fn schemas(backend: &dyn Backend) -> Result<Vec<SchemaInfo>> {
        Ok(serde_json::from_value(backend.rpc("get_schemas_info", json!({})).await?)?)
    }

    pub async fn tables(backend: &dyn Backend) -> Result<Vec<TableInfo>> {
        Ok(serde_json::from_value(backend.rpc("get_tables_info", json!({})).await?)?)
    }

    pub async fn policies(backend: &dyn Backend) -> Result<Vec<PolicyInfo>> {
        Ok(serde_json::from_value(backend.rpc("get_policies_info", json!({})).await?)?)
    }

    /// Returns whatever the procedure reports (the memory backend answers a
    /// count of created policies).
    pub async fn create_missing_policies(backend: &dyn Backend) -> Result<Value> {
        let result = backend.rpc("create_missing_policies", json!({})).await?;
        tracing::info!("create_missing_policies: {result}");
        Ok(result)
    }
}
