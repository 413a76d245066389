use serde::{Deserialize, Serialize};

/// Row of `get_schemas_info()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaInfo {
    pub schema_name: String,
    #[serde(default)]
    pub table_count: Option<i64>,
}

/// Row of `get_tables_info()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableInfo {
    pub schema_name: String,
    pub table_name: String,
    #[serde(default)]
    pub rls_enabled: bool,
}

/// Row of `get_policies_info()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyInfo {
    pub schema_name: String,
    pub table_name: String,
    pub policy_name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub definition: Option<String>,
}
