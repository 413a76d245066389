use std::collections::BTreeSet;

use serde_json::json;

use super::Backend;
use crate::error::{Error, Result};
use crate::models::schema_info::{PolicyInfo, TableInfo};
use crate::services::metrics;

pub const SCHEMA_PREFIX: &str = "trainer_";

/// Name of the per-table policy granting the owning trainer full access.
pub const OWNER_POLICY: &str = "owner_full_access";

/// Postgres identifiers are capped at 63 bytes.
const MAX_IDENTIFIER_LEN: usize = 63 - SCHEMA_PREFIX.len();

/// Canonical trainer identifier: 1..=55 characters of ASCII letters, digits,
/// `-` or `_`, lower-cased. The same value is stored in `trainers.id`, names
/// the schema and appears in the owner policies.
pub fn normalize_trainer_id(trainer_id: &str) -> Result<String> {
    let valid = !trainer_id.is_empty()
        && trainer_id.len() <= MAX_IDENTIFIER_LEN
        && trainer_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::InvalidIdentifier(trainer_id.to_string()));
    }
    Ok(trainer_id.to_ascii_lowercase())
}

/// Returns the tenant schema name for a trainer identifier: the canonical
/// identifier with `-` turned into `_`.
pub fn schema_name(trainer_id: &str) -> Result<String> {
    let id = normalize_trainer_id(trainer_id)?;
    Ok(format!("{SCHEMA_PREFIX}{}", id.replace('-', "_")))
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Integer,
    Numeric,
    Boolean,
    Date,
    Timestamptz,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Uuid => "UUID",
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Numeric => "NUMERIC(10,2)",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Timestamptz => "TIMESTAMPTZ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    SetNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<&'static str>,
    pub primary_key: bool,
    /// Foreign key to another table of the same tenant schema.
    pub references: Option<(&'static str, OnDelete)>,
}

impl Column {
    fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            default: None,
            primary_key: false,
            references: None,
        }
    }

    fn id() -> Self {
        Self {
            primary_key: true,
            nullable: false,
            default: Some("gen_random_uuid()"),
            ..Self::new("id", ColumnType::Uuid)
        }
    }

    fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn default(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    fn references(mut self, table: &'static str, on_delete: OnDelete) -> Self {
        self.references = Some((table, on_delete));
        self
    }

    fn render(&self, schema: &str) -> String {
        let mut sql = format!("{} {}", quote_ident(self.name), self.ty.sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if !self.nullable && !self.primary_key {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if let Some((table, on_delete)) = self.references {
            sql.push_str(&format!(
                " REFERENCES {}.{}(\"id\") ON DELETE {}",
                quote_ident(schema),
                quote_ident(table),
                match on_delete {
                    OnDelete::Cascade => "CASCADE",
                    OnDelete::SetNull => "SET NULL",
                }
            ));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<Column>,
}

fn created_at() -> Column {
    Column::new("created_at", ColumnType::Timestamptz).required().default("NOW()")
}

fn updated_at() -> Column {
    Column::new("updated_at", ColumnType::Timestamptz).required().default("NOW()")
}

/// The tables every tenant schema holds, in dependency order.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantMigration {
    pub tables: Vec<TableDef>,
}

impl TenantMigration {
    pub fn standard() -> Self {
        use ColumnType::*;
        Self {
            tables: vec![
                TableDef {
                    name: "players",
                    columns: vec![
                        Column::id(),
                        Column::new("name", Text).required(),
                        Column::new("email", Text),
                        Column::new("phone", Text),
                        Column::new("position", Text),
                        Column::new("birth_date", Date),
                        Column::new("notes", Text),
                        created_at(),
                        updated_at(),
                    ],
                },
                TableDef {
                    name: "exercises",
                    columns: vec![
                        Column::id(),
                        Column::new("name", Text).required(),
                        Column::new("description", Text),
                        Column::new("category", Text),
                        Column::new("video_url", Text),
                        created_at(),
                    ],
                },
                TableDef {
                    name: "homework",
                    columns: vec![
                        Column::id(),
                        Column::new("player_id", Uuid).required().references("players", OnDelete::Cascade),
                        Column::new("title", Text).required(),
                        Column::new("description", Text),
                        Column::new("due_date", Date),
                        Column::new("status", Text).required().default("'assigned'"),
                        created_at(),
                    ],
                },
                TableDef {
                    name: "homework_items",
                    columns: vec![
                        Column::id(),
                        Column::new("homework_id", Uuid).required().references("homework", OnDelete::Cascade),
                        Column::new("exercise_id", Uuid).references("exercises", OnDelete::SetNull),
                        Column::new("sets", Integer),
                        Column::new("reps", Integer),
                        Column::new("notes", Text),
                        Column::new("completed", Boolean).required().default("FALSE"),
                    ],
                },
                TableDef {
                    name: "assessments",
                    columns: vec![
                        Column::id(),
                        Column::new("player_id", Uuid).required().references("players", OnDelete::Cascade),
                        Column::new("assessed_at", Date).required().default("CURRENT_DATE"),
                        Column::new("metric", Text).required(),
                        Column::new("value", Numeric),
                        Column::new("notes", Text),
                        created_at(),
                    ],
                },
                TableDef {
                    name: "products",
                    columns: vec![
                        Column::id(),
                        Column::new("name", Text).required(),
                        Column::new("description", Text),
                        Column::new("price", Numeric).required().default("0"),
                        Column::new("stock", Integer),
                        Column::new("is_active", Boolean).required().default("TRUE"),
                        created_at(),
                    ],
                },
                TableDef {
                    name: "orders",
                    columns: vec![
                        Column::id(),
                        Column::new("player_id", Uuid).references("players", OnDelete::SetNull),
                        Column::new("product_id", Uuid).references("products", OnDelete::SetNull),
                        Column::new("quantity", Integer).required().default("1"),
                        Column::new("total", Numeric).required().default("0"),
                        Column::new("status", Text).required().default("'pending'"),
                        created_at(),
                    ],
                },
            ],
        }
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    /// Statements creating the schema, its tables, RLS and owner policies.
    /// Every statement is safe to re-run.
    pub fn statements(&self, schema: &str, trainer_id: &str) -> Vec<String> {
        let qs = quote_ident(schema);
        let mut stmts = vec![format!("CREATE SCHEMA IF NOT EXISTS {qs}")];

        for table in &self.tables {
            let qt = format!("{qs}.{}", quote_ident(table.name));
            let columns = table
                .columns
                .iter()
                .map(|c| format!("    {}", c.render(schema)))
                .collect::<Vec<_>>()
                .join(",\n");
            stmts.push(format!("CREATE TABLE IF NOT EXISTS {qt} (\n{columns}\n)"));
            stmts.push(format!("ALTER TABLE {qt} ENABLE ROW LEVEL SECURITY"));
            stmts.push(format!(
                "DO $$ BEGIN
   IF NOT EXISTS (
     SELECT 1 FROM pg_policies
     WHERE schemaname = {schema_lit} AND tablename = {table_lit} AND policyname = {policy_lit}
   ) THEN
     CREATE POLICY {policy} ON {qt} FOR ALL
       USING (auth.uid()::text = {owner})
       WITH CHECK (auth.uid()::text = {owner});
   END IF;
 END $$",
                schema_lit = quote_literal(schema),
                table_lit = quote_literal(table.name),
                policy_lit = quote_literal(OWNER_POLICY),
                policy = quote_ident(OWNER_POLICY),
                owner = quote_literal(&trainer_id.to_ascii_lowercase()),
            ));
        }
        stmts
    }

    /// The whole migration as one script, submitted in a single call.
    pub fn render(&self, schema: &str, trainer_id: &str) -> String {
        let mut sql = self.statements(schema, trainer_id).join(";\n");
        sql.push(';');
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionPath {
    Script,
    FallbackRpc,
}

/// Provision a trainer's isolated schema: the rendered script via
/// `execute_sql` first, the server-side `create_tenant_schema` procedure if
/// that fails. Safe to call again for an existing tenant.
pub async fn provision_tenant_schema(backend: &dyn Backend, trainer_id: &str) -> Result<ProvisionPath> {
    let owner = normalize_trainer_id(trainer_id)?;
    let schema = schema_name(&owner)?;
    let script = TenantMigration::standard().render(&schema, &owner);

    let primary = match backend.rpc("execute_sql", json!({ "sql": script })).await {
        Ok(_) => {
            metrics::PROVISIONING_COUNTER.with_label_values(&["script", "ok"]).inc();
            tracing::info!("Provisioned tenant schema: {schema}");
            return Ok(ProvisionPath::Script);
        }
        Err(e) => e,
    };
    tracing::warn!("execute_sql provisioning of {schema} failed, trying create_tenant_schema: {primary}");
    metrics::PROVISIONING_COUNTER.with_label_values(&["script", "error"]).inc();

    match backend
        .rpc(
            "create_tenant_schema",
            json!({ "schema_name": schema, "trainer_id": owner }),
        )
        .await
    {
        Ok(_) => {
            metrics::PROVISIONING_COUNTER.with_label_values(&["fallback", "ok"]).inc();
            tracing::info!("Provisioned tenant schema via create_tenant_schema: {schema}");
            Ok(ProvisionPath::FallbackRpc)
        }
        Err(fallback) => {
            metrics::PROVISIONING_COUNTER.with_label_values(&["fallback", "error"]).inc();
            tracing::error!("Provisioning of {schema} abandoned: {fallback}");
            Err(Error::Provisioning {
                primary: primary.to_string(),
                fallback: fallback.to_string(),
            })
        }
    }
}

/// What the backend reports for a tenant schema, compared with the definition.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SchemaReport {
    pub schema_name: String,
    pub missing_tables: Vec<String>,
    pub tables_without_rls: Vec<String>,
    pub tables_without_policy: Vec<String>,
}

impl SchemaReport {
    pub fn is_complete(&self) -> bool {
        self.missing_tables.is_empty()
            && self.tables_without_rls.is_empty()
            && self.tables_without_policy.is_empty()
    }
}

pub async fn verify_tenant_schema(backend: &dyn Backend, trainer_id: &str) -> Result<SchemaReport> {
    let schema = schema_name(trainer_id)?;
    let tables: Vec<TableInfo> = serde_json::from_value(backend.rpc("get_tables_info", json!({})).await?)?;
    let policies: Vec<PolicyInfo> = serde_json::from_value(backend.rpc("get_policies_info", json!({})).await?)?;

    let present: Vec<&TableInfo> = tables.iter().filter(|t| t.schema_name == schema).collect();
    let with_policy: BTreeSet<&str> = policies
        .iter()
        .filter(|p| p.schema_name == schema && p.policy_name == OWNER_POLICY)
        .map(|p| p.table_name.as_str())
        .collect();

    let mut report = SchemaReport {
        schema_name: schema.clone(),
        ..Default::default()
    };
    for name in TenantMigration::standard().table_names() {
        match present.iter().find(|t| t.table_name == name) {
            None => report.missing_tables.push(name.to_string()),
            Some(t) => {
                if !t.rls_enabled {
                    report.tables_without_rls.push(name.to_string());
                }
                if !with_policy.contains(name) {
                    report.tables_without_policy.push(name.to_string());
                }
            }
        }
    }
    Ok(report)
}

/// Drop a trainer's schema and everything in it.
pub async fn drop_tenant_schema(backend: &dyn Backend, trainer_id: &str) -> Result<()> {
    let schema = schema_name(trainer_id)?;
    backend
        .rpc(
            "execute_sql",
            json!({ "sql": format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(&schema)) }),
        )
        .await?;
    tracing::info!("Dropped tenant schema: {schema}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;

    #[test]
    fn schema_names_are_deterministic_and_distinct() {
        let a = "0b7e6a52-3c1d-4f7e-9a7d-1f2e3d4c5b6a";
        let b = "7c1d2e3f-4a5b-4c6d-8e7f-9a0b1c2d3e4f";
        assert_eq!(schema_name(a).unwrap(), schema_name(a).unwrap());
        assert_ne!(schema_name(a).unwrap(), schema_name(b).unwrap());
        assert_eq!(
            schema_name(a).unwrap(),
            "trainer_0b7e6a52_3c1d_4f7e_9a7d_1f2e3d4c5b6a"
        );
    }

    #[test]
    fn mixed_case_ids_share_one_canonical_form() {
        let upper = "0B7E6A52-3C1D-4F7E-9A7D-1F2E3D4C5B6A";
        let lower = "0b7e6a52-3c1d-4f7e-9a7d-1f2e3d4c5b6a";
        assert_eq!(normalize_trainer_id(upper).unwrap(), lower);
        assert_eq!(schema_name(upper).unwrap(), schema_name(lower).unwrap());

        let script = TenantMigration::standard().render(&schema_name(upper).unwrap(), upper);
        assert!(script.contains(&format!("auth.uid()::text = '{lower}'")));
        assert!(!script.contains(upper));
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        for bad in ["", "x\"; DROP SCHEMA public; --", "a b", "ünïcode", &"x".repeat(56)] {
            assert!(matches!(schema_name(bad), Err(Error::InvalidIdentifier(_))), "{bad}");
        }
    }

    #[test]
    fn quoting_escapes_delimiters() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn rendered_script_covers_every_table() {
        let migration = TenantMigration::standard();
        let sql = migration.render("trainer_abc", "abc");

        assert!(sql.starts_with("CREATE SCHEMA IF NOT EXISTS \"trainer_abc\""));
        for table in migration.table_names() {
            assert!(sql.contains(&format!("CREATE TABLE IF NOT EXISTS \"trainer_abc\".\"{table}\"")));
            assert!(sql.contains(&format!("ALTER TABLE \"trainer_abc\".\"{table}\" ENABLE ROW LEVEL SECURITY")));
            assert!(sql.contains(&format!("CREATE POLICY \"owner_full_access\" ON \"trainer_abc\".\"{table}\"")));
        }
        assert!(sql.contains("auth.uid()::text = 'abc'"));
        assert_eq!(migration.tables.len(), 7);
    }

    #[test]
    fn foreign_keys_point_at_earlier_tables_of_the_same_schema() {
        let migration = TenantMigration::standard();
        let mut seen = Vec::new();
        for table in &migration.tables {
            for column in &table.columns {
                if let Some((target, _)) = column.references {
                    assert!(seen.contains(&target), "{} references {target} before it exists", table.name);
                }
            }
            seen.push(table.name);
        }
        let sql = migration.render("trainer_abc", "abc");
        assert!(sql.contains("REFERENCES \"trainer_abc\".\"players\"(\"id\") ON DELETE CASCADE"));
    }

    #[tokio::test]
    async fn provisioning_twice_is_idempotent() {
        let backend = MemoryBackend::new();
        let id = "0b7e6a52-3c1d-4f7e-9a7d-1f2e3d4c5b6a";

        assert_eq!(provision_tenant_schema(&backend, id).await.unwrap(), ProvisionPath::Script);
        let first = backend.tables_in(&schema_name(id).unwrap());
        assert_eq!(provision_tenant_schema(&backend, id).await.unwrap(), ProvisionPath::Script);
        let second = backend.tables_in(&schema_name(id).unwrap());

        assert_eq!(first, second);
        assert_eq!(first.len(), 7);
        assert!(verify_tenant_schema(&backend, id).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn script_failure_falls_back_to_named_procedure() {
        let backend = MemoryBackend::new();
        backend.fail_rpc("execute_sql");

        let path = provision_tenant_schema(&backend, "trainer-one").await.unwrap();
        assert_eq!(path, ProvisionPath::FallbackRpc);
        assert_eq!(backend.tables_in("trainer_trainer_one").len(), 7);
    }

    #[tokio::test]
    async fn both_paths_failing_is_reported() {
        let backend = MemoryBackend::new();
        backend.fail_rpc("execute_sql");
        backend.fail_rpc("create_tenant_schema");

        let err = provision_tenant_schema(&backend, "trainer-one").await.unwrap_err();
        assert!(matches!(err, Error::Provisioning { .. }));
        assert!(backend.tables_in("trainer_trainer_one").is_empty());
    }

    #[tokio::test]
    async fn verification_reports_gaps_and_drop_removes_schema() {
        let backend = MemoryBackend::new();
        let report = verify_tenant_schema(&backend, "abc").await.unwrap();
        assert_eq!(report.missing_tables.len(), 7);

        provision_tenant_schema(&backend, "abc").await.unwrap();
        drop_tenant_schema(&backend, "abc").await.unwrap();
        assert!(backend.tables_in("trainer_abc").is_empty());
    }
}
