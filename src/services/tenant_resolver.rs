use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::db::query::{Query, TableRef};
use crate::db::tenant::schema_name;
use crate::db::Backend;
use crate::error::{Error, Result};
use crate::models::profile::Profile;
use crate::services::metrics::SIMULATED_READS;
use crate::services::sample_data;

/// Schema placeholder for queries evaluated against fixtures.
const PREVIEW_SCHEMA: &str = "preview";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SimulationReason {
    /// Superadmins have no tenant; they see fixtures.
    SuperadminPreview,
    BackendUnavailable { error: String },
    /// The feature has no backing table yet.
    NotYetAvailable,
}

impl SimulationReason {
    fn label(&self) -> &'static str {
        match self {
            SimulationReason::SuperadminPreview => "superadmin_preview",
            SimulationReason::BackendUnavailable { .. } => "backend_unavailable",
            SimulationReason::NotYetAvailable => "not_yet_available",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Live,
    Simulated(SimulationReason),
}

/// Rows of a tenant read together with where they came from.
#[derive(Debug, Clone, Serialize)]
pub struct TenantRows {
    pub rows: Vec<Value>,
    pub source: DataSource,
}

impl TenantRows {
    pub fn simulated(table: &str, query: &Query, reason: SimulationReason) -> Self {
        SIMULATED_READS.with_label_values(&[table, reason.label()]).inc();
        Self {
            rows: query.apply(&sample_data::rows(table)),
            source: DataSource::Simulated(reason),
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.source, DataSource::Simulated(_))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|r| serde_json::from_value(r.clone()).map_err(Error::from))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Binding {
    Preview,
    Schema(String),
    /// The owning trainer identifier cannot name a schema.
    Invalid { trainer_id: String },
}

/// Binds the current profile to its tenant schema and scopes table access
/// to it.
#[derive(Clone)]
pub struct TenantResolver {
    backend: Arc<dyn Backend>,
    binding: Binding,
    simulate_on_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantStatus {
    pub ready: bool,
    pub mode: &'static str,
    pub schema: Option<String>,
}

impl TenantResolver {
    /// Fails with `TenantNotReady` when no resolved profile is available.
    pub fn for_profile(backend: Arc<dyn Backend>, profile: Option<&Profile>, simulate_on_error: bool) -> Result<Self> {
        let binding = match profile {
            Some(Profile::Superadmin { .. }) => Binding::Preview,
            Some(Profile::Trainer { id: owner, .. }) | Some(Profile::Player { trainer_id: owner, .. }) => {
                match schema_name(owner) {
                    Ok(schema) => Binding::Schema(schema),
                    Err(e) if simulate_on_error => {
                        tracing::warn!("Tenant identifier rejected, serving sample data: {e}");
                        Binding::Invalid {
                            trainer_id: owner.clone(),
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            Some(Profile::Unresolved { .. }) | None => return Err(Error::TenantNotReady),
        };
        Ok(Self {
            backend,
            binding,
            simulate_on_error,
        })
    }

    pub fn status(&self) -> TenantStatus {
        let (mode, schema) = match &self.binding {
            Binding::Preview => ("superadmin_preview", None),
            Binding::Schema(s) => ("tenant", Some(s.clone())),
            Binding::Invalid { .. } => ("invalid_identifier", None),
        };
        TenantStatus {
            ready: true,
            mode,
            schema,
        }
    }

    pub fn schema(&self) -> Option<&str> {
        match &self.binding {
            Binding::Schema(s) => Some(s),
            _ => None,
        }
    }

    fn target(&self, table: &str) -> TableRef {
        TableRef::in_schema(self.schema().unwrap_or(PREVIEW_SCHEMA), table)
    }

    /// A query on `table` inside the bound schema.
    pub fn query(&self, table: &str) -> Query {
        Query::new(self.target(table))
    }

    pub async fn select(&self, query: &Query) -> Result<TenantRows> {
        let table = query.target.table.as_str();
        match &self.binding {
            Binding::Preview => Ok(TenantRows::simulated(table, query, SimulationReason::SuperadminPreview)),
            Binding::Invalid { trainer_id } => Ok(TenantRows::simulated(
                table,
                query,
                SimulationReason::BackendUnavailable {
                    error: Error::InvalidIdentifier(trainer_id.clone()).to_string(),
                },
            )),
            Binding::Schema(schema) if query.target.schema != *schema => Err(Error::InvalidInput(format!(
                "{} is outside the tenant schema",
                query.target
            ))),
            Binding::Schema(_) => match self.backend.select(query).await {
                Ok(rows) => Ok(TenantRows {
                    rows,
                    source: DataSource::Live,
                }),
                Err(e) if self.simulate_on_error => {
                    tracing::warn!("Tenant read of {} failed, serving sample data: {e}", query.target);
                    Ok(TenantRows::simulated(
                        table,
                        query,
                        SimulationReason::BackendUnavailable { error: e.to_string() },
                    ))
                }
                Err(e) => Err(e),
            },
        }
    }

    fn writable(&self) -> Result<()> {
        match &self.binding {
            Binding::Schema(_) => Ok(()),
            Binding::Preview => Err(Error::SimulatedTenant),
            Binding::Invalid { trainer_id } => Err(Error::InvalidIdentifier(trainer_id.clone())),
        }
    }

    pub async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.writable()?;
        self.backend.insert(&self.target(table), row).await
    }

    /// Writes may only address the bound schema.
    fn scoped(&self, query: &Query) -> Result<()> {
        self.writable()?;
        if Some(query.target.schema.as_str()) != self.schema() {
            return Err(Error::InvalidInput(format!("{} is outside the tenant schema", query.target)));
        }
        Ok(())
    }

    pub async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        self.scoped(query)?;
        self.backend.update(query, patch).await
    }

    pub async fn delete(&self, query: &Query) -> Result<Vec<Value>> {
        self.scoped(query)?;
        self.backend.delete(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;
    use crate::db::tenant::provision_tenant_schema;
    use serde_json::json;
    use uuid::Uuid;

    fn trainer(id: &str) -> Profile {
        Profile::Trainer {
            id: id.into(),
            email: "coach@sportiko.eu".into(),
            name: "Coach".into(),
        }
    }

    fn superadmin() -> Profile {
        Profile::Superadmin {
            id: Uuid::new_v4(),
            email: "admin@sportiko.eu".into(),
            name: "Admin".into(),
        }
    }

    #[tokio::test]
    async fn superadmin_reads_fixtures_without_backend() {
        let memory = Arc::new(MemoryBackend::new());
        memory.set_offline(true);
        let resolver = TenantResolver::for_profile(memory, Some(&superadmin()), false).unwrap();

        let rows = resolver.select(&resolver.query("players")).await.unwrap();
        assert_eq!(rows.source, DataSource::Simulated(SimulationReason::SuperadminPreview));
        assert_eq!(rows.rows, sample_data::rows("players"));

        let err = resolver.insert("players", json!({ "name": "x" })).await.unwrap_err();
        assert!(matches!(err, Error::SimulatedTenant));
    }

    #[tokio::test]
    async fn player_profile_binds_to_trainer_schema() {
        let memory = Arc::new(MemoryBackend::new());
        let player = Profile::Player {
            id: Uuid::new_v4(),
            email: "kid@sportiko.eu".into(),
            name: "Kid".into(),
            trainer_id: "Coach-1".into(),
        };
        let resolver = TenantResolver::for_profile(memory, Some(&player), true).unwrap();
        assert_eq!(resolver.schema(), Some("trainer_coach_1"));
    }

    #[tokio::test]
    async fn unresolved_or_missing_profile_is_not_ready() {
        let memory: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let unresolved = Profile::Unresolved {
            principal_id: Uuid::new_v4(),
            email: "x@y.z".into(),
        };
        for profile in [None, Some(&unresolved)] {
            let err = TenantResolver::for_profile(memory.clone(), profile, true).err().unwrap();
            assert!(matches!(err, Error::TenantNotReady));
        }
    }

    #[tokio::test]
    async fn backend_rejection_is_flagged_or_returned() {
        let memory = Arc::new(MemoryBackend::new());

        // Schema never provisioned: the backend rejects the qualified read.
        let lenient = TenantResolver::for_profile(memory.clone(), Some(&trainer("ghost")), true).unwrap();
        let rows = lenient.select(&lenient.query("players")).await.unwrap();
        assert!(matches!(rows.source, DataSource::Simulated(SimulationReason::BackendUnavailable { .. })));

        let strict = TenantResolver::for_profile(memory, Some(&trainer("ghost")), false).unwrap();
        assert!(strict.select(&strict.query("players")).await.is_err());
    }

    #[tokio::test]
    async fn malformed_identifier_never_reaches_backend() {
        let memory = Arc::new(MemoryBackend::new());
        let resolver = TenantResolver::for_profile(memory.clone(), Some(&trainer("bad id;")), true).unwrap();
        let rows = resolver.select(&resolver.query("players")).await.unwrap();
        assert!(rows.is_simulated());
        assert!(resolver.insert("players", json!({ "name": "x" })).await.is_err());

        let strict = TenantResolver::for_profile(memory, Some(&trainer("bad id;")), false);
        assert!(matches!(strict.err(), Some(Error::InvalidIdentifier(_))));
    }

    #[tokio::test]
    async fn live_reads_are_scoped_to_the_schema() {
        let memory = Arc::new(MemoryBackend::new());
        provision_tenant_schema(memory.as_ref(), "coach-1").await.unwrap();
        provision_tenant_schema(memory.as_ref(), "coach-2").await.unwrap();

        let one = TenantResolver::for_profile(memory.clone(), Some(&trainer("coach-1")), true).unwrap();
        let two = TenantResolver::for_profile(memory, Some(&trainer("coach-2")), true).unwrap();
        one.insert("players", json!({ "name": "Only in one" })).await.unwrap();

        let rows = one.select(&one.query("players")).await.unwrap();
        assert_eq!(rows.source, DataSource::Live);
        assert_eq!(rows.rows.len(), 1);
        assert!(two.select(&two.query("players")).await.unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn reads_outside_the_bound_schema_are_refused() {
        let memory = Arc::new(MemoryBackend::new());
        provision_tenant_schema(memory.as_ref(), "coach-1").await.unwrap();
        provision_tenant_schema(memory.as_ref(), "coach-2").await.unwrap();
        let one = TenantResolver::for_profile(memory.clone(), Some(&trainer("coach-1")), true).unwrap();
        let two = TenantResolver::for_profile(memory, Some(&trainer("coach-2")), true).unwrap();
        two.insert("players", json!({ "name": "Private" })).await.unwrap();

        let foreign = Query::new(TableRef::in_schema("trainer_coach_2", "players"));
        let err = one.select(&foreign).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
