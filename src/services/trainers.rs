use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::query::{Query, TableRef};
use crate::db::tenant::{self, ProvisionPath, SchemaReport};
use crate::db::{maybe_single_as, row_as, select_as, Backend};
use crate::error::{Error, Result};
use crate::models::tenant::{
    CreateTrainerRequest, SubscriptionStatus, Trainer, UpdateSubscriptionRequest, UpdateTrainerRequest,
};

pub const TRIAL_DAYS: i64 = 30;
pub const DEFAULT_PLAN: &str = "basic";

/// Outcome of the onboarding workflow. Steps run in order and earlier
/// steps are not undone when a later one fails.
#[derive(Debug, Serialize)]
pub struct Onboarding {
    pub trainer: Trainer,
    pub provisioning: ProvisionPath,
    pub schema: SchemaReport,
}

pub struct TrainerService;

impl TrainerService {
    fn table() -> TableRef {
        TableRef::shared("trainers")
    }

    pub async fn list(backend: &dyn Backend) -> Result<Vec<Trainer>> {
        select_as(backend, &Query::table("trainers").order_by("created_at", true)).await
    }

    pub async fn get(backend: &dyn Backend, id: &str) -> Result<Trainer> {
        maybe_single_as(backend, &Query::table("trainers").eq("id", id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("trainer {id}")))
    }

    /// Creates the principal, the trainer row and the tenant schema.
    pub async fn create(backend: &dyn Backend, req: &CreateTrainerRequest) -> Result<Onboarding> {
        let email = req.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::InvalidInput("a valid email is required".into()));
        }
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name is required".into()));
        }
        if req.password.len() < 6 {
            return Err(Error::InvalidInput("password must be at least 6 characters".into()));
        }

        let principal = backend
            .create_principal(&email, &req.password, json!({ "name": req.name.trim(), "role": "trainer" }))
            .await?;
        tracing::info!("Created principal for trainer {email}");

        let trainer = Self::insert_row(
            backend,
            &principal.id.to_string(),
            &email,
            req.name.trim(),
            req.phone.as_deref(),
            req.plan.as_deref().unwrap_or(DEFAULT_PLAN),
        )
        .await?;

        let (provisioning, schema) = Self::provision_and_verify(backend, &trainer.id).await?;
        Ok(Onboarding {
            trainer,
            provisioning,
            schema,
        })
    }

    /// Trainer row and schema for a principal that already exists. A
    /// provisioning failure is logged; the row stays.
    pub async fn onboard_existing(backend: &dyn Backend, id: &str, email: &str, name: &str) -> Result<Trainer> {
        let trainer = Self::insert_row(backend, id, email, name, None, DEFAULT_PLAN).await?;
        if let Err(e) = Self::provision_and_verify(backend, &trainer.id).await {
            tracing::warn!("Trainer {email} created without a tenant schema: {e}");
        }
        Ok(trainer)
    }

    async fn insert_row(
        backend: &dyn Backend,
        id: &str,
        email: &str,
        name: &str,
        phone: Option<&str>,
        plan: &str,
    ) -> Result<Trainer> {
        let id = tenant::normalize_trainer_id(id)?;
        let schema_name = tenant::schema_name(&id)?;
        // `Coach-A` and `coach_a` would share a schema; the first one keeps it.
        let claimed = backend
            .select(&Query::table("trainers").eq("schema_name", schema_name.as_str()))
            .await?;
        if !claimed.is_empty() {
            return Err(Error::InvalidInput(format!(
                "tenant schema {schema_name} already belongs to another trainer"
            )));
        }
        let now = Utc::now();
        let row = json!({
            "id": id,
            "email": email,
            "name": name,
            "phone": phone,
            "is_active": true,
            "plan": plan,
            "subscription_status": SubscriptionStatus::Trial,
            "trial_started_at": now,
            "trial_ends_at": now + Duration::days(TRIAL_DAYS),
            "subscription_started_at": Value::Null,
            "subscription_ends_at": Value::Null,
            "schema_name": schema_name,
            "created_at": now,
            "updated_at": now,
        });
        let trainer: Trainer = row_as(backend.insert(&Self::table(), row).await?)?;
        tracing::info!("Inserted trainer row {} ({})", trainer.id, trainer.email);
        Ok(trainer)
    }

    async fn provision_and_verify(backend: &dyn Backend, id: &str) -> Result<(ProvisionPath, SchemaReport)> {
        let path = tenant::provision_tenant_schema(backend, id).await?;
        let report = tenant::verify_tenant_schema(backend, id).await?;
        if !report.is_complete() {
            tracing::warn!(
                "Tenant schema {} is incomplete: missing {:?}, no RLS on {:?}, no policy on {:?}",
                report.schema_name,
                report.missing_tables,
                report.tables_without_rls,
                report.tables_without_policy
            );
        }
        Ok((path, report))
    }

    async fn patch(backend: &dyn Backend, id: &str, mut patch: Value) -> Result<Trainer> {
        if let Value::Object(obj) = &mut patch {
            if obj.is_empty() {
                return Err(Error::InvalidInput("nothing to update".into()));
            }
            obj.insert("updated_at".into(), json!(Utc::now()));
        }
        let mut rows = backend.update(&Query::table("trainers").eq("id", id), patch).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("trainer {id}")));
        }
        row_as(rows.remove(0))
    }

    pub async fn update(backend: &dyn Backend, id: &str, req: &UpdateTrainerRequest) -> Result<Trainer> {
        Self::patch(backend, id, serde_json::to_value(req)?).await
    }

    pub async fn update_subscription(
        backend: &dyn Backend,
        id: &str,
        req: &UpdateSubscriptionRequest,
    ) -> Result<Trainer> {
        let trainer = Self::patch(backend, id, serde_json::to_value(req)?).await?;
        tracing::info!(
            "Subscription of trainer {} is now {} on plan {}",
            trainer.id,
            trainer.subscription_status,
            trainer.plan
        );
        Ok(trainer)
    }

    /// Drops the tenant schema, then the trainer row. The principal is left
    /// to the auth service.
    pub async fn delete(backend: &dyn Backend, id: &str) -> Result<()> {
        let trainer = Self::get(backend, id).await?;
        tenant::drop_tenant_schema(backend, &trainer.id).await?;
        backend.delete(&Query::table("trainers").eq("id", id)).await?;
        tracing::info!("Deleted trainer {} ({})", trainer.id, trainer.email);
        Ok(())
    }

    pub async fn reprovision(backend: &dyn Backend, id: &str) -> Result<(ProvisionPath, SchemaReport)> {
        let trainer = Self::get(backend, id).await?;
        Self::provision_and_verify(backend, &trainer.id).await
    }

    pub async fn verify(backend: &dyn Backend, id: &str) -> Result<SchemaReport> {
        let trainer = Self::get(backend, id).await?;
        tenant::verify_tenant_schema(backend, &trainer.id).await
    }

    /// Subscription overview as CSV, one line per trainer.
    pub async fn export_subscriptions_csv(backend: &dyn Backend) -> Result<String> {
        let trainers = Self::list(backend).await?;
        let mut wtr = csv::Writer::from_writer(Vec::new());
        let fmt = |d: Option<chrono::DateTime<Utc>>| d.map(|d| d.to_rfc3339()).unwrap_or_default();

        wtr.write_record([
            "id",
            "email",
            "name",
            "plan",
            "subscription_status",
            "is_active",
            "trial_ends_at",
            "subscription_started_at",
            "subscription_ends_at",
        ])
        .map_err(csv_error)?;
        for t in &trainers {
            wtr.write_record([
                t.id.clone(),
                t.email.clone(),
                t.name.clone(),
                t.plan.clone(),
                t.subscription_status.to_string(),
                t.is_active.to_string(),
                fmt(t.trial_ends_at),
                fmt(t.subscription_started_at),
                fmt(t.subscription_ends_at),
            ])
            .map_err(csv_error)?;
        }
        let bytes = wtr.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidInput(e.to_string()))
    }
}

fn csv_error(e: csv::Error) -> Error {
    Error::Io(e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;

    fn request(email: &str) -> CreateTrainerRequest {
        CreateTrainerRequest {
            email: email.into(),
            password: "secret123".into(),
            name: "Coach Ana".into(),
            phone: None,
            plan: None,
        }
    }

    #[tokio::test]
    async fn onboarding_starts_a_trial_and_provisions_the_schema() {
        let backend = MemoryBackend::new();
        let onboarding = TrainerService::create(&backend, &request("Ana@Sportiko.eu")).await.unwrap();

        let t = &onboarding.trainer;
        assert_eq!(t.email, "ana@sportiko.eu");
        assert_eq!(t.subscription_status, SubscriptionStatus::Trial);
        assert_eq!(t.plan, DEFAULT_PLAN);
        let trial = t.trial_ends_at.unwrap() - t.trial_started_at.unwrap();
        assert_eq!(trial.num_days(), TRIAL_DAYS);
        assert_eq!(onboarding.provisioning, ProvisionPath::Script);
        assert!(onboarding.schema.is_complete());
        assert_eq!(backend.tables_in(&t.schema_name).len(), 7);
    }

    #[tokio::test]
    async fn ids_are_stored_canonical_and_schemas_never_shared() {
        let backend = MemoryBackend::new();
        let first = TrainerService::onboard_existing(&backend, "Coach-A", "a@sportiko.eu", "A").await.unwrap();
        assert_eq!(first.id, "coach-a");
        assert_eq!(first.schema_name, "trainer_coach_a");

        for clash in ["coach-a", "COACH_A"] {
            let err = TrainerService::onboard_existing(&backend, clash, "b@sportiko.eu", "B")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{clash}");
        }
        assert_eq!(TrainerService::list(&backend).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn later_failure_leaves_earlier_steps_in_place() {
        let backend = MemoryBackend::new();
        backend.fail_rpc("execute_sql");
        backend.fail_rpc("create_tenant_schema");

        let err = TrainerService::create(&backend, &request("ana@sportiko.eu")).await.unwrap_err();
        assert!(matches!(err, Error::Provisioning { .. }));
        assert_eq!(TrainerService::list(&backend).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscription_status_can_be_set_freely() {
        let backend = MemoryBackend::new();
        let id = TrainerService::create(&backend, &request("ana@sportiko.eu")).await.unwrap().trainer.id;

        for status in [SubscriptionStatus::Expired, SubscriptionStatus::Active, SubscriptionStatus::Trial] {
            let req = UpdateSubscriptionRequest {
                subscription_status: Some(status),
                ..Default::default()
            };
            let t = TrainerService::update_subscription(&backend, &id, &req).await.unwrap();
            assert_eq!(t.subscription_status, status);
        }

        let csv = TrainerService::export_subscriptions_csv(&backend).await.unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("id,email,name,plan,subscription_status"));
        assert!(lines.next().unwrap().contains(",trial,true,"));
    }

    #[tokio::test]
    async fn delete_drops_schema_then_row() {
        let backend = MemoryBackend::new();
        let t = TrainerService::create(&backend, &request("ana@sportiko.eu")).await.unwrap().trainer;

        TrainerService::delete(&backend, &t.id).await.unwrap();
        assert!(backend.tables_in(&t.schema_name).is_empty());
        assert!(TrainerService::get(&backend, &t.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn malformed_input_is_refused_before_any_call() {
        let backend = MemoryBackend::new();
        let mut req = request("not-an-email");
        assert!(matches!(TrainerService::create(&backend, &req).await, Err(Error::InvalidInput(_))));
        req.email = "ok@sportiko.eu".into();
        req.password = "123".into();
        assert!(matches!(TrainerService::create(&backend, &req).await, Err(Error::InvalidInput(_))));
        assert!(TrainerService::list(&backend).await.unwrap().is_empty());
    }
}
