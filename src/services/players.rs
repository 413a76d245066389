use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::query::TableRef;
use crate::db::{row_as, Backend};
use crate::error::{Error, Result};
use crate::models::player::{
    CreateHomeworkRequest, CreatePlayerRequest, Homework, HomeworkItem, RegisterPlayerAccountRequest,
    UpdatePlayerRequest,
};
use crate::models::profile::PlayerAuthRecord;
use crate::services::tenant_resolver::{SimulationReason, TenantResolver, TenantRows};

#[derive(Debug, Serialize)]
pub struct HomeworkWithItems {
    pub homework: Homework,
    pub items: Vec<HomeworkItem>,
}

/// Trainer-console operations on the bound tenant schema.
pub struct PlayerService;

impl PlayerService {
    /// Newest first.
    pub async fn list(tenant: &TenantResolver) -> Result<TenantRows> {
        tenant.select(&tenant.query("players").order_by("created_at", true)).await
    }

    pub async fn create(tenant: &TenantResolver, req: &CreatePlayerRequest) -> Result<Value> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name is required".into()));
        }
        tenant.insert("players", serde_json::to_value(req)?).await
    }

    pub async fn update(tenant: &TenantResolver, id: Uuid, req: &UpdatePlayerRequest) -> Result<Value> {
        let Value::Object(mut patch) = serde_json::to_value(req)? else {
            return Err(Error::InvalidInput("expected an object".into()));
        };
        if patch.is_empty() {
            return Err(Error::InvalidInput("nothing to update".into()));
        }
        patch.insert("updated_at".into(), json!(Utc::now()));
        let query = tenant.query("players").eq("id", id.to_string());
        let mut rows = tenant.update(&query, Value::Object(patch)).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("player {id}")));
        }
        Ok(rows.remove(0))
    }

    pub async fn delete(tenant: &TenantResolver, id: Uuid) -> Result<()> {
        let rows = tenant.delete(&tenant.query("players").eq("id", id.to_string())).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("player {id}")));
        }
        Ok(())
    }

    /// Principal, `player_auth` link, then the tenant `players` row via
    /// `add_player_to_trainer_schema`. Earlier steps stay if a later fails.
    pub async fn register_account(
        backend: &dyn Backend,
        trainer_id: &str,
        tenant: &TenantResolver,
        req: &RegisterPlayerAccountRequest,
    ) -> Result<PlayerAuthRecord> {
        let schema = tenant.schema().ok_or(Error::SimulatedTenant)?.to_string();
        let email = req.email.trim().to_lowercase();
        if req.name.trim().is_empty() || !email.contains('@') {
            return Err(Error::InvalidInput("name and a valid email are required".into()));
        }

        let principal = backend
            .create_principal(&email, &req.password, json!({ "name": req.name.trim(), "role": "player" }))
            .await?;
        let link: PlayerAuthRecord = row_as(
            backend
                .insert(
                    &TableRef::shared("player_auth"),
                    json!({
                        "id": principal.id,
                        "trainer_id": trainer_id,
                        "email": email,
                        "name": req.name.trim(),
                    }),
                )
                .await?,
        )?;
        backend
            .rpc(
                "add_player_to_trainer_schema",
                json!({
                    "schema_name": schema,
                    "player_id": principal.id,
                    "player_name": req.name.trim(),
                    "player_email": email,
                }),
            )
            .await?;
        tracing::info!("Registered player account {email} in {schema}");
        Ok(link)
    }
}

pub struct HomeworkService;

impl HomeworkService {
    pub async fn list(tenant: &TenantResolver, player_id: Option<Uuid>) -> Result<TenantRows> {
        let mut query = tenant.query("homework").order_by("created_at", true);
        if let Some(id) = player_id {
            query = query.eq("player_id", id.to_string());
        }
        tenant.select(&query).await
    }

    pub async fn create(tenant: &TenantResolver, req: &CreateHomeworkRequest) -> Result<HomeworkWithItems> {
        if req.title.trim().is_empty() {
            return Err(Error::InvalidInput("title is required".into()));
        }
        let homework: Homework = row_as(
            tenant
                .insert(
                    "homework",
                    json!({
                        "player_id": req.player_id,
                        "title": req.title.trim(),
                        "description": req.description,
                        "due_date": req.due_date,
                        "status": "assigned",
                    }),
                )
                .await?,
        )?;

        let mut items = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let mut row = serde_json::to_value(item)?;
            if let Value::Object(obj) = &mut row {
                obj.insert("homework_id".into(), json!(homework.id));
                obj.insert("completed".into(), json!(false));
            }
            items.push(row_as(tenant.insert("homework_items", row).await?)?);
        }
        Ok(HomeworkWithItems { homework, items })
    }

    pub async fn items(tenant: &TenantResolver, homework_id: Uuid) -> Result<TenantRows> {
        tenant
            .select(&tenant.query("homework_items").eq("homework_id", homework_id.to_string()))
            .await
    }
}

/// Payments have no backing table yet; sample rows flagged as such.
pub fn payments(tenant: &TenantResolver) -> TenantRows {
    TenantRows::simulated("payments", &tenant.query("payments"), SimulationReason::NotYetAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;
    use crate::db::tenant::provision_tenant_schema;
    use crate::models::player::{CreateHomeworkItem, Player};
    use crate::models::profile::Profile;
    use crate::services::tenant_resolver::DataSource;
    use std::sync::Arc;

    async fn tenant(memory: &Arc<MemoryBackend>, trainer_id: &str) -> TenantResolver {
        provision_tenant_schema(memory.as_ref(), trainer_id).await.unwrap();
        let profile = Profile::Trainer {
            id: trainer_id.into(),
            email: "coach@sportiko.eu".into(),
            name: "Coach".into(),
        };
        TenantResolver::for_profile(memory.clone(), Some(&profile), false).unwrap()
    }

    fn player(name: &str) -> CreatePlayerRequest {
        CreatePlayerRequest {
            name: name.into(),
            email: None,
            phone: None,
            position: None,
            birth_date: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn players_are_listed_newest_first() {
        let memory = Arc::new(MemoryBackend::new());
        let tenant = tenant(&memory, "coach-1").await;
        assert!(PlayerService::list(&tenant).await.unwrap().rows.is_empty());

        PlayerService::create(&tenant, &player("First")).await.unwrap();
        PlayerService::create(&tenant, &player("Second")).await.unwrap();

        let listed = PlayerService::list(&tenant).await.unwrap();
        assert_eq!(listed.source, DataSource::Live);
        let players: Vec<Player> = listed.decode().unwrap();
        assert_eq!(players[0].name, "Second");
        assert_eq!(players[1].name, "First");
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_players() {
        let memory = Arc::new(MemoryBackend::new());
        let tenant = tenant(&memory, "coach-1").await;
        let created: Player = row_as(PlayerService::create(&tenant, &player("Ana")).await.unwrap()).unwrap();

        let req = UpdatePlayerRequest {
            position: Some("defender".into()),
            ..Default::default()
        };
        let updated: Player = row_as(PlayerService::update(&tenant, created.id, &req).await.unwrap()).unwrap();
        assert_eq!(updated.position.as_deref(), Some("defender"));

        PlayerService::delete(&tenant, created.id).await.unwrap();
        assert!(PlayerService::delete(&tenant, created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn homework_is_created_with_its_items() {
        let memory = Arc::new(MemoryBackend::new());
        let tenant = tenant(&memory, "coach-1").await;
        let ana: Player = row_as(PlayerService::create(&tenant, &player("Ana")).await.unwrap()).unwrap();

        let req = CreateHomeworkRequest {
            player_id: ana.id,
            title: "Juggling".into(),
            description: None,
            due_date: None,
            items: vec![CreateHomeworkItem {
                exercise_id: None,
                sets: Some(3),
                reps: Some(20),
                notes: None,
            }],
        };
        let created = HomeworkService::create(&tenant, &req).await.unwrap();
        assert_eq!(created.homework.status, "assigned");
        assert_eq!(created.items.len(), 1);
        assert!(!created.items[0].completed);

        let items = HomeworkService::items(&tenant, created.homework.id).await.unwrap();
        assert_eq!(items.rows.len(), 1);
        assert_eq!(HomeworkService::list(&tenant, Some(ana.id)).await.unwrap().rows.len(), 1);
    }

    #[tokio::test]
    async fn registering_a_player_links_principal_and_tenant_row() {
        let memory = Arc::new(MemoryBackend::new());
        let tenant = tenant(&memory, "coach-1").await;
        let req = RegisterPlayerAccountRequest {
            name: "Rui".into(),
            email: "Rui@Example.com".into(),
            password: "secret123".into(),
        };

        let link = PlayerService::register_account(memory.as_ref(), "coach-1", &tenant, &req).await.unwrap();
        assert_eq!(link.trainer_id, "coach-1");

        let players: Vec<Player> = PlayerService::list(&tenant).await.unwrap().decode().unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, link.id);
        assert_eq!(players[0].email.as_deref(), Some("rui@example.com"));
    }

    #[tokio::test]
    async fn payments_are_always_flagged() {
        let memory = Arc::new(MemoryBackend::new());
        let tenant = tenant(&memory, "coach-1").await;
        let rows = payments(&tenant);
        assert_eq!(rows.source, DataSource::Simulated(SimulationReason::NotYetAvailable));
        assert!(!rows.rows.is_empty());
    }
}
