use serde_json::Value;

use crate::config::Config;
use crate::db::query::Query;
use crate::db::{maybe_single_as, Backend};
use crate::error::Result;
use crate::models::auth::Principal;
use crate::models::profile::{PlayerAuthRecord, Profile, SuperadminRecord, TrainerRecord};
use crate::services::trainers::TrainerService;

/// Identities known before any table exists.
#[derive(Debug, Clone)]
pub struct SeedIdentities {
    pub superadmin_email: String,
    pub trainer_emails: Vec<String>,
    /// Grant an unrecognised principal a trainer profile of its own.
    pub fallback_trainer_profile: bool,
}

impl SeedIdentities {
    pub fn from_config(config: &Config) -> Self {
        Self {
            superadmin_email: config.superadmin_seed_email.clone(),
            trainer_emails: config.trainer_seed_emails.clone(),
            fallback_trainer_profile: config.fallback_trainer_profile,
        }
    }

    pub fn is_superadmin_seed(&self, email: &str) -> bool {
        email.eq_ignore_ascii_case(&self.superadmin_email)
    }

    pub fn is_trainer_seed(&self, email: &str) -> bool {
        self.trainer_emails.iter().any(|e| e.eq_ignore_ascii_case(email))
    }
}

/// Results of the ordered backing-table lookups. A `None` means the table
/// had no row for the principal (or was not consulted).
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    pub superadmin: Option<SuperadminRecord>,
    pub trainer: Option<TrainerRecord>,
    pub player: Option<PlayerAuthRecord>,
    /// Trainer row created on first sign-in of a seed trainer identity.
    pub seeded_trainer: Option<TrainerRecord>,
}

fn or_display_name(name: &Option<String>, principal: &Principal) -> String {
    name.clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| principal.display_name())
}

/// Maps a principal and its lookup results to exactly one profile. The
/// first decisive source wins.
pub fn resolve_profile(principal: &Principal, lookups: &Lookups, seeds: &SeedIdentities) -> Profile {
    let email = principal.email.clone();

    if seeds.is_superadmin_seed(&principal.email) {
        return Profile::Superadmin {
            id: principal.id,
            email,
            name: principal.display_name(),
        };
    }
    if let Some(row) = &lookups.superadmin {
        return Profile::Superadmin {
            id: row.id,
            email: row.email.clone(),
            name: or_display_name(&row.name, principal),
        };
    }
    if let Some(row) = &lookups.trainer {
        return Profile::Trainer {
            id: row.id.clone(),
            email: row.email.clone(),
            name: or_display_name(&row.name, principal),
        };
    }
    if let Some(row) = &lookups.player {
        return Profile::Player {
            id: row.id,
            email: row.email.clone(),
            name: or_display_name(&row.name, principal),
            trainer_id: row.trainer_id.clone(),
        };
    }
    if seeds.is_trainer_seed(&principal.email) {
        let (id, name) = match &lookups.seeded_trainer {
            Some(row) => (row.id.clone(), or_display_name(&row.name, principal)),
            None => (principal.id.to_string(), principal.display_name()),
        };
        return Profile::Trainer { id, email, name };
    }
    if seeds.fallback_trainer_profile {
        return Profile::Trainer {
            id: principal.id.to_string(),
            email,
            name: principal.display_name(),
        };
    }
    Profile::Unresolved {
        principal_id: principal.id,
        email,
    }
}

/// A failed lookup counts as "no row" so resolution can continue.
async fn lookup<T: serde::de::DeserializeOwned + Send>(backend: &dyn Backend, query: Query) -> Option<T> {
    let table = query.target.table.clone();
    match maybe_single_as::<T>(backend, &query).await {
        Ok(row) => row,
        Err(e) => {
            tracing::warn!("Profile lookup in {table} failed: {e}");
            None
        }
    }
}

async fn find_trainer(backend: &dyn Backend, principal: &Principal) -> Option<TrainerRecord> {
    let by_id = lookup(backend, Query::table("trainers").eq("id", principal.id.to_string())).await;
    match by_id {
        Some(row) => Some(row),
        None => lookup(backend, Query::table("trainers").eq("email", principal.email.as_str())).await,
    }
}

/// Runs the lookups in resolution order, stopping at the first hit, and
/// creates the trainer row for a seed trainer identity on first sign-in.
pub async fn load_profile(backend: &dyn Backend, principal: &Principal, seeds: &SeedIdentities) -> Profile {
    let mut lookups = Lookups::default();

    if !seeds.is_superadmin_seed(&principal.email) {
        lookups.superadmin = lookup(backend, Query::table("superadmins").eq("id", principal.id.to_string())).await;
        if lookups.superadmin.is_none() {
            lookups.trainer = find_trainer(backend, principal).await;
        }
        if lookups.superadmin.is_none() && lookups.trainer.is_none() {
            lookups.player = lookup(backend, Query::table("player_auth").eq("id", principal.id.to_string())).await;
        }
        let unmatched = lookups.superadmin.is_none() && lookups.trainer.is_none() && lookups.player.is_none();
        if unmatched && seeds.is_trainer_seed(&principal.email) {
            lookups.seeded_trainer = match create_seed_trainer(backend, principal).await {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!("Could not create trainer row for seed identity {}: {e}", principal.email);
                    None
                }
            };
        }
    }

    let profile = resolve_profile(principal, &lookups, seeds);
    match &profile {
        Profile::Unresolved { email, .. } => tracing::warn!("No profile found for {email}"),
        p => tracing::info!("Resolved profile for {}: {:?}", principal.email, p.role()),
    }
    profile
}

async fn create_seed_trainer(backend: &dyn Backend, principal: &Principal) -> Result<TrainerRecord> {
    let trainer = TrainerService::onboard_existing(
        backend,
        &principal.id.to_string(),
        &principal.email,
        &principal.display_name(),
    )
    .await?;
    Ok(TrainerRecord {
        id: trainer.id,
        email: trainer.email,
        name: Some(trainer.name),
    })
}

/// Principal metadata patch that sets the display name.
pub fn display_name_patch(name: &str) -> Value {
    serde_json::json!({ "display_name": name.trim() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;
    use crate::models::profile::Role;
    use serde_json::json;
    use uuid::Uuid;

    fn seeds() -> SeedIdentities {
        SeedIdentities::from_config(&Config::local())
    }

    fn principal(email: &str) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: email.into(),
            metadata: Value::Null,
        }
    }

    #[test]
    fn seed_email_wins_over_table_contents() {
        let p = principal("admin@sportiko.eu");
        let lookups = Lookups {
            trainer: Some(TrainerRecord {
                id: "t1".into(),
                email: "admin@sportiko.eu".into(),
                name: None,
            }),
            ..Default::default()
        };
        assert_eq!(resolve_profile(&p, &lookups, &seeds()).role(), Some(Role::Superadmin));
    }

    #[test]
    fn superadmin_row_classifies_without_seed_email() {
        let p = principal("ops@sportiko.eu");
        let lookups = Lookups {
            superadmin: Some(SuperadminRecord {
                id: p.id,
                email: p.email.clone(),
                name: Some("Ops".into()),
            }),
            ..Default::default()
        };
        let profile = resolve_profile(&p, &lookups, &seeds());
        assert_eq!(profile.role(), Some(Role::Superadmin));
    }

    #[test]
    fn player_profile_carries_its_trainer() {
        let p = principal("kid@sportiko.eu");
        let lookups = Lookups {
            player: Some(PlayerAuthRecord {
                id: p.id,
                trainer_id: "coach-1".into(),
                email: p.email.clone(),
                name: None,
            }),
            ..Default::default()
        };
        let profile = resolve_profile(&p, &lookups, &seeds());
        assert_eq!(profile.tenant_owner(), Some("coach-1"));
        assert_eq!(profile.role(), Some(Role::Player));
    }

    #[test]
    fn unknown_principal_is_unresolved_unless_fallback_enabled() {
        let p = principal("stranger@example.com");
        let profile = resolve_profile(&p, &Lookups::default(), &seeds());
        assert!(!profile.is_resolved());

        let permissive = SeedIdentities {
            fallback_trainer_profile: true,
            ..seeds()
        };
        let profile = resolve_profile(&p, &Lookups::default(), &permissive);
        assert_eq!(profile.role(), Some(Role::Trainer));
        assert_eq!(profile.tenant_owner(), Some(p.id.to_string().as_str()));
    }

    #[tokio::test]
    async fn seed_trainer_gets_a_row_on_first_sign_in() {
        let backend = MemoryBackend::new();
        let p = principal("trainer_pt@sportiko.eu");

        let profile = load_profile(&backend, &p, &seeds()).await;
        assert_eq!(profile.role(), Some(Role::Trainer));
        assert_eq!(profile.tenant_owner(), Some(p.id.to_string().as_str()));

        let rows = backend.select(&Query::table("trainers").eq("email", "trainer_pt@sportiko.eu")).await.unwrap();
        assert_eq!(rows.len(), 1);

        // Second resolution finds the row instead of creating another.
        load_profile(&backend, &p, &seeds()).await;
        let rows = backend.select(&Query::table("trainers")).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn lookups_stop_at_first_match() {
        let backend = MemoryBackend::new();
        let p = principal("ops@sportiko.eu");
        backend.seed("superadmins", vec![json!({ "id": p.id, "email": p.email, "name": "Ops" })]);

        let profile = load_profile(&backend, &p, &seeds()).await;
        assert_eq!(
            profile,
            Profile::Superadmin {
                id: p.id,
                email: "ops@sportiko.eu".into(),
                name: "Ops".into()
            }
        );
    }
}
