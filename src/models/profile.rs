use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superadmin,
    Trainer,
    Player,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Superadmin => "superadmin",
            Role::Trainer => "trainer",
            Role::Player => "player",
        };
        write!(f, "{s}")
    }
}

/// Row of `public.superadmins`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuperadminRecord {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

/// The columns of `public.trainers` that profile resolution needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainerRecord {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Row of `public.player_auth`: links a player principal to its trainer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerAuthRecord {
    pub id: Uuid,
    pub trainer_id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Application-level identity of an authenticated principal. Exactly one
/// variant is produced per session establishment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Profile {
    Superadmin {
        id: Uuid,
        email: String,
        name: String,
    },
    Trainer {
        id: String,
        email: String,
        name: String,
    },
    Player {
        id: Uuid,
        email: String,
        name: String,
        trainer_id: String,
    },
    /// The principal matched no backing table and no seed identity.
    Unresolved { principal_id: Uuid, email: String },
}

impl Profile {
    pub fn role(&self) -> Option<Role> {
        match self {
            Profile::Superadmin { .. } => Some(Role::Superadmin),
            Profile::Trainer { .. } => Some(Role::Trainer),
            Profile::Player { .. } => Some(Role::Player),
            Profile::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.role().is_some()
    }

    /// Trainer whose tenant backs this profile's data, if any.
    pub fn tenant_owner(&self) -> Option<&str> {
        match self {
            Profile::Trainer { id, .. } => Some(id),
            Profile::Player { trainer_id, .. } => Some(trainer_id),
            _ => None,
        }
    }
}
