//! The identity every coordinator call is made on behalf of.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Project role of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Supervisor,
    Admin,
}

impl Role {
    /// Privileged roles may modify content they did not author.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Supervisor | Role::Admin)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Some(Role::Member),
            "supervisor" => Some(Role::Supervisor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The current actor, supplied by the caller's authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn member(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Member,
        }
    }

    pub fn with_role(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    /// Whether this actor may update or delete a row written by `author_id`.
    pub fn can_modify(&self, author_id: Uuid) -> bool {
        self.id == author_id || self.role.is_privileged()
    }
}
