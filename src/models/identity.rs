use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// IDENTITY
// =============================================================================

/// Subject of every authorization decision. Provisioned by the enclosing
/// application; deactivation takes effect on the next resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub active: bool,
}

impl Identity {
    pub fn new(id: Uuid) -> Self {
        Self { id, active: true }
    }
}

// =============================================================================
// ROLE
// =============================================================================

/// Named permission bundle. Inactive roles contribute nothing to an
/// identity's effective permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub active: bool,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }

    pub fn inactive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: false,
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// What the external session store returns for a token lookup. The session
/// itself (issuance, refresh, revocation) is owned by that store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub identity_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Session metadata attached to a resolved identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
