//! In-memory reference implementations of the collaborator stores.
//!
//! Sessions are keyed by the SHA-256 digest of the token, never the raw
//! token, so a leaked store dump cannot be replayed.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::GateResult;
use crate::models::{Identity, Permission, Role, SessionRecord};

use super::{DirectoryStore, SessionStore};

fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// SESSION STORE
// =============================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a session for an identity and return the opaque bearer token.
    pub fn issue(&self, identity_id: Uuid, ttl: Duration) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        self.sessions.insert(
            token_digest(&token),
            SessionRecord {
                identity_id,
                issued_at: now,
                expires_at: now + ttl,
                revoked: false,
            },
        );
        token
    }

    /// Insert a pre-built record for a token. Tests use this to construct
    /// expired or revoked sessions directly.
    pub fn insert(&self, token: &str, record: SessionRecord) {
        self.sessions.insert(token_digest(token), record);
    }

    pub fn revoke(&self, token: &str) -> bool {
        match self.sessions.get_mut(&token_digest(token)) {
            Some(mut record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    /// Drop sessions past their expiry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.expires_at > now);
        before - self.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn validate(&self, token: &str) -> GateResult<Option<SessionRecord>> {
        Ok(self
            .sessions
            .get(&token_digest(token))
            .map(|record| record.clone()))
    }
}

// =============================================================================
// DIRECTORY STORE
// =============================================================================

/// Identity, role-assignment, and role→permission data held in concurrent
/// maps. Mutations mirror what the portal's admin API does against its
/// relational store; callers pair them with a catalog invalidation.
#[derive(Default)]
pub struct MemoryDirectory {
    identities: DashMap<Uuid, Identity>,
    roles: DashMap<String, Role>,
    assignments: DashMap<Uuid, HashSet<String>>,
    edges: DashMap<String, HashSet<Permission>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_identity(&self, identity: Identity) {
        self.identities.insert(identity.id, identity);
    }

    pub fn set_identity_active(&self, id: Uuid, active: bool) -> bool {
        match self.identities.get_mut(&id) {
            Some(mut identity) => {
                identity.active = active;
                true
            }
            None => false,
        }
    }

    pub fn add_role(&self, role: Role) {
        self.roles.insert(role.name.clone(), role);
    }

    pub fn set_role_active(&self, name: &str, active: bool) -> bool {
        match self.roles.get_mut(name) {
            Some(mut role) => {
                role.active = active;
                true
            }
            None => false,
        }
    }

    pub fn assign_role(&self, identity_id: Uuid, role_name: &str) {
        self.assignments
            .entry(identity_id)
            .or_default()
            .insert(role_name.to_string());
    }

    pub fn revoke_role(&self, identity_id: Uuid, role_name: &str) {
        if let Some(mut assigned) = self.assignments.get_mut(&identity_id) {
            assigned.remove(role_name);
        }
    }

    pub fn grant(&self, role_name: &str, permission: Permission) {
        self.edges
            .entry(role_name.to_string())
            .or_default()
            .insert(permission);
    }

    pub fn revoke_grant(&self, role_name: &str, permission: &Permission) {
        if let Some(mut granted) = self.edges.get_mut(role_name) {
            granted.remove(permission);
        }
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn identity(&self, id: Uuid) -> GateResult<Option<Identity>> {
        Ok(self.identities.get(&id).map(|identity| identity.clone()))
    }

    async fn roles_for(&self, identity_id: Uuid) -> GateResult<Vec<Role>> {
        let names = match self.assignments.get(&identity_id) {
            Some(assigned) => assigned.clone(),
            None => return Ok(Vec::new()),
        };

        let mut roles: Vec<Role> = names
            .iter()
            .filter_map(|name| self.roles.get(name).map(|role| role.clone()))
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn permissions_for_role(&self, role_name: &str) -> GateResult<HashSet<Permission>> {
        Ok(self
            .edges
            .get(role_name)
            .map(|granted| granted.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_are_stored_as_digests() {
        let store = MemorySessionStore::new();
        let token = store.issue(Uuid::new_v4(), Duration::hours(1));

        assert!(!store.sessions.contains_key(&token));
        assert!(store.sessions.contains_key(&token_digest(&token)));
        assert!(store.validate(&token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn revoked_session_is_returned_as_revoked() {
        let store = MemorySessionStore::new();
        let token = store.issue(Uuid::new_v4(), Duration::hours(1));
        assert!(store.revoke(&token));

        let record = store.validate(&token).await.unwrap().unwrap();
        assert!(record.revoked);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_sessions() {
        let store = MemorySessionStore::new();
        let live = store.issue(Uuid::new_v4(), Duration::hours(1));
        store.insert(
            "stale",
            SessionRecord {
                identity_id: Uuid::new_v4(),
                issued_at: Utc::now() - Duration::hours(2),
                expires_at: Utc::now() - Duration::hours(1),
                revoked: false,
            },
        );

        assert_eq!(store.purge_expired(), 1);
        assert!(store.validate(&live).await.unwrap().is_some());
        assert!(store.validate("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn roles_for_returns_assigned_roles_sorted() {
        let directory = MemoryDirectory::new();
        let id = Uuid::new_v4();
        directory.add_identity(Identity::new(id));
        directory.add_role(Role::new("doctor"));
        directory.add_role(Role::new("admin"));
        directory.assign_role(id, "doctor");
        directory.assign_role(id, "admin");

        let roles = directory.roles_for(id).await.unwrap();
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["admin", "doctor"]);
    }
}
