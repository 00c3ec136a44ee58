//! External collaborator contracts.
//!
//! The relational stores (sessions, identities, roles, permission edges) are
//! owned by the enclosing application. The gate only consumes them through
//! these traits; the in-memory implementations in [`memory`] back tests and
//! development setups.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::GateResult;
use crate::models::{Identity, Permission, Role, SessionRecord};

pub mod memory;

pub use memory::{MemoryDirectory, MemorySessionStore};

/// Token-indexed session lookup. Implementations must be index-backed
/// (O(1) by token) and purely read-only from the gate's perspective.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session record for a token, or `None` when no session
    /// exists. Expiry and revocation are judged by the caller.
    async fn validate(&self, token: &str) -> GateResult<Option<SessionRecord>>;
}

/// Read-mostly identity/role/permission data. Whoever mutates the backing
/// store must call [`crate::catalog::PermissionCatalog::invalidate`]
/// afterwards; the catalog has no other way to observe the change.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn identity(&self, id: Uuid) -> GateResult<Option<Identity>>;

    /// All roles assigned to an identity, including inactive ones. The
    /// catalog filters on `active` at lookup time.
    async fn roles_for(&self, identity_id: Uuid) -> GateResult<Vec<Role>>;

    /// Permission edges for one role, active edges only.
    async fn permissions_for_role(&self, role_name: &str) -> GateResult<HashSet<Permission>>;
}
