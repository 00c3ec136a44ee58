//! Effective-permission resolution with an invalidation-driven cache.
//!
//! Resolution is the set union over the permission edges of the *active*
//! input roles. Results are cached per sorted active-role-name key; any
//! mutation of role/permission data in the backing store must be followed
//! by [`PermissionCatalog::invalidate`], otherwise the next resolution may
//! serve a stale grant, which is a correctness bug rather than an accepted
//! trade-off.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::GateResult;
use crate::models::{Permission, RequireMode, Role};
use crate::store::DirectoryStore;

pub struct PermissionCatalog {
    directory: Arc<dyn DirectoryStore>,
    cache: DashMap<String, Arc<HashSet<Permission>>>,
}

impl PermissionCatalog {
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self {
            directory,
            cache: DashMap::new(),
        }
    }

    /// Union of permission edges over the active roles in `roles`.
    pub async fn effective_permissions(
        &self,
        roles: &[Role],
    ) -> GateResult<Arc<HashSet<Permission>>> {
        let mut names: Vec<&str> = roles
            .iter()
            .filter(|role| role.active)
            .map(|role| role.name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        let key = names.join("\n");

        if let Some(hit) = self.cache.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        let mut granted = HashSet::new();
        for name in &names {
            granted.extend(self.directory.permissions_for_role(name).await?);
        }

        let granted = Arc::new(granted);
        self.cache.insert(key, Arc::clone(&granted));
        Ok(granted)
    }

    /// Drop every cached resolution. Call after any role-permission edge or
    /// role activation change.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Evaluate a grant set against a requirement set. Missing entries are
    /// a deny, never an error; an empty requirement denies under either
    /// mode.
    pub fn has_permission(
        granted: &HashSet<Permission>,
        required: &[Permission],
        mode: RequireMode,
    ) -> bool {
        if required.is_empty() {
            return false;
        }
        match mode {
            RequireMode::All => required.iter().all(|perm| granted.contains(perm)),
            RequireMode::Any => required.iter().any(|perm| granted.contains(perm)),
        }
    }

    /// First required pair absent from the grant set, for deny reasons.
    pub fn first_missing<'a>(
        granted: &HashSet<Permission>,
        required: &'a [Permission],
    ) -> Option<&'a Permission> {
        required.iter().find(|perm| !granted.contains(perm))
    }
}
