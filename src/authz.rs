use std::sync::Arc;

use dashmap::DashMap;
use ulid::Ulid;

use crate::directory::Directory;
use crate::engine::{Engine, EngineError};
use crate::model::Action;
use crate::model::Permission;

/// Outcome of an authorization check. `Deny` is an answer, not an error —
/// unresolvable references surface as `EngineError::Unknown*` instead so
/// callers can tell "not permitted" from "bad reference".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny(&'static str),
}

impl AuthDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, AuthDecision::Allow)
    }
}

/// Resolved permissions per group, built lazily and dropped whenever the
/// group's grants change (grant, revoke, group deletion).
///
/// Consistency window: an authorize racing a revoke may still use the
/// pre-revoke resolution until the invalidation lands; the window is bounded
/// by the directory mutation that triggered it.
pub(crate) struct GrantCache {
    resolved: DashMap<Ulid, Arc<Vec<Permission>>>,
}

impl GrantCache {
    pub(crate) fn new() -> Self {
        Self {
            resolved: DashMap::new(),
        }
    }

    pub(crate) fn get_or_resolve(&self, group_id: &Ulid, directory: &Directory) -> Arc<Vec<Permission>> {
        if let Some(cached) = self.resolved.get(group_id) {
            return cached.value().clone();
        }
        let perms = Arc::new(directory.resolve_grants(group_id));
        self.resolved.insert(*group_id, perms.clone());
        perms
    }

    pub(crate) fn invalidate(&self, group_id: &Ulid) {
        self.resolved.remove(group_id);
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, group_id: &Ulid) -> bool {
        self.resolved.contains_key(group_id)
    }
}

impl Engine {
    /// Decide whether `user_id` may perform `action` on `resource_id`.
    ///
    /// A request is allowed if any permission granted to any of the user's
    /// groups matches the action and scopes to the resource or its category.
    /// There is no explicit deny and no precedence — any match suffices;
    /// absence of a match is the only deny path. Pure read: the ledger is
    /// never touched.
    pub async fn authorize(
        &self,
        user_id: Ulid,
        action: Action,
        resource_id: Ulid,
    ) -> Result<AuthDecision, EngineError> {
        let user = self
            .directory
            .user(&user_id)
            .ok_or(EngineError::UnknownUser(user_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::UnknownResource(resource_id))?;

        if !user.active {
            return Ok(AuthDecision::Deny("user is deactivated"));
        }

        let category = {
            let guard = rs.read().await;
            guard.category.clone()
        };

        for group_id in self.directory.groups_of(&user_id) {
            let perms = self.grant_cache.get_or_resolve(&group_id, &self.directory);
            if perms
                .iter()
                .any(|p| p.matches(action, resource_id, category.as_deref()))
            {
                return Ok(AuthDecision::Allow);
            }
        }

        Ok(AuthDecision::Deny("no matching grant"))
    }
}
