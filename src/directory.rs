use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Event, Group, Permission, User};

/// Identity store + permission registry: users, groups, the user↔group
/// membership relation, permission definitions, and group→permission grants.
///
/// Pure storage — validation and WAL ordering live in the engine's mutation
/// layer. Events are applied here both on commit and on replay.
pub struct Directory {
    users: DashMap<Ulid, User>,
    groups: DashMap<Ulid, Group>,
    /// user id → group ids (membership edges).
    memberships: DashMap<Ulid, Vec<Ulid>>,
    permissions: DashMap<Ulid, Permission>,
    /// group id → permission ids (grant edges).
    grants: DashMap<Ulid, Vec<Ulid>>,
    /// Uniqueness indexes.
    usernames: DashMap<String, Ulid>,
    emails: DashMap<String, Ulid>,
    group_names: DashMap<String, Ulid>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            groups: DashMap::new(),
            memberships: DashMap::new(),
            permissions: DashMap::new(),
            grants: DashMap::new(),
            usernames: DashMap::new(),
            emails: DashMap::new(),
            group_names: DashMap::new(),
        }
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn contains_user(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn group(&self, id: &Ulid) -> Option<Group> {
        self.groups.get(id).map(|e| e.value().clone())
    }

    pub fn contains_group(&self, id: &Ulid) -> bool {
        self.groups.contains_key(id)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn permission(&self, id: &Ulid) -> Option<Permission> {
        self.permissions.get(id).map(|e| e.value().clone())
    }

    pub fn contains_permission(&self, id: &Ulid) -> bool {
        self.permissions.contains_key(id)
    }

    pub fn permission_count(&self) -> usize {
        self.permissions.len()
    }

    pub fn username_taken(&self, username: &str) -> bool {
        self.usernames.contains_key(username)
    }

    pub fn email_taken(&self, email: &str) -> bool {
        self.emails.contains_key(email)
    }

    pub fn group_name_taken(&self, name: &str) -> bool {
        self.group_names.contains_key(name)
    }

    /// Group ids the user belongs to.
    pub fn groups_of(&self, user_id: &Ulid) -> Vec<Ulid> {
        self.memberships
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, user_id: &Ulid, group_id: &Ulid) -> bool {
        self.memberships
            .get(user_id)
            .is_some_and(|gs| gs.contains(group_id))
    }

    /// Permission ids granted to the group.
    pub fn grants_of(&self, group_id: &Ulid) -> Vec<Ulid> {
        self.grants
            .get(group_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn has_grant(&self, group_id: &Ulid, permission_id: &Ulid) -> bool {
        self.grants
            .get(group_id)
            .is_some_and(|ps| ps.contains(permission_id))
    }

    /// Resolve the group's granted permissions to values.
    pub fn resolve_grants(&self, group_id: &Ulid) -> Vec<Permission> {
        self.grants_of(group_id)
            .iter()
            .filter_map(|pid| self.permission(pid))
            .collect()
    }

    pub fn list_users(&self) -> Vec<User> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_groups(&self) -> Vec<Group> {
        self.groups.iter().map(|e| e.value().clone()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an identity/permission event. Non-identity events are ignored
    /// so replay can feed every WAL record through here.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, username, email, credential } => {
                self.usernames.insert(username.clone(), *id);
                self.emails.insert(email.clone(), *id);
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        username: username.clone(),
                        email: email.clone(),
                        credential: credential.clone(),
                        active: true,
                    },
                );
            }
            Event::UserDeactivated { id } => {
                // Soft invalidation: the row stays so bookings keep a valid
                // user reference for audit.
                if let Some(mut user) = self.users.get_mut(id) {
                    user.active = false;
                }
            }
            Event::GroupCreated { id, name, description } => {
                self.group_names.insert(name.clone(), *id);
                self.groups.insert(
                    *id,
                    Group {
                        id: *id,
                        name: name.clone(),
                        description: description.clone(),
                    },
                );
            }
            Event::GroupDeleted { id } => {
                if let Some((_, group)) = self.groups.remove(id) {
                    self.group_names.remove(&group.name);
                }
                // Edges die with the endpoint.
                self.grants.remove(id);
                for mut entry in self.memberships.iter_mut() {
                    entry.value_mut().retain(|g| g != id);
                }
            }
            Event::MemberAdded { user_id, group_id } => {
                let mut groups = self.memberships.entry(*user_id).or_default();
                if !groups.contains(group_id) {
                    groups.push(*group_id);
                }
            }
            Event::MemberRemoved { user_id, group_id } => {
                if let Some(mut groups) = self.memberships.get_mut(user_id) {
                    groups.retain(|g| g != group_id);
                }
            }
            Event::PermissionDefined { id, action, scope } => {
                self.permissions.insert(
                    *id,
                    Permission {
                        id: *id,
                        action: *action,
                        scope: scope.clone(),
                    },
                );
            }
            Event::GrantAdded { group_id, permission_id } => {
                let mut perms = self.grants.entry(*group_id).or_default();
                if !perms.contains(permission_id) {
                    perms.push(*permission_id);
                }
            }
            Event::GrantRevoked { group_id, permission_id } => {
                if let Some(mut perms) = self.grants.get_mut(group_id) {
                    perms.retain(|p| p != permission_id);
                }
            }
            _ => {} // catalog/ledger events are handled by the engine
        }
    }

    /// Emit the minimal event sequence recreating the directory (compaction).
    pub fn compact_events(&self, events: &mut Vec<Event>) {
        for entry in self.users.iter() {
            let u = entry.value();
            events.push(Event::UserRegistered {
                id: u.id,
                username: u.username.clone(),
                email: u.email.clone(),
                credential: u.credential.clone(),
            });
            if !u.active {
                events.push(Event::UserDeactivated { id: u.id });
            }
        }
        for entry in self.groups.iter() {
            let g = entry.value();
            events.push(Event::GroupCreated {
                id: g.id,
                name: g.name.clone(),
                description: g.description.clone(),
            });
        }
        for entry in self.memberships.iter() {
            for group_id in entry.value() {
                events.push(Event::MemberAdded {
                    user_id: *entry.key(),
                    group_id: *group_id,
                });
            }
        }
        for entry in self.permissions.iter() {
            let p = entry.value();
            events.push(Event::PermissionDefined {
                id: p.id,
                action: p.action,
                scope: p.scope.clone(),
            });
        }
        for entry in self.grants.iter() {
            for permission_id in entry.value() {
                events.push(Event::GrantAdded {
                    group_id: *entry.key(),
                    permission_id: *permission_id,
                });
            }
        }
    }
}
