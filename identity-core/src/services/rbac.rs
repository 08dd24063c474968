//! Role-based permission resolution.
//!
//! A principal's effective permissions are the union over its assigned roles,
//! each role contributing its own set plus every ancestor's. Parents must
//! carry a strictly lower level value than their children, so the parent
//! links form a tree and the walk to the root always ends. `resource:manage`
//! satisfies every other action on the same resource.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RbacConfig;
use crate::models::permission::{system_permission_names, SYSTEM_RESOURCES};
use crate::models::role::{
    ADMIN, FULL_ACCESS_ROLES, MANAGER, MEMBER, MIN_CUSTOM_LEVEL, SYSTEM_ROLES, VIEWER,
};
use crate::models::{Action, CreateRoleRequest, Permission, PermissionName, Role, RoleLevel};
use crate::repository::Store;
use crate::services::clock::{Clock, IdGenerator};
use crate::services::error::AuthError;

/// Parent links followed before giving up on a malformed hierarchy.
const MAX_HIERARCHY_DEPTH: usize = 16;

type PermissionSet = Arc<BTreeSet<PermissionName>>;

/// Outcome of seeding system data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: u64,
    pub roles_created: u64,
    pub grants_added: u64,
}

#[derive(Clone)]
pub struct RbacResolver {
    store: Arc<dyn Store>,
    config: RbacConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    cache: Arc<DashMap<Uuid, (DateTime<Utc>, PermissionSet)>>,
}

impl RbacResolver {
    pub fn new(
        store: Arc<dyn Store>,
        config: RbacConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            ids,
            cache: Arc::new(DashMap::new()),
        }
    }

    pub fn cross_tenant_role(&self) -> &str {
        &self.config.cross_tenant_role
    }

    // ==================== Resolution ====================

    /// Union of permissions across every assigned role and its ancestors.
    /// Cached per principal for the configured TTL.
    pub async fn get_effective_permissions(
        &self,
        principal_id: Uuid,
    ) -> Result<PermissionSet, AuthError> {
        let now = self.clock.now();
        let ttl = Duration::seconds(self.config.permission_cache_ttl_seconds as i64);

        if let Some(entry) = self.cache.get(&principal_id) {
            let (cached_at, permissions) = entry.value();
            if now < *cached_at + ttl {
                return Ok(permissions.clone());
            }
        }

        let roles = self.store.list_roles_for_principal(principal_id).await?;
        let mut permissions = BTreeSet::new();
        for role in &roles {
            permissions.extend(self.inherited_permissions(role).await?);
        }

        let permissions = Arc::new(permissions);
        if ttl > Duration::zero() {
            self.cache
                .insert(principal_id, (now, permissions.clone()));
        }
        Ok(permissions)
    }

    /// The role's own permissions plus every ancestor's, walked to the root.
    async fn inherited_permissions(
        &self,
        role: &Role,
    ) -> Result<BTreeSet<PermissionName>, AuthError> {
        let mut permissions = role.permissions.clone();
        let mut visited = HashSet::from([role.id]);
        let mut cursor = role.parent_role_id;

        while let Some(parent_id) = cursor {
            if !visited.insert(parent_id) || visited.len() > MAX_HIERARCHY_DEPTH {
                tracing::error!(role_id = %role.id, "Role hierarchy loop or excessive depth");
                break;
            }
            match self.store.find_role(parent_id).await? {
                Some(parent) => {
                    permissions.extend(parent.permissions.iter().cloned());
                    cursor = parent.parent_role_id;
                }
                None => break,
            }
        }
        Ok(permissions)
    }

    /// Granted when `resource:action` or `resource:manage` is held.
    pub async fn has_permission(
        &self,
        principal_id: Uuid,
        resource: &str,
        action: Action,
    ) -> Result<bool, AuthError> {
        let permissions = self.get_effective_permissions(principal_id).await?;
        Ok(permissions.iter().any(|p| p.grants(resource, action)))
    }

    pub async fn require_permission(
        &self,
        principal_id: Uuid,
        resource: &str,
        action: Action,
    ) -> Result<(), AuthError> {
        if self.has_permission(principal_id, resource, action).await? {
            Ok(())
        } else {
            tracing::warn!(
                principal_id = %principal_id,
                resource,
                action = action.as_str(),
                "Permission denied"
            );
            Err(AuthError::PermissionDenied(format!(
                "{}:{}",
                resource,
                action.as_str()
            )))
        }
    }

    /// The assigned role with the lowest level value. Ties prefer the
    /// cross-tenant role, then system roles, then name order.
    pub async fn get_highest_role(&self, principal_id: Uuid) -> Result<Option<Role>, AuthError> {
        let roles = self.store.list_roles_for_principal(principal_id).await?;
        let cross_tenant = |r: &Role| r.is_system && r.name == self.config.cross_tenant_role;
        Ok(roles.into_iter().min_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then_with(|| cross_tenant(b).cmp(&cross_tenant(a)))
                .then_with(|| b.is_system.cmp(&a.is_system))
                .then_with(|| a.name.cmp(&b.name))
        }))
    }

    /// `callerLevel <= required` grants access.
    pub async fn has_role_level(
        &self,
        principal_id: Uuid,
        required: RoleLevel,
    ) -> Result<bool, AuthError> {
        Ok(self
            .get_highest_role(principal_id)
            .await?
            .map(|role| role.satisfies_level(required))
            .unwrap_or(false))
    }

    // ==================== Assignments ====================

    pub async fn assign_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        let principal = self
            .store
            .find_principal(principal_id)
            .await?
            .ok_or(AuthError::PrincipalNotFound)?;
        let role = self
            .store
            .find_role(role_id)
            .await?
            .ok_or(AuthError::RoleNotFound)?;

        if let Some(role_tenant) = role.tenant_id {
            if principal.tenant_id != Some(role_tenant) {
                return Err(AuthError::TenantMismatch(
                    "role belongs to a different tenant".to_string(),
                ));
            }
        }

        if !self
            .store
            .insert_assignment(principal_id, role_id, self.clock.now())
            .await?
        {
            return Err(AuthError::RoleAlreadyAssigned);
        }

        self.invalidate(principal_id);
        tracing::info!(principal_id = %principal_id, role = %role.name, "Role assigned");
        Ok(())
    }

    /// Returns whether the assignment existed.
    pub async fn revoke_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<bool, AuthError> {
        let removed = self.store.delete_assignment(principal_id, role_id).await?;
        if removed {
            self.invalidate(principal_id);
            tracing::info!(principal_id = %principal_id, role_id = %role_id, "Role revoked");
        }
        Ok(removed)
    }

    /// Drop the cached permissions of one principal.
    pub fn invalidate(&self, principal_id: Uuid) {
        self.cache.remove(&principal_id);
    }

    fn invalidate_all(&self) {
        self.cache.clear();
    }

    // ==================== Roles ====================

    pub async fn list_roles(&self, tenant_id: Option<Uuid>) -> Result<Vec<Role>, AuthError> {
        Ok(self.store.list_roles(tenant_id).await?)
    }

    pub async fn get_role(&self, role_id: Uuid) -> Result<Role, AuthError> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or(AuthError::RoleNotFound)
    }

    /// Create a tenant-defined role.
    pub async fn create_role(&self, request: CreateRoleRequest) -> Result<Role, AuthError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("Role name must not be empty".to_string()));
        }
        if request.level < MIN_CUSTOM_LEVEL {
            return Err(AuthError::InvalidRoleHierarchy(format!(
                "custom roles must have level >= {}",
                MIN_CUSTOM_LEVEL
            )));
        }
        if SYSTEM_ROLES.iter().any(|(system, _)| *system == name) {
            return Err(AuthError::SystemEntityImmutable(name.to_string()));
        }
        if self
            .store
            .find_role_by_name(request.tenant_id, name)
            .await?
            .is_some()
        {
            return Err(AuthError::Validation(format!("Role '{}' already exists", name)));
        }

        if let Some(parent_id) = request.parent_role_id {
            let parent = self.get_role(parent_id).await?;
            self.check_parent(&parent, request.tenant_id, request.level)?;
        }
        self.check_permissions_defined(&request.permissions).await?;

        let mut role = Role::new(
            self.ids.next_id(),
            request.tenant_id,
            name.to_string(),
            request.level,
            self.clock.now(),
        );
        role.parent_role_id = request.parent_role_id;
        role.permissions = request.permissions;
        self.store.insert_role(&role).await?;

        tracing::info!(role_id = %role.id, role = %role.name, level = role.level, "Role created");
        Ok(role)
    }

    fn check_parent(
        &self,
        parent: &Role,
        child_tenant: Option<Uuid>,
        child_level: RoleLevel,
    ) -> Result<(), AuthError> {
        if !parent.can_parent(child_level) {
            return Err(AuthError::InvalidRoleHierarchy(format!(
                "parent '{}' (level {}) must have a lower level than {}",
                parent.name, parent.level, child_level
            )));
        }
        if parent.tenant_id.is_some() && parent.tenant_id != child_tenant {
            return Err(AuthError::InvalidRoleHierarchy(
                "parent role belongs to another tenant".to_string(),
            ));
        }
        Ok(())
    }

    /// Re-parent a custom role. The level check makes cycles impossible.
    pub async fn set_parent(
        &self,
        role_id: Uuid,
        parent_role_id: Option<Uuid>,
    ) -> Result<Role, AuthError> {
        let mut role = self.get_role(role_id).await?;
        if role.is_system {
            return Err(AuthError::SystemEntityImmutable(role.name));
        }
        if let Some(parent_id) = parent_role_id {
            let parent = self.get_role(parent_id).await?;
            self.check_parent(&parent, role.tenant_id, role.level)?;
        }
        role.parent_role_id = parent_role_id;
        self.store.update_role(&role).await?;
        self.invalidate_all();
        Ok(role)
    }

    /// Replace a custom role's permission set.
    pub async fn update_role_permissions(
        &self,
        role_id: Uuid,
        permissions: BTreeSet<PermissionName>,
    ) -> Result<Role, AuthError> {
        let mut role = self.get_role(role_id).await?;
        if role.is_system {
            return Err(AuthError::SystemEntityImmutable(role.name));
        }
        self.check_permissions_defined(&permissions).await?;
        role.permissions = permissions;
        self.store.update_role(&role).await?;
        self.invalidate_all();
        tracing::info!(role_id = %role.id, count = role.permissions.len(), "Role permissions updated");
        Ok(role)
    }

    /// Blocked while any principal still holds the role.
    pub async fn delete_role(&self, role_id: Uuid) -> Result<(), AuthError> {
        let role = self.get_role(role_id).await?;
        if role.is_system {
            return Err(AuthError::SystemEntityImmutable(role.name));
        }
        let holders = self.store.count_assignments_for_role(role_id).await?;
        if holders > 0 {
            return Err(AuthError::RoleInUse(holders));
        }
        let children = self.store.count_child_roles(role_id).await?;
        if children > 0 {
            return Err(AuthError::InvalidRoleHierarchy(format!(
                "'{}' is the parent of {} role(s)",
                role.name, children
            )));
        }
        self.store.delete_role(role_id).await?;
        tracing::info!(role_id = %role_id, role = %role.name, "Role deleted");
        Ok(())
    }

    // ==================== Permissions ====================

    async fn check_permissions_defined(
        &self,
        permissions: &BTreeSet<PermissionName>,
    ) -> Result<(), AuthError> {
        for name in permissions {
            if self.store.find_permission(name).await?.is_none() {
                return Err(AuthError::InvalidPermission(name.to_string()));
            }
        }
        Ok(())
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>, AuthError> {
        Ok(self.store.list_permissions().await?)
    }

    /// Register a custom permission. Defining an existing custom permission
    /// again returns it unchanged; system permissions cannot be redefined.
    pub async fn define_permission(
        &self,
        name: PermissionName,
        description: Option<String>,
    ) -> Result<Permission, AuthError> {
        if let Some(existing) = self.store.find_permission(&name).await? {
            if existing.is_system {
                return Err(AuthError::SystemEntityImmutable(name.to_string()));
            }
            return Ok(existing);
        }
        let permission = Permission {
            name,
            description,
            is_system: false,
            created_at: self.clock.now(),
        };
        self.store.insert_permission(&permission).await?;
        tracing::info!(permission = %permission.name, "Permission defined");
        Ok(permission)
    }

    pub async fn delete_permission(&self, name: &PermissionName) -> Result<(), AuthError> {
        let existing = self
            .store
            .find_permission(name)
            .await?
            .ok_or_else(|| AuthError::InvalidPermission(name.to_string()))?;
        if existing.is_system {
            return Err(AuthError::SystemEntityImmutable(name.to_string()));
        }
        self.store.delete_permission(name).await?;
        self.invalidate_all();
        tracing::info!(permission = %name, "Permission deleted");
        Ok(())
    }

    // ==================== Seeding ====================

    /// Create missing system permissions and the six system roles, give the
    /// fixed roles their default grants, then give the full-access roles
    /// every defined permission. Safe to run repeatedly.
    pub async fn seed_system_roles(&self) -> Result<SeedReport, AuthError> {
        let now = self.clock.now();
        let mut report = SeedReport::default();

        for name in system_permission_names() {
            let permission = Permission {
                name,
                description: None,
                is_system: true,
                created_at: now,
            };
            if self.store.insert_permission(&permission).await? {
                report.permissions_created += 1;
            }
        }

        for (name, level) in SYSTEM_ROLES {
            let role = match self.store.find_role_by_name(None, name).await? {
                Some(role) => role,
                None => {
                    let role = Role::system(self.ids.next_id(), name, level, now);
                    self.store.insert_role(&role).await?;
                    report.roles_created += 1;
                    role
                }
            };
            let defaults = default_grants(name);
            if !defaults.is_empty() {
                report.grants_added += self.store.add_role_permissions(role.id, &defaults).await?;
            }
        }

        report.grants_added += self.sync_full_access_roles().await?;

        tracing::info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            grants_added = report.grants_added,
            "System roles seeded"
        );
        Ok(report)
    }

    /// Give every full-access role every currently defined permission.
    /// Returns the number of grants actually added.
    pub async fn sync_full_access_roles(&self) -> Result<u64, AuthError> {
        let all: Vec<PermissionName> = self
            .store
            .list_permissions()
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();

        let mut added = 0;
        for name in FULL_ACCESS_ROLES {
            if let Some(role) = self.store.find_role_by_name(None, name).await? {
                added += self.store.add_role_permissions(role.id, &all).await?;
            }
        }
        if added > 0 {
            self.invalidate_all();
        }
        Ok(added)
    }
}

/// Default grants for the fixed non-full-access roles.
fn default_grants(role: &str) -> Vec<PermissionName> {
    let grants: &[(&str, &[Action])] = match role {
        ADMIN => &[
            ("users", &[Action::Manage]),
            ("roles", &[Action::Manage]),
            ("sessions", &[Action::Manage]),
            ("files", &[Action::Manage]),
            ("settings", &[Action::Manage]),
            ("audit", &[Action::Read, Action::Export]),
            ("billing", &[Action::Read]),
            ("permissions", &[Action::Read]),
        ],
        MANAGER => &[
            ("users", &[Action::Read, Action::Create, Action::Update]),
            ("files", &[Action::Manage]),
            ("roles", &[Action::Read, Action::Assign]),
            ("sessions", &[Action::Read]),
        ],
        MEMBER => &[
            ("users", &[Action::Read]),
            ("files", &[Action::Create, Action::Read, Action::Update]),
        ],
        VIEWER => &[("users", &[Action::Read]), ("files", &[Action::Read])],
        _ => &[],
    };

    grants
        .iter()
        .filter(|(resource, _)| SYSTEM_RESOURCES.contains(resource))
        .flat_map(|(resource, actions)| {
            actions
                .iter()
                .filter_map(move |action| PermissionName::new(*resource, *action).ok())
        })
        .collect()
}
