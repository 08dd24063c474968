//! Role model - leveled roles with optional parent and a permission set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::permission::PermissionName;

/// Role authority level. Lower values carry more authority.
pub type RoleLevel = i32;

pub const LEVEL_SUPER_ADMIN: RoleLevel = 1;
pub const LEVEL_OWNER: RoleLevel = 1;
pub const LEVEL_ADMIN: RoleLevel = 2;
pub const LEVEL_MANAGER: RoleLevel = 3;
pub const LEVEL_MEMBER: RoleLevel = 4;
pub const LEVEL_VIEWER: RoleLevel = 5;

/// Lowest level value a tenant-defined role may take.
pub const MIN_CUSTOM_LEVEL: RoleLevel = 2;

pub const SUPER_ADMIN: &str = "Super Admin";
pub const OWNER: &str = "Owner";
pub const ADMIN: &str = "Admin";
pub const MANAGER: &str = "Manager";
pub const MEMBER: &str = "Member";
pub const VIEWER: &str = "Viewer";

/// The fixed system roles, in seeding order.
pub const SYSTEM_ROLES: [(&str, RoleLevel); 6] = [
    (SUPER_ADMIN, LEVEL_SUPER_ADMIN),
    (OWNER, LEVEL_OWNER),
    (ADMIN, LEVEL_ADMIN),
    (MANAGER, LEVEL_MANAGER),
    (MEMBER, LEVEL_MEMBER),
    (VIEWER, LEVEL_VIEWER),
];

/// Roles holding the full permission matrix by construction.
pub const FULL_ACCESS_ROLES: [&str; 2] = [SUPER_ADMIN, OWNER];

/// Role entity. System roles have no tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub level: RoleLevel,
    pub is_system: bool,
    pub parent_role_id: Option<Uuid>,
    pub permissions: BTreeSet<PermissionName>,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(
        id: Uuid,
        tenant_id: Option<Uuid>,
        name: String,
        level: RoleLevel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name,
            level,
            is_system: false,
            parent_role_id: None,
            permissions: BTreeSet::new(),
            created_at: now,
        }
    }

    pub fn system(id: Uuid, name: &str, level: RoleLevel, now: DateTime<Utc>) -> Self {
        let mut role = Self::new(id, None, name.to_string(), level, now);
        role.is_system = true;
        role
    }

    /// `callerLevel <= requiredLevel` grants access.
    pub fn satisfies_level(&self, required: RoleLevel) -> bool {
        self.level <= required
    }

    /// A parent must carry strictly more authority than its child.
    pub fn can_parent(&self, child_level: RoleLevel) -> bool {
        self.level < child_level
    }
}

/// Request to create a tenant-defined role.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoleRequest {
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub level: RoleLevel,
    pub parent_role_id: Option<Uuid>,
    #[serde(default)]
    pub permissions: BTreeSet<PermissionName>,
}
