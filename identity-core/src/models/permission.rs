//! Permission model - `<resource>:<action>` names with a "manage" wildcard action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Actions a permission can grant. `Manage` satisfies every other action on the
/// same resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Manage,
    Approve,
    Reject,
    Export,
    Import,
    Assign,
    Revoke,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Manage,
        Action::Approve,
        Action::Reject,
        Action::Export,
        Action::Import,
        Action::Assign,
        Action::Revoke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Export => "export",
            Action::Import => "import",
            Action::Assign => "assign",
            Action::Revoke => "revoke",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Invalid permission action: {}", s))
    }
}

/// Validated permission name of the form `<resource>:<action>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionName {
    resource: String,
    action: Action,
}

impl PermissionName {
    pub fn new(resource: impl Into<String>, action: Action) -> Result<Self, String> {
        let resource = resource.into();
        if resource.is_empty()
            || !resource
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(format!("Invalid permission resource: '{}'", resource));
        }
        Ok(Self { resource, action })
    }

    /// Parse `"files:read"`.
    pub fn parse(name: &str) -> Result<Self, String> {
        let (resource, action) = name
            .split_once(':')
            .ok_or_else(|| format!("Permission '{}' must be '<resource>:<action>'", name))?;
        Self::new(resource, action.parse()?)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// True when holding `self` grants `resource:action`.
    pub fn grants(&self, resource: &str, action: Action) -> bool {
        self.resource == resource && (self.action == action || self.action == Action::Manage)
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl TryFrom<String> for PermissionName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PermissionName> for String {
    fn from(value: PermissionName) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for PermissionName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Registered permission. System permissions cannot be deleted or redefined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub name: PermissionName,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

/// Resources shipped with the core. Each gets every action at seed time.
pub const SYSTEM_RESOURCES: &[&str] = &[
    "users", "roles", "permissions", "sessions", "tenants", "files", "billing", "audit",
    "settings",
];

/// Every system permission: each system resource crossed with each action.
pub fn system_permission_names() -> Vec<PermissionName> {
    SYSTEM_RESOURCES
        .iter()
        .flat_map(|resource| {
            Action::ALL
                .iter()
                .filter_map(move |action| PermissionName::new(*resource, *action).ok())
        })
        .collect()
}
