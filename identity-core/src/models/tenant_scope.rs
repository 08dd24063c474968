//! Tenant scope decision - computed per request, never persisted.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Why a tenant scope decision came out the way it did. Audit tooling keys on
/// these values, so denials must keep their specific reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeReason {
    SameTenant,
    CrossTenantElevation,
    DifferentTenant,
    NoTenantContext,
}

impl ScopeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeReason::SameTenant => "same tenant",
            ScopeReason::CrossTenantElevation => "cross-tenant elevation",
            ScopeReason::DifferentTenant => "different tenant",
            ScopeReason::NoTenantContext => "no tenant context",
        }
    }
}

impl fmt::Display for ScopeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantScopeDecision {
    pub tenant_id: Uuid,
    pub principal_id: Uuid,
    pub allowed: bool,
    pub reason: ScopeReason,
}

impl TenantScopeDecision {
    pub fn allow(principal_id: Uuid, tenant_id: Uuid, reason: ScopeReason) -> Self {
        Self {
            tenant_id,
            principal_id,
            allowed: true,
            reason,
        }
    }

    pub fn deny(principal_id: Uuid, tenant_id: Uuid, reason: ScopeReason) -> Self {
        Self {
            tenant_id,
            principal_id,
            allowed: false,
            reason,
        }
    }
}
