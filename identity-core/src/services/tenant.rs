//! Tenant isolation decisions.

use uuid::Uuid;

use crate::models::{Principal, ScopeReason, TenantScopeDecision};
use crate::services::error::AuthError;
use crate::services::rbac::RbacResolver;
use crate::services::security_audit::SecurityAuditService;

#[derive(Clone)]
pub struct TenantScopeEnforcer {
    rbac: RbacResolver,
    audit: SecurityAuditService,
}

impl TenantScopeEnforcer {
    pub fn new(rbac: RbacResolver, audit: SecurityAuditService) -> Self {
        Self { rbac, audit }
    }

    /// Decide whether `principal` may act on data owned by `target_tenant`.
    ///
    /// Same-tenant access is allowed outright. A principal whose highest role
    /// is the configured cross-tenant role may reach any tenant; every such
    /// crossing and every denial is written to the security audit trail with
    /// its specific reason.
    pub async fn authorize(
        &self,
        principal: &Principal,
        target_tenant: Uuid,
    ) -> Result<TenantScopeDecision, AuthError> {
        if principal.tenant_id == Some(target_tenant) {
            return Ok(TenantScopeDecision::allow(
                principal.id,
                target_tenant,
                ScopeReason::SameTenant,
            ));
        }

        if let Some(role) = self.rbac.get_highest_role(principal.id).await? {
            if role.is_system && role.name == self.rbac.cross_tenant_role() {
                tracing::warn!(
                    principal_id = %principal.id,
                    target_tenant = %target_tenant,
                    role = %role.name,
                    "Cross-tenant access via elevation"
                );
                self.audit
                    .cross_tenant_elevation(principal.id, target_tenant, &role.name);
                return Ok(TenantScopeDecision::allow(
                    principal.id,
                    target_tenant,
                    ScopeReason::CrossTenantElevation,
                ));
            }
        }

        let reason = match principal.tenant_id {
            None => ScopeReason::NoTenantContext,
            Some(_) => ScopeReason::DifferentTenant,
        };
        tracing::warn!(
            principal_id = %principal.id,
            target_tenant = %target_tenant,
            reason = reason.as_str(),
            "Tenant access denied"
        );
        self.audit.cross_tenant_denied(
            principal.id,
            principal.tenant_id,
            target_tenant,
            reason.as_str(),
        );
        Ok(TenantScopeDecision::deny(principal.id, target_tenant, reason))
    }

    /// Like [`authorize`](Self::authorize), but a denial becomes
    /// `TenantMismatch` carrying the reason.
    pub async fn require(
        &self,
        principal: &Principal,
        target_tenant: Uuid,
    ) -> Result<TenantScopeDecision, AuthError> {
        let decision = self.authorize(principal, target_tenant).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(AuthError::TenantMismatch(decision.reason.as_str().to_string()))
        }
    }
}
