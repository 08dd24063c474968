//! Declarative access checks evaluated by one interpreter.
//!
//! An [`AuthorizationPipeline`] lists what an operation requires; the
//! [`Authorizer`] runs the checks in a fixed order (role, permission, tenant,
//! MFA) no matter how they were added, and stops at the first failure.

use uuid::Uuid;

use crate::models::{Action, Principal, RoleLevel};
use crate::services::error::AuthError;
use crate::services::rbac::RbacResolver;
use crate::services::tenant::TenantScopeEnforcer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessCheck {
    /// Highest role level must be `<=` the given level.
    RequireRole(RoleLevel),
    RequirePermission { resource: String, action: Action },
    RequireTenantMatch(Uuid),
    RequireMfa,
}

impl AccessCheck {
    fn rank(&self) -> u8 {
        match self {
            AccessCheck::RequireRole(_) => 0,
            AccessCheck::RequirePermission { .. } => 1,
            AccessCheck::RequireTenantMatch(_) => 2,
            AccessCheck::RequireMfa => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationPipeline {
    checks: Vec<AccessCheck>,
}

impl AuthorizationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_role(self, level: RoleLevel) -> Self {
        self.with(AccessCheck::RequireRole(level))
    }

    pub fn require_permission(self, resource: impl Into<String>, action: Action) -> Self {
        self.with(AccessCheck::RequirePermission {
            resource: resource.into(),
            action,
        })
    }

    pub fn require_tenant_match(self, tenant_id: Uuid) -> Self {
        self.with(AccessCheck::RequireTenantMatch(tenant_id))
    }

    pub fn require_mfa(self) -> Self {
        self.with(AccessCheck::RequireMfa)
    }

    pub fn with(mut self, check: AccessCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// Checks in evaluation order. Insertion order is kept within a kind.
    pub fn checks(&self) -> Vec<&AccessCheck> {
        let mut ordered: Vec<&AccessCheck> = self.checks.iter().collect();
        ordered.sort_by_key(|check| check.rank());
        ordered
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// The caller a pipeline is evaluated for.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub principal: Principal,
    /// Whether the caller completed a second factor.
    pub mfa_verified: bool,
}

impl AccessContext {
    /// Login refuses to issue tokens to an MFA-enrolled principal without a
    /// valid code, so enrolment implies the token holder passed MFA.
    pub fn new(principal: Principal) -> Self {
        let mfa_verified = principal.requires_mfa();
        Self {
            principal,
            mfa_verified,
        }
    }

    pub fn with_mfa_verified(mut self, verified: bool) -> Self {
        self.mfa_verified = verified;
        self
    }
}

#[derive(Clone)]
pub struct Authorizer {
    rbac: RbacResolver,
    tenants: TenantScopeEnforcer,
}

impl Authorizer {
    pub fn new(rbac: RbacResolver, tenants: TenantScopeEnforcer) -> Self {
        Self { rbac, tenants }
    }

    pub async fn evaluate(
        &self,
        pipeline: &AuthorizationPipeline,
        context: &AccessContext,
    ) -> Result<(), AuthError> {
        let principal_id = context.principal.id;

        for check in pipeline.checks() {
            match check {
                AccessCheck::RequireRole(level) => {
                    if !self.rbac.has_role_level(principal_id, *level).await? {
                        tracing::warn!(
                            principal_id = %principal_id,
                            required_level = level,
                            "Role level too low"
                        );
                        return Err(AuthError::PermissionDenied(format!(
                            "role level {} required",
                            level
                        )));
                    }
                }
                AccessCheck::RequirePermission { resource, action } => {
                    self.rbac
                        .require_permission(principal_id, resource, *action)
                        .await?;
                }
                AccessCheck::RequireTenantMatch(tenant_id) => {
                    self.tenants.require(&context.principal, *tenant_id).await?;
                }
                AccessCheck::RequireMfa => {
                    if !context.mfa_verified {
                        tracing::warn!(principal_id = %principal_id, "MFA required");
                        return Err(AuthError::MfaRequired);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RbacConfig;
    use crate::models::role::{MANAGER, VIEWER};
    use crate::models::PrincipalStatus;
    use crate::repository::{InMemoryStore, PrincipalRepository, RoleRepository};
    use crate::services::clock::{Clock, ManualClock, UuidV4Generator};
    use crate::services::security_audit::{
        RecordingAuditSink, SecurityAuditService, SecurityEventType,
    };
    use std::sync::Arc;

    struct Fixture {
        authorizer: Authorizer,
        store: Arc<InMemoryStore>,
        sink: Arc<RecordingAuditSink>,
        rbac: RbacResolver,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingAuditSink::new());
        let ids = Arc::new(UuidV4Generator);
        let audit = SecurityAuditService::new(sink.clone(), clock.clone(), ids.clone());
        let rbac = RbacResolver::new(store.clone(), RbacConfig::default(), clock.clone(), ids);
        rbac.seed_system_roles().await.unwrap();
        let tenants = TenantScopeEnforcer::new(rbac.clone(), audit);
        Fixture {
            authorizer: Authorizer::new(rbac.clone(), tenants),
            store,
            sink,
            rbac,
            clock,
        }
    }

    async fn principal_with_role(f: &Fixture, tenant: Uuid, role: &str) -> Principal {
        let p = Principal::new(
            Uuid::new_v4(),
            Some(tenant),
            format!("{}@example.com", Uuid::new_v4()),
            f.clock.now(),
        )
        .with_status(PrincipalStatus::Active);
        f.store.insert_principal(&p).await.unwrap();
        let role = f.store.find_role_by_name(None, role).await.unwrap().unwrap();
        f.rbac.assign_role(p.id, role.id).await.unwrap();
        p
    }

    #[test]
    fn test_checks_run_in_fixed_order() {
        let tenant = Uuid::new_v4();
        let pipeline = AuthorizationPipeline::new()
            .require_mfa()
            .require_tenant_match(tenant)
            .require_permission("files", Action::Read)
            .require_role(3);

        let ordered = pipeline.checks();
        assert_eq!(ordered[0], &AccessCheck::RequireRole(3));
        assert!(matches!(ordered[1], AccessCheck::RequirePermission { .. }));
        assert_eq!(ordered[2], &AccessCheck::RequireTenantMatch(tenant));
        assert_eq!(ordered[3], &AccessCheck::RequireMfa);
    }

    #[tokio::test]
    async fn test_empty_pipeline_allows() {
        let f = fixture().await;
        let p = principal_with_role(&f, Uuid::new_v4(), VIEWER).await;
        f.authorizer
            .evaluate(&AuthorizationPipeline::new(), &AccessContext::new(p))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let f = fixture().await;
        let tenant = Uuid::new_v4();
        let p = principal_with_role(&f, tenant, MANAGER).await;
        let pipeline = AuthorizationPipeline::new()
            .require_role(3)
            .require_permission("files", Action::Delete)
            .require_tenant_match(tenant)
            .require_mfa();

        let ctx = AccessContext::new(p).with_mfa_verified(true);
        f.authorizer.evaluate(&pipeline, &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let f = fixture().await;
        let p = principal_with_role(&f, Uuid::new_v4(), VIEWER).await;

        // Role fails first, so the tenant check never runs and nothing is audited.
        let pipeline = AuthorizationPipeline::new()
            .require_tenant_match(Uuid::new_v4())
            .require_role(3);
        let err = f
            .authorizer
            .evaluate(&pipeline, &AccessContext::new(p.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied(_)));
        assert_eq!(f.sink.count(SecurityEventType::CrossTenantAccess), 0);

        let pipeline = AuthorizationPipeline::new()
            .require_mfa()
            .require_tenant_match(Uuid::new_v4())
            .require_permission("files", Action::Read);
        let err = f
            .authorizer
            .evaluate(&pipeline, &AccessContext::new(p.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TenantMismatch(_)));
        assert_eq!(f.sink.count(SecurityEventType::CrossTenantAccess), 1);

        let tenant = p.tenant_id.unwrap();
        let pipeline = AuthorizationPipeline::new()
            .require_permission("files", Action::Read)
            .require_tenant_match(tenant)
            .require_mfa();
        let err = f
            .authorizer
            .evaluate(&pipeline, &AccessContext::new(p))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MfaRequired));
    }

    #[tokio::test]
    async fn test_permission_failure() {
        let f = fixture().await;
        let p = principal_with_role(&f, Uuid::new_v4(), VIEWER).await;
        let pipeline = AuthorizationPipeline::new().require_permission("files", Action::Delete);
        let err = f
            .authorizer
            .evaluate(&pipeline, &AccessContext::new(p))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied(ref p) if p == "files:delete"));
    }
}
