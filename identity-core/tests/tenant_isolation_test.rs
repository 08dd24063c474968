mod common;

use common::TestApp;
use identity_core::models::role::{ADMIN, LEVEL_ADMIN, MEMBER, OWNER, SUPER_ADMIN, VIEWER};
use identity_core::models::{Action, ScopeReason};
use identity_core::services::{AuthError, AuthorizationPipeline, SecurityEventType};
use uuid::Uuid;

#[tokio::test]
async fn test_admin_cannot_reach_another_tenant() {
    let app = TestApp::spawn().await;
    let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
    let admin = app.create_principal(t1, "admin@t1.example.com").await;
    app.assign_system_role(admin.id, ADMIN).await;
    let token = app.login(&admin).await.unwrap().tokens.access_token;

    let own = AuthorizationPipeline::new()
        .require_permission("users", Action::Read)
        .require_tenant_match(t1);
    app.core.auth.authorize(&token, &own).await.unwrap();
    assert!(app.audit.entries().is_empty());

    let foreign = AuthorizationPipeline::new()
        .require_permission("users", Action::Read)
        .require_tenant_match(t2);
    let err = app.core.auth.authorize(&token, &foreign).await.unwrap_err();
    assert!(matches!(err, AuthError::TenantMismatch(ref r) if r == "different tenant"));
    assert_eq!(app.audit.count(SecurityEventType::CrossTenantAccess), 1);
}

#[tokio::test]
async fn test_super_admin_elevation_is_audited() {
    let app = TestApp::spawn().await;
    let (home, other) = (Uuid::new_v4(), Uuid::new_v4());
    let operator = app.create_principal(home, "ops@example.com").await;
    app.assign_system_role(operator.id, SUPER_ADMIN).await;
    let token = app.login(&operator).await.unwrap().tokens.access_token;

    let pipeline = AuthorizationPipeline::new()
        .require_role(LEVEL_ADMIN)
        .require_tenant_match(other);
    let authenticated = app.core.auth.authorize(&token, &pipeline).await.unwrap();
    assert_eq!(authenticated.claims.sub, operator.id);

    let entries = app.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, SecurityEventType::CrossTenantElevation);
    assert_eq!(entries[0].principal_id, Some(operator.id));
}

#[tokio::test]
async fn test_super_admin_only_elevates_when_highest() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "viewer@example.com")
        .await;
    app.assign_system_role(principal.id, VIEWER).await;

    let decision = app
        .core
        .tenants
        .authorize(&principal, Uuid::new_v4())
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, ScopeReason::DifferentTenant);

    app.assign_system_role(principal.id, SUPER_ADMIN).await;
    let decision = app
        .core
        .tenants
        .authorize(&principal, Uuid::new_v4())
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.reason, ScopeReason::CrossTenantElevation);
}

#[tokio::test]
async fn test_super_admin_wins_tie_with_owner() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "founder@example.com")
        .await;
    app.assign_system_role(principal.id, OWNER).await;
    app.assign_system_role(principal.id, SUPER_ADMIN).await;

    let highest = app
        .core
        .rbac
        .get_highest_role(principal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(highest.name, SUPER_ADMIN);

    let decision = app
        .core
        .tenants
        .authorize(&principal, Uuid::new_v4())
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.reason, ScopeReason::CrossTenantElevation);

    let tokens = app.login(&principal).await.unwrap().tokens;
    let claims = app
        .core
        .tokens
        .verify_access_token(&tokens.access_token)
        .unwrap();
    assert_eq!(claims.role.as_deref(), Some(SUPER_ADMIN));
}

#[tokio::test]
async fn test_principal_without_tenant_is_denied_with_reason() {
    let app = TestApp::spawn().await;
    let mut principal = app
        .create_principal(Uuid::new_v4(), "floating@example.com")
        .await;
    principal.tenant_id = None;
    app.assign_system_role(principal.id, MEMBER).await;

    let err = app
        .core
        .tenants
        .require(&principal, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TenantMismatch(ref r) if r == "no tenant context"));
    assert_eq!(app.audit.count(SecurityEventType::CrossTenantAccess), 1);
}

#[tokio::test]
async fn test_pipeline_stops_at_first_failing_check() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let member = app.create_principal(tenant, "member@example.com").await;
    app.assign_system_role(member.id, MEMBER).await;
    let token = app.login(&member).await.unwrap().tokens.access_token;

    // The role check runs before the tenant check, so no tenant audit entry.
    let pipeline = AuthorizationPipeline::new()
        .require_tenant_match(Uuid::new_v4())
        .require_role(LEVEL_ADMIN);
    let err = app.core.auth.authorize(&token, &pipeline).await.unwrap_err();
    assert!(matches!(err, AuthError::PermissionDenied(_)));
    assert!(app.audit.entries().is_empty());

    let pipeline = AuthorizationPipeline::new()
        .require_permission("billing", Action::Read)
        .require_tenant_match(tenant);
    let err = app.core.auth.authorize(&token, &pipeline).await.unwrap_err();
    assert!(matches!(err, AuthError::PermissionDenied(ref p) if p == "billing:read"));
}
