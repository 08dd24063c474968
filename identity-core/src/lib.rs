pub mod config;
pub mod db;
pub mod models;
pub mod repository;
pub mod services;
pub mod utils;

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CoreSettings;
use crate::repository::Store;
use crate::services::{
    AttemptCounter, AuthService, Authorizer, Clock, IdGenerator, MaintenanceRunner, MfaGate,
    RbacResolver, RefreshTokenEngine, SecurityAuditService, SecurityAuditSink, SessionRegistry,
    TenantScopeEnforcer, TokenService,
};
use crate::utils::PasswordVerifier;

/// External capabilities the core is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub attempts: Arc<dyn AttemptCounter>,
    pub audit_sink: Arc<dyn SecurityAuditSink>,
    pub passwords: Arc<dyn PasswordVerifier>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// Every component, wired against one store.
#[derive(Clone)]
pub struct IdentityCore {
    pub audit: SecurityAuditService,
    pub tokens: TokenService,
    pub refresh: RefreshTokenEngine,
    pub sessions: SessionRegistry,
    pub mfa: MfaGate,
    pub rbac: RbacResolver,
    pub tenants: TenantScopeEnforcer,
    pub authorizer: Authorizer,
    pub auth: AuthService,
    pub maintenance: MaintenanceRunner,
}

impl IdentityCore {
    pub fn new(settings: &CoreSettings, deps: Collaborators) -> Self {
        let Collaborators {
            store,
            attempts,
            audit_sink,
            passwords,
            clock,
            ids,
        } = deps;

        let audit = SecurityAuditService::new(audit_sink, clock.clone(), ids.clone());
        let tokens = TokenService::new(&settings.jwt, clock.clone(), ids.clone());
        let refresh = RefreshTokenEngine::new(
            store.clone(),
            tokens.clone(),
            SecretString::new(settings.jwt.refresh_hash_secret.expose_secret().clone()),
            clock.clone(),
            ids.clone(),
            audit.clone(),
        );
        let sessions = SessionRegistry::new(
            store.clone(),
            settings.session.clone(),
            clock.clone(),
            ids.clone(),
            audit.clone(),
        );
        let mfa = MfaGate::new(
            store.clone(),
            attempts,
            settings.mfa.clone(),
            clock.clone(),
            audit.clone(),
        );
        let rbac = RbacResolver::new(store.clone(), settings.rbac.clone(), clock, ids);
        let tenants = TenantScopeEnforcer::new(rbac.clone(), audit.clone());
        let authorizer = Authorizer::new(rbac.clone(), tenants.clone());
        let auth = AuthService::new(
            store,
            passwords,
            tokens.clone(),
            refresh.clone(),
            sessions.clone(),
            mfa.clone(),
            rbac.clone(),
            authorizer.clone(),
        );
        let maintenance = MaintenanceRunner::new(
            refresh.clone(),
            sessions.clone(),
            Duration::from_secs(settings.maintenance.sweep_interval_seconds),
        );

        Self {
            audit,
            tokens,
            refresh,
            sessions,
            mfa,
            rbac,
            tenants,
            authorizer,
            auth,
            maintenance,
        }
    }
}
