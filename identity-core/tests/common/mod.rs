//! Test helper module for identity-core integration tests.
//!
//! Wires every component over the in-memory store with a manual clock, so
//! tests can move time and inspect the security audit trail.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use identity_core::{
    config::{CoreSettings, JwtConfig},
    models::{Principal, PrincipalStatus},
    repository::{InMemoryStore, PrincipalRepository, RoleRepository},
    services::{
        AuthError, Clock, InMemoryAttemptCounter, LoginRequest, LoginResponse, ManualClock,
        RecordingAuditSink, UuidV4Generator,
    },
    utils::{hash_password, Argon2Verifier, Password},
    Collaborators, IdentityCore,
};
use std::sync::{Arc, OnceLock};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct horse battery staple";
pub const TEST_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) TestBrowser/1.0";
pub const TEST_IP: &str = "203.0.113.10";

/// Argon2 hashing is slow; hash the shared test password once.
fn test_password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        hash_password(&Password::new(TEST_PASSWORD))
            .expect("Failed to hash test password")
            .into_string()
    })
}

pub fn test_settings() -> CoreSettings {
    CoreSettings::with_jwt(JwtConfig::with_secrets(
        "test-access-secret",
        "test-refresh-secret",
        "test-refresh-hash-secret",
    ))
}

/// Test application with every service wired in-process.
pub struct TestApp {
    pub core: IdentityCore,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<RecordingAuditSink>,
    pub settings: CoreSettings,
}

impl TestApp {
    /// Spawn with default settings and seeded system roles.
    pub async fn spawn() -> Self {
        Self::spawn_with(test_settings()).await
    }

    pub async fn spawn_with(settings: CoreSettings) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();

        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let attempts = Arc::new(InMemoryAttemptCounter::new(
            settings.mfa.attempt_window_seconds,
            clock.clone(),
        ));

        let core = IdentityCore::new(
            &settings,
            Collaborators {
                store: store.clone(),
                attempts,
                audit_sink: audit.clone(),
                passwords: Arc::new(
                    Argon2Verifier::new().expect("Failed to create password verifier"),
                ),
                clock: clock.clone(),
                ids: Arc::new(UuidV4Generator),
            },
        );

        core.rbac
            .seed_system_roles()
            .await
            .expect("Failed to seed system roles");

        TestApp {
            core,
            store,
            clock,
            audit,
            settings,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Active principal whose password is [`TEST_PASSWORD`].
    pub async fn create_principal(&self, tenant_id: Uuid, email: &str) -> Principal {
        let principal = Principal::new(Uuid::new_v4(), Some(tenant_id), email.to_string(), self.now())
            .with_password_hash(test_password_hash().to_string())
            .with_status(PrincipalStatus::Active);
        self.store
            .insert_principal(&principal)
            .await
            .expect("Failed to insert principal");
        principal
    }

    /// Assign a system role by name.
    pub async fn assign_system_role(&self, principal_id: Uuid, role_name: &str) {
        let role = self
            .store
            .find_role_by_name(None, role_name)
            .await
            .expect("Failed to look up role")
            .expect("System role missing");
        self.core
            .rbac
            .assign_role(principal_id, role.id)
            .await
            .expect("Failed to assign role");
    }

    pub async fn reload(&self, principal_id: Uuid) -> Principal {
        self.store
            .find_principal(principal_id)
            .await
            .expect("Failed to load principal")
            .expect("Principal missing")
    }

    pub fn login_request(&self, principal: &Principal) -> LoginRequest {
        LoginRequest {
            tenant_id: principal.tenant_id,
            email: principal.email.clone(),
            password: Password::new(TEST_PASSWORD),
            mfa_code: None,
            user_agent: TEST_USER_AGENT.to_string(),
            ip_address: TEST_IP.to_string(),
            remember_me: false,
        }
    }

    pub async fn login(&self, principal: &Principal) -> Result<LoginResponse, AuthError> {
        self.core.auth.login(self.login_request(principal)).await
    }

    /// Login from a distinct device.
    pub async fn login_from(
        &self,
        principal: &Principal,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<LoginResponse, AuthError> {
        let mut req = self.login_request(principal);
        req.user_agent = user_agent.to_string();
        req.ip_address = ip_address.to_string();
        self.core.auth.login(req).await
    }

    /// Current TOTP code for `secret` at the test clock's time.
    pub fn totp_code(&self, secret: &str) -> String {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .expect("Invalid TOTP secret");
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            self.settings.mfa.window,
            self.settings.mfa.time_step_seconds,
            bytes,
            Some(self.settings.mfa.issuer.clone()),
            "test".to_string(),
        )
        .expect("Failed to build TOTP");
        totp.generate(self.now().timestamp() as u64)
    }
}
