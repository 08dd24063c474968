//! Services layer for identity-core.
//!
//! Token issuance and rotation, sessions, MFA, role resolution, tenant
//! scoping and the flows that tie them together.

pub mod attempts;
pub mod auth;
pub mod authz;
pub mod clock;
mod database;
pub mod error;
pub mod maintenance;
pub mod mfa;
pub mod rbac;
pub mod refresh;
pub mod security_audit;
pub mod session;
pub mod tenant;
pub mod token;

pub use attempts::{AttemptCounter, InMemoryAttemptCounter, RedisAttemptCounter};
pub use auth::{AuthService, Authenticated, LoginRequest, LoginResponse, RefreshRequest};
pub use authz::{AccessCheck, AccessContext, AuthorizationPipeline, Authorizer};
pub use clock::{Clock, IdGenerator, ManualClock, SystemClock, UuidV4Generator};
pub use database::Database;
pub use error::AuthError;
pub use maintenance::{MaintenanceRunner, SweepReport};
pub use mfa::{BackupCodes, MfaEnrollment, MfaGate};
pub use rbac::{RbacResolver, SeedReport};
pub use refresh::{IssuedRefreshToken, RefreshTokenEngine, Rotation};
pub use security_audit::{
    RecordingAuditSink, SecurityAuditLog, SecurityAuditService, SecurityAuditSink,
    SecurityEventType, Severity, TracingAuditSink,
};
pub use session::SessionRegistry;
pub use tenant::TenantScopeEnforcer;
pub use token::{
    AccessSubject, AccessTokenClaims, Audience, RefreshTokenClaims, SignedToken, TokenPair,
    TokenService,
};
