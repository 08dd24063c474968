pub mod permission;
pub mod principal;
pub mod refresh_token;
pub mod role;
pub mod session;
pub mod tenant_scope;

pub use permission::{Action, Permission, PermissionName};
pub use principal::{Principal, PrincipalStatus};
pub use refresh_token::{DeviceInfo, RefreshTokenRecord};
pub use role::{CreateRoleRequest, Role, RoleLevel};
pub use session::{CreateSession, Session, SessionPatch, SessionStatus};
pub use tenant_scope::{ScopeReason, TenantScopeDecision};
