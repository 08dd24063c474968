use service_core::error::AppError;
use thiserror::Error;

use crate::repository::RepositoryError;

/// Message shown to end users for every credential or refresh failure, so
/// callers cannot tell which check failed.
pub const UNIFORM_AUTH_FAILURE: &str = "Authentication failed";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is not active")]
    AccountNotActive,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Multi-factor authentication required")]
    MfaRequired,

    #[error("Invalid multi-factor authentication code")]
    MfaInvalidCode,

    #[error("Too many multi-factor authentication attempts")]
    MfaAttemptsExceeded,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session is not active")]
    SessionNotActive,

    #[error("Principal not found")]
    PrincipalNotFound,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Role already assigned")]
    RoleAlreadyAssigned,

    #[error("Role is still assigned to {0} principal(s)")]
    RoleInUse(u64),

    #[error("Invalid role hierarchy: {0}")]
    InvalidRoleHierarchy(String),

    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Tenant mismatch: {0}")]
    TenantMismatch(String),

    #[error("System entity is immutable: {0}")]
    SystemEntityImmutable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// End-user facing message. Security-sensitive failures collapse into
    /// [`UNIFORM_AUTH_FAILURE`]; `Display` keeps the detail for logs.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::TokenReuseDetected => UNIFORM_AUTH_FAILURE.to_string(),
            AuthError::Persistence(_) | AuthError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let public = anyhow::anyhow!(err.public_message());
        match err {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::InvalidRefreshToken
            | AuthError::TokenReuseDetected
            | AuthError::MfaRequired
            | AuthError::MfaInvalidCode => AppError::AuthError(public),
            AuthError::AccountNotActive
            | AuthError::PermissionDenied(_)
            | AuthError::TenantMismatch(_)
            | AuthError::SystemEntityImmutable(_) => AppError::Forbidden(public),
            AuthError::MfaAttemptsExceeded => AppError::TooManyRequests(public.to_string(), None),
            AuthError::SessionNotFound | AuthError::PrincipalNotFound | AuthError::RoleNotFound => {
                AppError::NotFound(public)
            }
            AuthError::SessionNotActive => AppError::Unauthorized(public),
            AuthError::RoleAlreadyAssigned | AuthError::RoleInUse(_) => AppError::Conflict(public),
            AuthError::InvalidRoleHierarchy(_)
            | AuthError::InvalidPermission(_)
            | AuthError::Validation(_) => AppError::BadRequest(public),
            AuthError::Persistence(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_failures_share_public_message() {
        let messages: Vec<String> = [
            AuthError::InvalidCredentials,
            AuthError::InvalidRefreshToken,
            AuthError::TokenReuseDetected,
        ]
        .iter()
        .map(AuthError::public_message)
        .collect();
        assert!(messages.iter().all(|m| m == UNIFORM_AUTH_FAILURE));
    }

    #[test]
    fn test_display_keeps_detail_for_logs() {
        assert_eq!(
            AuthError::TokenReuseDetected.to_string(),
            "Refresh token reuse detected"
        );
        assert_eq!(
            AuthError::TenantMismatch("different tenant".to_string()).to_string(),
            "Tenant mismatch: different tenant"
        );
    }

    #[test]
    fn test_app_error_mapping_keeps_kinds_distinct() {
        assert!(matches!(
            AppError::from(AuthError::MfaAttemptsExceeded),
            AppError::TooManyRequests(_, _)
        ));
        assert!(matches!(
            AppError::from(AuthError::TenantMismatch("different tenant".to_string())),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            AppError::from(AuthError::RoleAlreadyAssigned),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            AppError::from(AuthError::SessionNotFound),
            AppError::NotFound(_)
        ));
    }
}
