//! Persistence boundary. Every component talks to storage through these traits;
//! `services::Database` backs them with PostgreSQL and [`InMemoryStore`] with a
//! process-local map.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Permission, PermissionName, Principal, RefreshTokenRecord, Role, Session,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),
}

#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, RepositoryError>;

    /// Case-insensitive email lookup within one tenant (or among unprovisioned
    /// principals when `tenant_id` is `None`).
    async fn find_principal_by_email(
        &self,
        tenant_id: Option<Uuid>,
        email: &str,
    ) -> Result<Option<Principal>, RepositoryError>;

    async fn insert_principal(&self, principal: &Principal) -> Result<(), RepositoryError>;

    async fn update_principal(&self, principal: &Principal) -> Result<(), RepositoryError>;

    /// Remove `code_hash` from the principal's backup codes. Returns whether it
    /// was present; checking and removing happen as one step.
    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord)
        -> Result<(), RepositoryError>;

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError>;

    async fn list_refresh_tokens_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, RepositoryError>;

    /// Atomically mark `old_token_id` revoked, link it to `replacement`, and
    /// insert `replacement`. Returns `false` without writing anything when the
    /// old record is missing or already revoked.
    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, RepositoryError>;

    /// Returns whether a non-revoked record was revoked.
    async fn revoke_refresh_token(&self, token_id: Uuid) -> Result<bool, RepositoryError>;

    async fn revoke_all_refresh_tokens(&self, principal_id: Uuid) -> Result<u64, RepositoryError>;

    /// Delete records whose `expires_at` is strictly before `now`.
    async fn delete_expired_refresh_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, RepositoryError>;

    /// The `active` session for this device whose `expires_at` is after `now`.
    async fn find_active_session_by_fingerprint(
        &self,
        principal_id: Uuid,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError>;

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, RepositoryError>;

    async fn list_sessions_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<Session>, RepositoryError>;

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Revoke every non-terminal session of the principal except `except`.
    async fn revoke_sessions(
        &self,
        principal_id: Uuid,
        except: Option<Uuid>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Move `active`/`suspicious` sessions with `expires_at < now` to `expired`.
    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn insert_role(&self, role: &Role) -> Result<(), RepositoryError>;

    /// Persist name, level, parent and the full permission set.
    async fn update_role(&self, role: &Role) -> Result<(), RepositoryError>;

    async fn delete_role(&self, role_id: Uuid) -> Result<bool, RepositoryError>;

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, RepositoryError>;

    async fn find_role_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, RepositoryError>;

    async fn list_roles(&self, tenant_id: Option<Uuid>) -> Result<Vec<Role>, RepositoryError>;

    /// Add permissions to a role, ignoring ones it already holds. Returns the
    /// number actually added.
    async fn add_role_permissions(
        &self,
        role_id: Uuid,
        permissions: &[PermissionName],
    ) -> Result<u64, RepositoryError>;

    async fn list_roles_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<Role>, RepositoryError>;

    /// Returns `false` when the assignment already existed.
    async fn insert_assignment(
        &self,
        principal_id: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn delete_assignment(
        &self,
        principal_id: Uuid,
        role_id: Uuid,
    ) -> Result<bool, RepositoryError>;

    async fn count_assignments_for_role(&self, role_id: Uuid) -> Result<u64, RepositoryError>;

    /// Roles whose parent is `role_id`.
    async fn count_child_roles(&self, role_id: Uuid) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn find_permission(
        &self,
        name: &PermissionName,
    ) -> Result<Option<Permission>, RepositoryError>;

    async fn list_permissions(&self) -> Result<Vec<Permission>, RepositoryError>;

    /// Returns `false` when a permission with this name already exists.
    async fn insert_permission(&self, permission: &Permission) -> Result<bool, RepositoryError>;

    /// Also strips the permission from every role holding it.
    async fn delete_permission(&self, name: &PermissionName) -> Result<bool, RepositoryError>;
}

/// Everything the core persists.
pub trait Store:
    PrincipalRepository
    + RefreshTokenRepository
    + SessionRepository
    + RoleRepository
    + PermissionRepository
{
}

impl<T> Store for T where
    T: PrincipalRepository
        + RefreshTokenRepository
        + SessionRepository
        + RoleRepository
        + PermissionRepository
{
}
