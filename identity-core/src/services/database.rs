//! PostgreSQL implementation of the repository traits.
//!
//! Rows are read into private `FromRow` structs and converted into the domain
//! models, so a bad status code or permission name surfaces as
//! `RepositoryError::Corrupt` instead of a panic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::{
    DeviceInfo, Permission, PermissionName, Principal, PrincipalStatus, RefreshTokenRecord, Role,
    Session, SessionStatus,
};
use crate::repository::{
    PermissionRepository, PrincipalRepository, RefreshTokenRepository, RepositoryError,
    RoleRepository, SessionRepository,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                RepositoryError::from(e)
            })?;
        Ok(())
    }

    async fn load_role_permissions(
        &self,
        role_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, BTreeSet<PermissionName>>, RepositoryError> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT role_id, permission_name FROM role_permissions WHERE role_id = ANY($1)",
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_role: HashMap<Uuid, BTreeSet<PermissionName>> = HashMap::new();
        for (role_id, name) in rows {
            let name = PermissionName::parse(&name).map_err(RepositoryError::Corrupt)?;
            by_role.entry(role_id).or_default().insert(name);
        }
        Ok(by_role)
    }

    async fn hydrate_roles(&self, rows: Vec<RoleRow>) -> Result<Vec<Role>, RepositoryError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.role_id).collect();
        let mut permissions = self.load_role_permissions(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let perms = permissions.remove(&row.role_id).unwrap_or_default();
                row.into_role(perms)
            })
            .collect())
    }
}

fn duplicate_or(e: sqlx::Error, what: String) -> RepositoryError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => RepositoryError::Duplicate(what),
        _ => RepositoryError::Database(e),
    }
}

// ==================== Row types ====================

#[derive(FromRow)]
struct PrincipalRow {
    principal_id: Uuid,
    tenant_id: Option<Uuid>,
    email: String,
    password_hash: Option<String>,
    status_code: String,
    mfa_enabled: bool,
    mfa_secret: Option<String>,
    backup_codes: Vec<String>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = RepositoryError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let status: PrincipalStatus = row.status_code.parse().map_err(RepositoryError::Corrupt)?;
        Ok(Principal {
            id: row.principal_id,
            tenant_id: row.tenant_id,
            email: row.email,
            password_hash: row.password_hash,
            status,
            mfa_enabled: row.mfa_enabled,
            mfa_secret: row.mfa_secret,
            backup_codes: row.backup_codes,
            created_at: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct RefreshTokenRow {
    token_id: Uuid,
    principal_id: Uuid,
    token_hash: String,
    issued_utc: DateTime<Utc>,
    expires_utc: DateTime<Utc>,
    revoked: bool,
    replaces_token_id: Option<Uuid>,
    replaced_by_token_id: Option<Uuid>,
    user_agent: Option<String>,
    ip_address: Option<String>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        let device_info = if row.user_agent.is_some() || row.ip_address.is_some() {
            Some(DeviceInfo {
                user_agent: row.user_agent,
                ip_address: row.ip_address,
            })
        } else {
            None
        };
        RefreshTokenRecord {
            token_id: row.token_id,
            principal_id: row.principal_id,
            token_hash: row.token_hash,
            issued_at: row.issued_utc,
            expires_at: row.expires_utc,
            revoked: row.revoked,
            replaces_token_id: row.replaces_token_id,
            replaced_by_token_id: row.replaced_by_token_id,
            device_info,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    session_id: Uuid,
    principal_id: Uuid,
    device_fingerprint: String,
    ip_address: String,
    user_agent: String,
    refresh_token_hash: Option<String>,
    status_code: String,
    is_trusted: bool,
    created_utc: DateTime<Utc>,
    last_activity_utc: DateTime<Utc>,
    expires_utc: DateTime<Utc>,
    revoked_utc: Option<DateTime<Utc>>,
    revoked_reason: Option<String>,
}

impl TryFrom<SessionRow> for Session {
    type Error = RepositoryError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status: SessionStatus = row.status_code.parse().map_err(RepositoryError::Corrupt)?;
        Ok(Session {
            id: row.session_id,
            principal_id: row.principal_id,
            device_fingerprint: row.device_fingerprint,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            refresh_token_hash: row.refresh_token_hash,
            status,
            is_trusted: row.is_trusted,
            created_at: row.created_utc,
            last_activity_at: row.last_activity_utc,
            expires_at: row.expires_utc,
            revoked_at: row.revoked_utc,
            revoked_reason: row.revoked_reason,
        })
    }
}

#[derive(FromRow)]
struct RoleRow {
    role_id: Uuid,
    tenant_id: Option<Uuid>,
    role_name: String,
    role_level: i32,
    is_system: bool,
    parent_role_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
}

impl RoleRow {
    fn into_role(self, permissions: BTreeSet<PermissionName>) -> Role {
        Role {
            id: self.role_id,
            tenant_id: self.tenant_id,
            name: self.role_name,
            level: self.role_level,
            is_system: self.is_system,
            parent_role_id: self.parent_role_id,
            permissions,
            created_at: self.created_utc,
        }
    }
}

#[derive(FromRow)]
struct PermissionRow {
    permission_name: String,
    description: Option<String>,
    is_system: bool,
    created_utc: DateTime<Utc>,
}

impl TryFrom<PermissionRow> for Permission {
    type Error = RepositoryError;

    fn try_from(row: PermissionRow) -> Result<Self, Self::Error> {
        Ok(Permission {
            name: PermissionName::parse(&row.permission_name).map_err(RepositoryError::Corrupt)?,
            description: row.description,
            is_system: row.is_system,
            created_at: row.created_utc,
        })
    }
}

// ==================== Principal Operations ====================

#[async_trait]
impl PrincipalRepository for Database {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, RepositoryError> {
        sqlx::query_as::<_, PrincipalRow>("SELECT * FROM principals WHERE principal_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Principal::try_from)
            .transpose()
    }

    async fn find_principal_by_email(
        &self,
        tenant_id: Option<Uuid>,
        email: &str,
    ) -> Result<Option<Principal>, RepositoryError> {
        sqlx::query_as::<_, PrincipalRow>(
            "SELECT * FROM principals WHERE tenant_id IS NOT DISTINCT FROM $1 AND LOWER(email) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(Principal::try_from)
        .transpose()
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO principals (principal_id, tenant_id, email, password_hash, status_code, mfa_enabled, mfa_secret, backup_codes, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(principal.id)
        .bind(principal.tenant_id)
        .bind(&principal.email)
        .bind(&principal.password_hash)
        .bind(principal.status.as_str())
        .bind(principal.mfa_enabled)
        .bind(&principal.mfa_secret)
        .bind(&principal.backup_codes)
        .bind(principal.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, format!("principal {}", principal.email)))?;
        Ok(())
    }

    async fn update_principal(&self, principal: &Principal) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE principals
            SET email = $2, password_hash = $3, status_code = $4, mfa_enabled = $5,
                mfa_secret = $6, backup_codes = $7
            WHERE principal_id = $1
            "#,
        )
        .bind(principal.id)
        .bind(&principal.email)
        .bind(&principal.password_hash)
        .bind(principal.status.as_str())
        .bind(principal.mfa_enabled)
        .bind(&principal.mfa_secret)
        .bind(&principal.backup_codes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE principals
            SET backup_codes = array_remove(backup_codes, $2)
            WHERE principal_id = $1 AND $2 = ANY(backup_codes)
            "#,
        )
        .bind(principal_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ==================== Refresh Token Operations ====================

#[async_trait]
impl RefreshTokenRepository for Database {
    async fn insert_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(), RepositoryError> {
        insert_refresh_token_row(&self.pool, record).await
    }

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        Ok(
            sqlx::query_as::<_, RefreshTokenRow>("SELECT * FROM refresh_tokens WHERE token_id = $1")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?
                .map(RefreshTokenRecord::from),
        )
    }

    async fn list_refresh_tokens_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, RepositoryError> {
        Ok(sqlx::query_as::<_, RefreshTokenRow>(
            "SELECT * FROM refresh_tokens WHERE principal_id = $1 ORDER BY issued_utc",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(RefreshTokenRecord::from)
        .collect())
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The conditional update is the compare-and-swap: only the first
        // concurrent rotation sees revoked = false.
        let claimed = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, replaced_by_token_id = $2
            WHERE token_id = $1 AND revoked = FALSE
            "#,
        )
        .bind(old_token_id)
        .bind(replacement.token_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_refresh_token_row(&mut *tx, replacement).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_refresh_token(&self, token_id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE token_id = $1 AND revoked = FALSE",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_refresh_tokens(&self, principal_id: Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE principal_id = $1 AND revoked = FALSE",
        )
        .bind(principal_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_refresh_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_utc < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_refresh_token_row<'e, E>(
    executor: E,
    record: &RefreshTokenRecord,
) -> Result<(), RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let (user_agent, ip_address) = match &record.device_info {
        Some(info) => (info.user_agent.clone(), info.ip_address.clone()),
        None => (None, None),
    };
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token_id, principal_id, token_hash, issued_utc, expires_utc, revoked, replaces_token_id, replaced_by_token_id, user_agent, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(record.token_id)
    .bind(record.principal_id)
    .bind(&record.token_hash)
    .bind(record.issued_at)
    .bind(record.expires_at)
    .bind(record.revoked)
    .bind(record.replaces_token_id)
    .bind(record.replaced_by_token_id)
    .bind(user_agent)
    .bind(ip_address)
    .execute(executor)
    .await
    .map_err(|e| duplicate_or(e, format!("refresh token {}", record.token_id)))?;
    Ok(())
}

// ==================== Session Operations ====================

#[async_trait]
impl SessionRepository for Database {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, principal_id, device_fingerprint, ip_address, user_agent, refresh_token_hash, status_code, is_trusted, created_utc, last_activity_utc, expires_utc, revoked_utc, revoked_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.id)
        .bind(session.principal_id)
        .bind(&session.device_fingerprint)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.refresh_token_hash)
        .bind(session.status.as_str())
        .bind(session.is_trusted)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(&session.revoked_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, format!("session {}", session.id)))?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, RepositoryError> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE session_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Session::try_from)
            .transpose()
    }

    async fn find_active_session_by_fingerprint(
        &self,
        principal_id: Uuid,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT * FROM sessions
            WHERE principal_id = $1 AND device_fingerprint = $2
              AND status_code = 'active' AND expires_utc > $3
            ORDER BY last_activity_utc DESC
            LIMIT 1
            "#,
        )
        .bind(principal_id)
        .bind(fingerprint)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(Session::try_from)
        .transpose()
    }

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE refresh_token_hash = $1 LIMIT 1",
        )
        .bind(refresh_token_hash)
        .fetch_optional(&self.pool)
        .await?
        .map(Session::try_from)
        .transpose()
    }

    async fn list_sessions_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<Session>, RepositoryError> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE principal_id = $1 ORDER BY created_utc",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Session::try_from)
        .collect()
    }

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET ip_address = $2, user_agent = $3, refresh_token_hash = $4, status_code = $5,
                is_trusted = $6, last_activity_utc = $7, expires_utc = $8, revoked_utc = $9,
                revoked_reason = $10
            WHERE session_id = $1
            "#,
        )
        .bind(session.id)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.refresh_token_hash)
        .bind(session.status.as_str())
        .bind(session.is_trusted)
        .bind(session.last_activity_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(&session.revoked_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_sessions(
        &self,
        principal_id: Uuid,
        except: Option<Uuid>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status_code = 'revoked', revoked_utc = $3, revoked_reason = $4
            WHERE principal_id = $1
              AND status_code IN ('active', 'suspicious')
              AND session_id IS DISTINCT FROM $2
            "#,
        )
        .bind(principal_id)
        .bind(except)
        .bind(now)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status_code = 'expired'
            WHERE status_code IN ('active', 'suspicious') AND expires_utc < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Role Operations ====================

#[async_trait]
impl RoleRepository for Database {
    async fn insert_role(&self, role: &Role) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO roles (role_id, tenant_id, role_name, role_level, is_system, parent_role_id, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(role.id)
        .bind(role.tenant_id)
        .bind(&role.name)
        .bind(role.level)
        .bind(role.is_system)
        .bind(role.parent_role_id)
        .bind(role.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_or(e, format!("role {}", role.name)))?;

        let names: Vec<String> = role.permissions.iter().map(|p| p.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_name)
            SELECT $1, UNNEST($2::TEXT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role.id)
        .bind(&names)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE roles SET role_name = $2, role_level = $3, parent_role_id = $4
            WHERE role_id = $1
            "#,
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(role.level)
        .bind(role.parent_role_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_or(e, format!("role {}", role.name)))?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role.id)
            .execute(&mut *tx)
            .await?;

        let names: Vec<String> = role.permissions.iter().map(|p| p.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_name)
            SELECT $1, UNNEST($2::TEXT[])
            "#,
        )
        .bind(role.id)
        .bind(&names)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, RepositoryError> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.hydrate_roles(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_role_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, RepositoryError> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT * FROM roles WHERE tenant_id IS NOT DISTINCT FROM $1 AND role_name = $2",
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(self.hydrate_roles(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_roles(&self, tenant_id: Option<Uuid>) -> Result<Vec<Role>, RepositoryError> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT * FROM roles
            WHERE tenant_id IS NULL OR tenant_id = $1
            ORDER BY role_level, role_name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_roles(rows).await
    }

    async fn add_role_permissions(
        &self,
        role_id: Uuid,
        permissions: &[PermissionName],
    ) -> Result<u64, RepositoryError> {
        let names: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_name)
            SELECT $1, UNNEST($2::TEXT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(&names)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_roles_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<Role>, RepositoryError> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.* FROM roles r
            JOIN role_assignments ra ON ra.role_id = r.role_id
            WHERE ra.principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_roles(rows).await
    }

    async fn insert_assignment(
        &self,
        principal_id: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_assignments (principal_id, role_id, assigned_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(principal_id)
        .bind(role_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_assignment(
        &self,
        principal_id: Uuid,
        role_id: Uuid,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM role_assignments WHERE principal_id = $1 AND role_id = $2")
                .bind(principal_id)
                .bind(role_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_assignments_for_role(&self, role_id: Uuid) -> Result<u64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM role_assignments WHERE role_id = $1")
                .bind(role_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_child_roles(&self, role_id: Uuid) -> Result<u64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM roles WHERE parent_role_id = $1")
                .bind(role_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

// ==================== Permission Operations ====================

#[async_trait]
impl PermissionRepository for Database {
    async fn find_permission(
        &self,
        name: &PermissionName,
    ) -> Result<Option<Permission>, RepositoryError> {
        sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions WHERE permission_name = $1")
            .bind(name.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(Permission::try_from)
            .transpose()
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, RepositoryError> {
        sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions ORDER BY permission_name")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Permission::try_from)
            .collect()
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO permissions (permission_name, description, is_system, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(permission.name.to_string())
        .bind(&permission.description)
        .bind(permission.is_system)
        .bind(permission.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_permission(&self, name: &PermissionName) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_permissions WHERE permission_name = $1")
            .bind(name.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM permissions WHERE permission_name = $1")
            .bind(name.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }
}
