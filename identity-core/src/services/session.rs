//! Per-device session registry.
//!
//! One session per `(principal, device fingerprint)` while active: a repeat
//! login from the same device refreshes the existing record. New devices past
//! the concurrency limit evict the least recently active sessions.

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::{CreateSession, Session, SessionPatch, SessionStatus};
use crate::repository::Store;
use crate::services::clock::{Clock, IdGenerator};
use crate::services::error::AuthError;
use crate::services::security_audit::SecurityAuditService;
use crate::utils::device_fingerprint;

pub const SESSION_LIMIT_REASON: &str = "Session limit exceeded";

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn Store>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    audit: SecurityAuditService,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        audit: SecurityAuditService,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            ids,
            audit,
        }
    }

    pub async fn create(&self, dto: CreateSession) -> Result<Session, AuthError> {
        let now = self.clock.now();
        let fingerprint = device_fingerprint(&dto.user_agent, &dto.ip_address);

        if let Some(mut existing) = self
            .store
            .find_active_session_by_fingerprint(dto.principal_id, &fingerprint, now)
            .await?
        {
            existing.last_activity_at = now;
            if dto.refresh_token_hash.is_some() {
                existing.refresh_token_hash = dto.refresh_token_hash;
            }
            self.store.update_session(&existing).await?;
            tracing::info!(
                principal_id = %existing.principal_id,
                session_id = %existing.id,
                "Existing device session reused"
            );
            return Ok(existing);
        }

        self.enforce_limit(dto.principal_id).await?;

        let ttl = if dto.remember_me {
            Duration::days(self.config.remember_me_days)
        } else {
            Duration::hours(self.config.default_ttl_hours)
        };

        let session = Session {
            id: self.ids.next_id(),
            principal_id: dto.principal_id,
            device_fingerprint: fingerprint,
            ip_address: dto.ip_address,
            user_agent: dto.user_agent,
            refresh_token_hash: dto.refresh_token_hash,
            status: SessionStatus::Active,
            is_trusted: dto.is_trusted,
            created_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
            revoked_at: None,
            revoked_reason: None,
        };
        self.store.insert_session(&session).await?;

        tracing::info!(
            principal_id = %session.principal_id,
            session_id = %session.id,
            remember_me = dto.remember_me,
            "Session created"
        );
        Ok(session)
    }

    /// Revoke the least recently active sessions so one more fits under the
    /// limit. Concurrent logins may briefly exceed it by one.
    async fn enforce_limit(&self, principal_id: Uuid) -> Result<(), AuthError> {
        let mut active = self.list_active(principal_id).await?;
        if active.len() < self.config.max_concurrent {
            return Ok(());
        }

        active.sort_by_key(|s| s.last_activity_at);
        let excess = active.len() + 1 - self.config.max_concurrent;
        let now = self.clock.now();
        for mut session in active.into_iter().take(excess) {
            session.revoke(now, Some(SESSION_LIMIT_REASON.to_string()));
            self.store.update_session(&session).await?;
            self.audit.session_evicted(principal_id, session.id);
            tracing::info!(
                principal_id = %principal_id,
                session_id = %session.id,
                "Session evicted: limit exceeded"
            );
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Session, AuthError> {
        self.store
            .find_session(id)
            .await?
            .ok_or(AuthError::SessionNotFound)
    }

    pub async fn list_by_principal(&self, principal_id: Uuid) -> Result<Vec<Session>, AuthError> {
        Ok(self.store.list_sessions_for_principal(principal_id).await?)
    }

    /// Sessions with `active` status that have not yet expired.
    pub async fn list_active(&self, principal_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let now = self.clock.now();
        Ok(self
            .list_by_principal(principal_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active(now))
            .collect())
    }

    pub async fn find_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, AuthError> {
        Ok(self
            .store
            .find_session_by_refresh_hash(refresh_token_hash)
            .await?)
    }

    /// Fails with `SessionNotActive` when the session holding this refresh
    /// hash was revoked, evicted or has expired. Unbound hashes pass.
    pub async fn ensure_bound_session_usable(
        &self,
        refresh_token_hash: &str,
    ) -> Result<(), AuthError> {
        match self.store.find_session_by_refresh_hash(refresh_token_hash).await? {
            Some(session) if !session.is_usable(self.clock.now()) => {
                tracing::warn!(
                    principal_id = %session.principal_id,
                    session_id = %session.id,
                    status = ?session.status,
                    "Refresh for an ended session"
                );
                Err(AuthError::SessionNotActive)
            }
            _ => Ok(()),
        }
    }

    /// Point the session holding `old_hash` at the rotated token and record
    /// activity. Ended sessions are left as they are.
    pub async fn rebind_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<Option<Session>, AuthError> {
        let now = self.clock.now();
        let Some(mut session) = self.store.find_session_by_refresh_hash(old_hash).await? else {
            return Ok(None);
        };
        if !session.is_usable(now) {
            tracing::info!(session_id = %session.id, "Refresh for an ended session");
            return Ok(None);
        }
        session.refresh_token_hash = Some(new_hash.to_string());
        session.last_activity_at = now;
        self.store.update_session(&session).await?;
        Ok(Some(session))
    }

    pub async fn update(&self, id: Uuid, patch: SessionPatch) -> Result<Session, AuthError> {
        let mut session = self.get(id).await?;
        if session.status.is_terminal() {
            return Err(AuthError::SessionNotActive);
        }
        patch.apply(&mut session);
        self.store.update_session(&session).await?;
        Ok(session)
    }

    /// Revoking an already expired or revoked session is a no-op.
    pub async fn revoke(&self, id: Uuid, reason: Option<&str>) -> Result<(), AuthError> {
        let mut session = self.get(id).await?;
        if session.status.is_terminal() {
            return Ok(());
        }
        session.revoke(self.clock.now(), reason.map(str::to_string));
        self.store.update_session(&session).await?;
        tracing::info!(
            principal_id = %session.principal_id,
            session_id = %id,
            reason = reason.unwrap_or(""),
            "Session revoked"
        );
        Ok(())
    }

    pub async fn revoke_all(
        &self,
        principal_id: Uuid,
        reason: Option<&str>,
    ) -> Result<u64, AuthError> {
        let count = self
            .store
            .revoke_sessions(principal_id, None, reason, self.clock.now())
            .await?;
        tracing::info!(principal_id = %principal_id, count, "All sessions revoked");
        Ok(count)
    }

    pub async fn revoke_others(
        &self,
        principal_id: Uuid,
        except_id: Uuid,
        reason: Option<&str>,
    ) -> Result<u64, AuthError> {
        let count = self
            .store
            .revoke_sessions(principal_id, Some(except_id), reason, self.clock.now())
            .await?;
        tracing::info!(
            principal_id = %principal_id,
            kept_session_id = %except_id,
            count,
            "Other sessions revoked"
        );
        Ok(count)
    }

    async fn usable(&self, id: Uuid) -> Result<Session, AuthError> {
        let session = self.get(id).await?;
        if !session.is_usable(self.clock.now()) {
            return Err(AuthError::SessionNotActive);
        }
        Ok(session)
    }

    /// Record activity now.
    pub async fn touch(&self, id: Uuid) -> Result<Session, AuthError> {
        let mut session = self.usable(id).await?;
        session.last_activity_at = self.clock.now();
        self.store.update_session(&session).await?;
        Ok(session)
    }

    /// Push expiry to `minutes` from now.
    pub async fn extend(&self, id: Uuid, minutes: i64) -> Result<Session, AuthError> {
        if minutes <= 0 {
            return Err(AuthError::Validation(
                "Extension must be a positive number of minutes".to_string(),
            ));
        }
        let mut session = self.usable(id).await?;
        session.expires_at = self.clock.now() + Duration::minutes(minutes);
        self.store.update_session(&session).await?;
        tracing::info!(session_id = %id, minutes, "Session extended");
        Ok(session)
    }

    /// Flag a session. It stays usable until someone revokes it.
    pub async fn mark_suspicious(&self, id: Uuid) -> Result<Session, AuthError> {
        let mut session = self.usable(id).await?;
        if session.status != SessionStatus::Suspicious {
            session.status = SessionStatus::Suspicious;
            self.store.update_session(&session).await?;
            self.audit
                .suspicious_session(session.principal_id, id, "marked suspicious");
            tracing::warn!(
                principal_id = %session.principal_id,
                session_id = %id,
                "Session marked suspicious"
            );
        }
        Ok(session)
    }

    /// True when `observed_ip` differs from the stored address, or when an
    /// active session has been idle past the inactivity threshold. Does not
    /// change the session.
    pub async fn detect_suspicious(&self, id: Uuid, observed_ip: &str) -> Result<bool, AuthError> {
        let session = self.get(id).await?;

        if session.ip_address != observed_ip {
            tracing::warn!(session_id = %id, "Request from a different IP than the session");
            return Ok(true);
        }

        let idle = self.clock.now() - session.last_activity_at;
        if session.status == SessionStatus::Active
            && idle > Duration::hours(self.config.inactivity_threshold_hours)
        {
            tracing::warn!(session_id = %id, idle_hours = idle.num_hours(), "Long-idle session");
            return Ok(true);
        }

        Ok(false)
    }

    /// Move sessions past their expiry to `expired`. Revoked sessions are
    /// left alone.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let expired = self.store.expire_sessions(self.clock.now()).await?;
        if expired > 0 {
            tracing::info!(expired, "Expired sessions swept");
        }
        Ok(expired)
    }
}
