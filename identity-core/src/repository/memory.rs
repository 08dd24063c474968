use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    PermissionRepository, PrincipalRepository, RefreshTokenRepository, RepositoryError,
    RoleRepository, SessionRepository,
};
use crate::models::{
    Permission, PermissionName, Principal, RefreshTokenRecord, Role, Session, SessionStatus,
};

#[derive(Default)]
struct State {
    principals: HashMap<Uuid, Principal>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    sessions: HashMap<Uuid, Session>,
    roles: HashMap<Uuid, Role>,
    assignments: BTreeMap<(Uuid, Uuid), DateTime<Utc>>,
    permissions: BTreeMap<PermissionName, Permission>,
}

/// Process-local store. Every operation runs under one lock, so multi-record
/// updates such as rotation are atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|e| RepositoryError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryStore {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, RepositoryError> {
        Ok(self.state()?.principals.get(&id).cloned())
    }

    async fn find_principal_by_email(
        &self,
        tenant_id: Option<Uuid>,
        email: &str,
    ) -> Result<Option<Principal>, RepositoryError> {
        Ok(self
            .state()?
            .principals
            .values()
            .find(|p| p.tenant_id == tenant_id && p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let clash = state.principals.values().any(|p| {
            p.id == principal.id
                || (p.tenant_id == principal.tenant_id
                    && p.email.eq_ignore_ascii_case(&principal.email))
        });
        if clash {
            return Err(RepositoryError::Duplicate(format!(
                "principal {}",
                principal.email
            )));
        }
        state.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn update_principal(&self, principal: &Principal) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if let Some(existing) = state.principals.get_mut(&principal.id) {
            *existing = principal.clone();
        }
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        let Some(principal) = state.principals.get_mut(&principal_id) else {
            return Ok(false);
        };
        match principal.backup_codes.iter().position(|c| c == code_hash) {
            Some(idx) => {
                principal.backup_codes.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryStore {
    async fn insert_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if state.refresh_tokens.contains_key(&record.token_id) {
            return Err(RepositoryError::Duplicate(format!(
                "refresh token {}",
                record.token_id
            )));
        }
        state.refresh_tokens.insert(record.token_id, record.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        Ok(self.state()?.refresh_tokens.get(&token_id).cloned())
    }

    async fn list_refresh_tokens_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, RepositoryError> {
        let mut records: Vec<RefreshTokenRecord> = self
            .state()?
            .refresh_tokens
            .values()
            .filter(|r| r.principal_id == principal_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.issued_at);
        Ok(records)
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        if state.refresh_tokens.contains_key(&replacement.token_id) {
            return Err(RepositoryError::Duplicate(format!(
                "refresh token {}",
                replacement.token_id
            )));
        }
        match state.refresh_tokens.get_mut(&old_token_id) {
            Some(old) if !old.revoked => {
                old.revoked = true;
                old.replaced_by_token_id = Some(replacement.token_id);
            }
            _ => return Ok(false),
        }
        state
            .refresh_tokens
            .insert(replacement.token_id, replacement.clone());
        Ok(true)
    }

    async fn revoke_refresh_token(&self, token_id: Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        match state.refresh_tokens.get_mut(&token_id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(&self, principal_id: Uuid) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let mut count = 0;
        for record in state
            .refresh_tokens
            .values_mut()
            .filter(|r| r.principal_id == principal_id && !r.revoked)
        {
            record.revoked = true;
            count += 1;
        }
        Ok(count)
    }

    async fn delete_expired_refresh_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, r| r.expires_at >= now);
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if state.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Duplicate(format!("session {}", session.id)));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, RepositoryError> {
        Ok(self.state()?.sessions.get(&id).cloned())
    }

    async fn find_active_session_by_fingerprint(
        &self,
        principal_id: Uuid,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        Ok(self
            .state()?
            .sessions
            .values()
            .filter(|s| {
                s.principal_id == principal_id
                    && s.device_fingerprint == fingerprint
                    && s.is_active(now)
            })
            .max_by_key(|s| s.last_activity_at)
            .cloned())
    }

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        Ok(self
            .state()?
            .sessions
            .values()
            .find(|s| s.refresh_token_hash.as_deref() == Some(refresh_token_hash))
            .cloned())
    }

    async fn list_sessions_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<Session>, RepositoryError> {
        let mut sessions: Vec<Session> = self
            .state()?
            .sessions
            .values()
            .filter(|s| s.principal_id == principal_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if let Some(existing) = state.sessions.get_mut(&session.id) {
            *existing = session.clone();
        }
        Ok(())
    }

    async fn revoke_sessions(
        &self,
        principal_id: Uuid,
        except: Option<Uuid>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let mut count = 0;
        for session in state.sessions.values_mut().filter(|s| {
            s.principal_id == principal_id && !s.status.is_terminal() && Some(s.id) != except
        }) {
            session.revoke(now, reason.map(str::to_string));
            count += 1;
        }
        Ok(count)
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let mut count = 0;
        for session in state
            .sessions
            .values_mut()
            .filter(|s| !s.status.is_terminal() && s.expires_at < now)
        {
            session.status = SessionStatus::Expired;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl RoleRepository for InMemoryStore {
    async fn insert_role(&self, role: &Role) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let clash = state.roles.values().any(|r| {
            r.id == role.id || (r.tenant_id == role.tenant_id && r.name == role.name)
        });
        if clash {
            return Err(RepositoryError::Duplicate(format!("role {}", role.name)));
        }
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if let Some(existing) = state.roles.get_mut(&role.id) {
            *existing = role.clone();
        }
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        let removed = state.roles.remove(&role_id).is_some();
        state.assignments.retain(|(_, r), _| *r != role_id);
        Ok(removed)
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, RepositoryError> {
        Ok(self.state()?.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, RepositoryError> {
        Ok(self
            .state()?
            .roles
            .values()
            .find(|r| r.tenant_id == tenant_id && r.name == name)
            .cloned())
    }

    async fn list_roles(&self, tenant_id: Option<Uuid>) -> Result<Vec<Role>, RepositoryError> {
        let mut roles: Vec<Role> = self
            .state()?
            .roles
            .values()
            .filter(|r| r.tenant_id.is_none() || r.tenant_id == tenant_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn add_role_permissions(
        &self,
        role_id: Uuid,
        permissions: &[PermissionName],
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let Some(role) = state.roles.get_mut(&role_id) else {
            return Ok(0);
        };
        let added = permissions
            .iter()
            .filter(|p| role.permissions.insert((*p).clone()))
            .count();
        Ok(added as u64)
    }

    async fn list_roles_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<Role>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .assignments
            .keys()
            .filter(|(p, _)| *p == principal_id)
            .filter_map(|(_, role_id)| state.roles.get(role_id).cloned())
            .collect())
    }

    async fn insert_assignment(
        &self,
        principal_id: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        if state.assignments.contains_key(&(principal_id, role_id)) {
            return Ok(false);
        }
        state.assignments.insert((principal_id, role_id), now);
        Ok(true)
    }

    async fn delete_assignment(
        &self,
        principal_id: Uuid,
        role_id: Uuid,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .state()?
            .assignments
            .remove(&(principal_id, role_id))
            .is_some())
    }

    async fn count_assignments_for_role(&self, role_id: Uuid) -> Result<u64, RepositoryError> {
        Ok(self
            .state()?
            .assignments
            .keys()
            .filter(|(_, r)| *r == role_id)
            .count() as u64)
    }

    async fn count_child_roles(&self, role_id: Uuid) -> Result<u64, RepositoryError> {
        Ok(self
            .state()?
            .roles
            .values()
            .filter(|r| r.parent_role_id == Some(role_id))
            .count() as u64)
    }
}

#[async_trait]
impl PermissionRepository for InMemoryStore {
    async fn find_permission(
        &self,
        name: &PermissionName,
    ) -> Result<Option<Permission>, RepositoryError> {
        Ok(self.state()?.permissions.get(name).cloned())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, RepositoryError> {
        Ok(self.state()?.permissions.values().cloned().collect())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        if state.permissions.contains_key(&permission.name) {
            return Ok(false);
        }
        state
            .permissions
            .insert(permission.name.clone(), permission.clone());
        Ok(true)
    }

    async fn delete_permission(&self, name: &PermissionName) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        let removed = state.permissions.remove(name).is_some();
        for role in state.roles.values_mut() {
            role.permissions.remove(name);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(principal_id: Uuid, now: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord::new(
            Uuid::new_v4(),
            principal_id,
            "hash".to_string(),
            now,
            now + Duration::days(7),
            None,
        )
    }

    #[tokio::test]
    async fn test_rotate_is_compare_and_swap() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let principal = Uuid::new_v4();
        let first = record(principal, now);
        store.insert_refresh_token(&first).await.unwrap();

        let second = record(principal, now).replacing(first.token_id);
        assert!(store.rotate_refresh_token(first.token_id, &second).await.unwrap());

        // A second rotation of the same token loses and writes nothing.
        let third = record(principal, now).replacing(first.token_id);
        assert!(!store.rotate_refresh_token(first.token_id, &third).await.unwrap());
        assert!(store.find_refresh_token(third.token_id).await.unwrap().is_none());

        let old = store.find_refresh_token(first.token_id).await.unwrap().unwrap();
        assert!(old.revoked);
        assert_eq!(old.replaced_by_token_id, Some(second.token_id));
    }

    #[tokio::test]
    async fn test_expired_sweep_only_removes_strictly_past_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let principal = Uuid::new_v4();
        let mut expired = record(principal, now);
        expired.expires_at = now - Duration::seconds(1);
        let mut boundary = record(principal, now);
        boundary.expires_at = now;
        store.insert_refresh_token(&expired).await.unwrap();
        store.insert_refresh_token(&boundary).await.unwrap();

        assert_eq!(store.delete_expired_refresh_tokens(now).await.unwrap(), 1);
        assert_eq!(store.delete_expired_refresh_tokens(now).await.unwrap(), 0);
        assert!(store.find_refresh_token(boundary.token_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_backup_code_consumed_once() {
        let store = InMemoryStore::new();
        let mut principal =
            Principal::new(Uuid::new_v4(), None, "a@example.com".to_string(), Utc::now());
        principal.backup_codes = vec!["h1".to_string(), "h2".to_string()];
        store.insert_principal(&principal).await.unwrap();

        assert!(store.consume_backup_code(principal.id, "h1").await.unwrap());
        assert!(!store.consume_backup_code(principal.id, "h1").await.unwrap());
        let stored = store.find_principal(principal.id).await.unwrap().unwrap();
        assert_eq!(stored.backup_codes, vec!["h2".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_email_in_tenant_rejected() {
        let store = InMemoryStore::new();
        let tenant = Some(Uuid::new_v4());
        let now = Utc::now();
        let a = Principal::new(Uuid::new_v4(), tenant, "dup@example.com".to_string(), now);
        let b = Principal::new(Uuid::new_v4(), tenant, "DUP@example.com".to_string(), now);
        store.insert_principal(&a).await.unwrap();
        assert!(matches!(
            store.insert_principal(&b).await,
            Err(RepositoryError::Duplicate(_))
        ));
    }
}
