//! Refresh token rotation with reuse detection.
//!
//! Every refresh token has one stored record. Using a token revokes its record
//! and links it to a freshly issued successor, so each family forms a chain
//! with at most one live tail. Presenting a revoked token again is reported
//! as `TokenReuseDetected`.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::models::{DeviceInfo, Principal, RefreshTokenRecord};
use crate::repository::Store;
use crate::services::clock::{Clock, IdGenerator};
use crate::services::error::AuthError;
use crate::services::security_audit::SecurityAuditService;
use crate::services::token::{self, RefreshTokenClaims, SignedToken, TokenService};

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on links followed when walking a chain.
const MAX_CHAIN_LENGTH: usize = 1024;

/// A stored refresh token record together with the raw token handed out.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub record: RefreshTokenRecord,
    pub token: SignedToken,
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub record: RefreshTokenRecord,
    pub token: SignedToken,
    pub old_token_id: Uuid,
}

#[derive(Clone)]
pub struct RefreshTokenEngine {
    store: Arc<dyn Store>,
    tokens: TokenService,
    hash_secret: SecretString,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    audit: SecurityAuditService,
}

impl RefreshTokenEngine {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenService,
        hash_secret: SecretString,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        audit: SecurityAuditService,
    ) -> Self {
        Self {
            store,
            tokens,
            hash_secret,
            clock,
            ids,
            audit,
        }
    }

    /// Keyed hash of the token's `header.payload`, hex encoded.
    pub fn hash_token(&self, raw_token: &str) -> Result<String, AuthError> {
        let input = token::signing_input(raw_token).ok_or(AuthError::InvalidRefreshToken)?;
        let mut mac = HmacSha256::new_from_slice(self.hash_secret.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid refresh hash key: {}", e))?;
        mac.update(input.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn hash_matches(&self, raw_token: &str, stored: &str) -> Result<bool, AuthError> {
        let presented = self.hash_token(raw_token)?;
        Ok(presented.as_bytes().ct_eq(stored.as_bytes()).into())
    }

    /// Issue and persist a new refresh token for the principal.
    pub async fn create(
        &self,
        principal: &Principal,
        device_info: Option<DeviceInfo>,
    ) -> Result<IssuedRefreshToken, AuthError> {
        let token_id = self.ids.next_id();
        let signed = self.tokens.issue_refresh_token(principal.id, token_id)?;
        let record = RefreshTokenRecord::new(
            token_id,
            principal.id,
            self.hash_token(&signed.token)?,
            signed.issued_at,
            signed.expires_at,
            device_info,
        );

        self.store.insert_refresh_token(&record).await?;

        tracing::info!(principal_id = %principal.id, token_id = %token_id, "Refresh token issued");

        Ok(IssuedRefreshToken {
            record,
            token: signed,
        })
    }

    /// Check a presented token and return its principal.
    pub async fn validate(&self, raw_token: &str) -> Result<Principal, AuthError> {
        let (_, principal) = self.validate_record(raw_token).await?;
        Ok(principal)
    }

    async fn validate_record(
        &self,
        raw_token: &str,
    ) -> Result<(RefreshTokenRecord, Principal), AuthError> {
        let claims = self.tokens.verify_refresh_token(raw_token).map_err(|_| {
            tracing::warn!("Refresh token failed verification");
            AuthError::InvalidRefreshToken
        })?;

        let record = match self.store.find_refresh_token(claims.jti).await? {
            Some(record) if record.principal_id == claims.sub => record,
            _ => {
                tracing::warn!(token_id = %claims.jti, "Refresh token record not found");
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        if !self.hash_matches(raw_token, &record.token_hash)? {
            tracing::warn!(token_id = %record.token_id, "Refresh token hash mismatch");
            return Err(AuthError::InvalidRefreshToken);
        }

        if record.revoked {
            tracing::warn!(
                principal_id = %record.principal_id,
                token_id = %record.token_id,
                "Revoked refresh token presented again"
            );
            self.audit.token_reuse(record.principal_id, record.token_id);
            return Err(AuthError::TokenReuseDetected);
        }

        if record.is_expired(self.clock.now()) {
            tracing::warn!(token_id = %record.token_id, "Refresh token record expired");
            return Err(AuthError::InvalidRefreshToken);
        }

        let principal = self
            .store
            .find_principal(record.principal_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if !principal.is_active() {
            tracing::warn!(principal_id = %principal.id, "Refresh for inactive principal");
            return Err(AuthError::AccountNotActive);
        }

        Ok((record, principal))
    }

    /// Revoke the presented token and issue its successor. Two concurrent
    /// rotations of one token cannot both succeed: the loser gets
    /// `TokenReuseDetected`.
    pub async fn rotate(
        &self,
        raw_token: &str,
        principal: &Principal,
        device_info: Option<DeviceInfo>,
    ) -> Result<Rotation, AuthError> {
        let (old, _) = self.validate_record(raw_token).await?;
        if old.principal_id != principal.id {
            tracing::warn!(token_id = %old.token_id, "Refresh token presented for another principal");
            return Err(AuthError::InvalidRefreshToken);
        }

        let token_id = self.ids.next_id();
        let signed = self.tokens.issue_refresh_token(principal.id, token_id)?;
        let record = RefreshTokenRecord::new(
            token_id,
            principal.id,
            self.hash_token(&signed.token)?,
            signed.issued_at,
            signed.expires_at,
            device_info.or_else(|| old.device_info.clone()),
        )
        .replacing(old.token_id);

        if !self.store.rotate_refresh_token(old.token_id, &record).await? {
            tracing::warn!(
                principal_id = %principal.id,
                token_id = %old.token_id,
                "Concurrent rotation lost the race"
            );
            self.audit.token_reuse(principal.id, old.token_id);
            return Err(AuthError::TokenReuseDetected);
        }

        tracing::info!(
            principal_id = %principal.id,
            old_token_id = %old.token_id,
            token_id = %token_id,
            "Refresh token rotated"
        );

        Ok(Rotation {
            record,
            token: signed,
            old_token_id: old.token_id,
        })
    }

    pub async fn revoke(&self, token_id: Uuid) -> Result<bool, AuthError> {
        let revoked = self.store.revoke_refresh_token(token_id).await?;
        if revoked {
            tracing::info!(token_id = %token_id, "Refresh token revoked");
        }
        Ok(revoked)
    }

    pub async fn revoke_all(&self, principal_id: Uuid) -> Result<u64, AuthError> {
        let count = self.store.revoke_all_refresh_tokens(principal_id).await?;
        tracing::info!(principal_id = %principal_id, count, "Refresh tokens revoked");
        Ok(count)
    }

    /// True when the token is one we issued whose record is already revoked.
    pub async fn detect_reuse(&self, raw_token: &str) -> Result<bool, AuthError> {
        let Some(claims) = self.tokens.decode_unsafe::<RefreshTokenClaims>(raw_token) else {
            return Ok(false);
        };
        match self.store.find_refresh_token(claims.jti).await? {
            Some(record) if record.revoked => self.hash_matches(raw_token, &record.token_hash),
            _ => Ok(false),
        }
    }

    /// Records of the chain containing `token_id`, oldest first.
    pub async fn chain(&self, token_id: Uuid) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let Some(start) = self.store.find_refresh_token(token_id).await? else {
            return Ok(Vec::new());
        };

        let mut backwards = Vec::new();
        let mut cursor = start.replaces_token_id;
        while let Some(id) = cursor {
            if backwards.len() >= MAX_CHAIN_LENGTH {
                break;
            }
            match self.store.find_refresh_token(id).await? {
                Some(record) => {
                    cursor = record.replaces_token_id;
                    backwards.push(record);
                }
                None => break,
            }
        }
        backwards.reverse();

        let mut cursor = start.replaced_by_token_id;
        backwards.push(start);
        let mut forward = 0;
        while let Some(id) = cursor {
            if forward >= MAX_CHAIN_LENGTH {
                break;
            }
            match self.store.find_refresh_token(id).await? {
                Some(record) => {
                    cursor = record.replaced_by_token_id;
                    backwards.push(record);
                    forward += 1;
                }
                None => break,
            }
        }

        Ok(backwards)
    }

    pub async fn list_for_principal(
        &self,
        principal_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        Ok(self
            .store
            .list_refresh_tokens_for_principal(principal_id)
            .await?)
    }

    /// Delete records whose expiry is strictly in the past.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let deleted = self
            .store
            .delete_expired_refresh_tokens(self.clock.now())
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, "Expired refresh tokens swept");
        }
        Ok(deleted)
    }
}
