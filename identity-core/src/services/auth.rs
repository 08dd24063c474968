//! Login, refresh, logout and request authentication.
//!
//! Wires the credential check, MFA gate, token service, rotation engine and
//! session registry into the flows a request layer calls.

use std::sync::Arc;
use uuid::Uuid;

use crate::models::{CreateSession, DeviceInfo, Principal, Session};
use crate::repository::Store;
use crate::services::authz::{AccessContext, AuthorizationPipeline, Authorizer};
use crate::services::error::AuthError;
use crate::services::mfa::MfaGate;
use crate::services::rbac::RbacResolver;
use crate::services::refresh::RefreshTokenEngine;
use crate::services::session::SessionRegistry;
use crate::services::token::{
    AccessSubject, AccessTokenClaims, SignedToken, TokenPair, TokenService,
};
use crate::utils::{Password, PasswordVerifier};

pub const LOGOUT_REASON: &str = "Logged out";

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub password: Password,
    pub mfa_code: Option<String>,
    pub user_agent: String,
    pub ip_address: String,
    pub remember_me: bool,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub tokens: TokenPair,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl RefreshRequest {
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            user_agent: None,
            ip_address: None,
        }
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        if self.user_agent.is_none() && self.ip_address.is_none() {
            return None;
        }
        Some(DeviceInfo {
            user_agent: self.user_agent.clone(),
            ip_address: self.ip_address.clone(),
        })
    }
}

/// A verified access token and the principal behind it.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub claims: AccessTokenClaims,
    pub context: AccessContext,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    passwords: Arc<dyn PasswordVerifier>,
    tokens: TokenService,
    refresh: RefreshTokenEngine,
    sessions: SessionRegistry,
    mfa: MfaGate,
    rbac: RbacResolver,
    authorizer: Authorizer,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        passwords: Arc<dyn PasswordVerifier>,
        tokens: TokenService,
        refresh: RefreshTokenEngine,
        sessions: SessionRegistry,
        mfa: MfaGate,
        rbac: RbacResolver,
        authorizer: Authorizer,
    ) -> Self {
        Self {
            store,
            passwords,
            tokens,
            refresh,
            sessions,
            mfa,
            rbac,
            authorizer,
        }
    }

    /// Every credential failure returns `InvalidCredentials`, and a missing
    /// account costs as much as a wrong password.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AuthError> {
        let principal = self
            .store
            .find_principal_by_email(req.tenant_id, &req.email)
            .await?;

        let principal = match principal {
            Some(p) => match p.password_hash.as_deref() {
                Some(hash) if self.passwords.verify(hash, &req.password) => p,
                Some(_) => {
                    tracing::warn!(principal_id = %p.id, "Login failed: wrong password");
                    return Err(AuthError::InvalidCredentials);
                }
                None => {
                    self.passwords.verify_dummy(&req.password);
                    tracing::warn!(principal_id = %p.id, "Login failed: no password set");
                    return Err(AuthError::InvalidCredentials);
                }
            },
            None => {
                self.passwords.verify_dummy(&req.password);
                tracing::warn!("Login failed: unknown account");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !principal.is_active() {
            tracing::warn!(
                principal_id = %principal.id,
                status = principal.status.as_str(),
                "Login refused: account not active"
            );
            return Err(AuthError::AccountNotActive);
        }

        if principal.requires_mfa() {
            let Some(code) = req.mfa_code.as_deref() else {
                return Err(AuthError::MfaRequired);
            };
            if !self.mfa.verify_for_login(&principal, code).await? {
                return Err(AuthError::MfaInvalidCode);
            }
        }

        let access = self.issue_access_token(&principal).await?;
        let issued = self
            .refresh
            .create(
                &principal,
                Some(DeviceInfo::new(&req.user_agent, &req.ip_address)),
            )
            .await?;

        let session = self
            .sessions
            .create(
                CreateSession::new(principal.id, req.user_agent, req.ip_address)
                    .remember_me(req.remember_me)
                    .with_refresh_token_hash(issued.record.token_hash.clone()),
            )
            .await?;

        tracing::info!(
            principal_id = %principal.id,
            session_id = %session.id,
            "Login succeeded"
        );

        Ok(LoginResponse {
            tokens: TokenPair::new(access, issued.token, issued.record.token_id),
            session,
        })
    }

    /// Rotate the refresh token and issue a new access token. A replayed
    /// token fails with `TokenReuseDetected`; its successor is not touched.
    /// A token whose session has ended is revoked and fails with
    /// `SessionNotActive`.
    pub async fn refresh(&self, req: RefreshRequest) -> Result<TokenPair, AuthError> {
        let raw = req.refresh_token.as_str();

        let claims = self
            .tokens
            .verify_refresh_token(raw)
            .map_err(|_| AuthError::InvalidRefreshToken)?;
        let old_hash = self.refresh.hash_token(raw)?;
        if let Err(err) = self.sessions.ensure_bound_session_usable(&old_hash).await {
            self.refresh.revoke(claims.jti).await?;
            return Err(err);
        }

        let principal = self.refresh.validate(raw).await?;
        let rotation = self
            .refresh
            .rotate(raw, &principal, req.device_info())
            .await?;

        self.sessions
            .rebind_refresh_token(&old_hash, &rotation.record.token_hash)
            .await?;

        let access = self.issue_access_token(&principal).await?;
        tracing::info!(principal_id = %principal.id, "Tokens refreshed");

        Ok(TokenPair::new(
            access,
            rotation.token,
            rotation.record.token_id,
        ))
    }

    /// End the session bound to this refresh token and revoke the token.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self
            .tokens
            .verify_refresh_token(refresh_token)
            .map_err(|_| AuthError::InvalidRefreshToken)?;

        let hash = self.refresh.hash_token(refresh_token)?;
        if let Some(session) = self.sessions.find_by_refresh_hash(&hash).await? {
            self.sessions.revoke(session.id, Some(LOGOUT_REASON)).await?;
        }
        self.refresh.revoke(claims.jti).await?;

        tracing::info!(principal_id = %claims.sub, token_id = %claims.jti, "Logged out");
        Ok(())
    }

    /// Revoke every refresh token and session of the principal.
    pub async fn logout_all(&self, principal_id: Uuid) -> Result<(), AuthError> {
        self.refresh.revoke_all(principal_id).await?;
        self.sessions
            .revoke_all(principal_id, Some(LOGOUT_REASON))
            .await?;
        Ok(())
    }

    /// Verify an access token and load its principal.
    pub async fn authenticate(&self, access_token: &str) -> Result<Authenticated, AuthError> {
        let claims = self.tokens.verify_access_token(access_token)?;
        let principal = self
            .store
            .find_principal(claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if !principal.is_active() {
            return Err(AuthError::AccountNotActive);
        }

        Ok(Authenticated {
            claims,
            context: AccessContext::new(principal),
        })
    }

    /// Authenticate, then run the pipeline for the caller.
    pub async fn authorize(
        &self,
        access_token: &str,
        pipeline: &AuthorizationPipeline,
    ) -> Result<Authenticated, AuthError> {
        let authenticated = self.authenticate(access_token).await?;
        self.authorizer
            .evaluate(pipeline, &authenticated.context)
            .await?;
        Ok(authenticated)
    }

    async fn issue_access_token(&self, principal: &Principal) -> Result<SignedToken, AuthError> {
        let role = self
            .rbac
            .get_highest_role(principal.id)
            .await?
            .map(|r| r.name);
        self.tokens
            .issue_access_token(&AccessSubject::from_principal(principal, role))
    }
}
