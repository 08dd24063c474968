use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::Principal;
use crate::services::clock::{Clock, IdGenerator};
use crate::services::error::AuthError;

/// Token audiences. Each one is signed with its own secret, so a refresh token
/// can never pass as an access token or the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Users,
    Refresh,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Users => "users",
            Audience::Refresh => "refresh",
        }
    }
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (principal ID)
    pub sub: Uuid,
    pub email: String,
    pub tenant_id: Option<Uuid>,
    /// Name of the principal's highest role at issue time
    pub role: Option<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Subject (principal ID)
    pub sub: Uuid,
    /// Token ID (matches the stored refresh token record)
    pub jti: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carrying an expiry, checked against the injected clock.
pub trait ExpiringClaims {
    fn expires_at(&self) -> i64;
}

impl ExpiringClaims for AccessTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl ExpiringClaims for RefreshTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Deserialize)]
struct ExpiryOnly {
    exp: i64,
}

/// What goes into an access token besides the registered claims.
#[derive(Debug, Clone)]
pub struct AccessSubject {
    pub principal_id: Uuid,
    pub email: String,
    pub tenant_id: Option<Uuid>,
    pub role: Option<String>,
}

impl AccessSubject {
    pub fn from_principal(principal: &Principal, role: Option<String>) -> Self {
        Self {
            principal_id: principal.id,
            email: principal.email.clone(),
            tenant_id: principal.tenant_id,
            role,
        }
    }
}

/// A freshly signed token with the times it was signed with.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

/// Token pair returned to the client
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
    pub token_type: String,
    /// Access token lifetime in seconds, as used when signing
    pub expires_in: i64,
}

impl TokenPair {
    pub fn new(access: SignedToken, refresh: SignedToken, refresh_token_id: Uuid) -> Self {
        Self {
            access_token: access.token,
            refresh_token: refresh.token,
            refresh_token_id,
            token_type: "Bearer".to_string(),
            expires_in: access.ttl_seconds,
        }
    }
}

/// Issues and verifies HS256 tokens for the `users` and `refresh` audiences.
#[derive(Clone)]
pub struct TokenService {
    issuer: String,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TokenService {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        let access_secret = config.access_secret.expose_secret().as_bytes();
        let refresh_secret = config.refresh_secret.expose_secret().as_bytes();

        tracing::info!(issuer = %config.issuer, "Token service initialized with HS256 keys");

        Self {
            issuer: config.issuer.clone(),
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_ttl: Duration::seconds(config.access_token_ttl_seconds),
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
            clock,
            ids,
        }
    }

    /// Sign an access token for the `users` audience.
    pub fn issue_access_token(&self, subject: &AccessSubject) -> Result<SignedToken, AuthError> {
        let now = self.clock.now();
        let exp = now + self.access_ttl;

        let claims = AccessTokenClaims {
            sub: subject.principal_id,
            email: subject.email.clone(),
            tenant_id: subject.tenant_id,
            role: subject.role.clone(),
            iss: self.issuer.clone(),
            aud: Audience::Users.as_str().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: self.ids.next_id(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(SignedToken {
            token,
            issued_at: now,
            expires_at: exp,
            ttl_seconds: self.access_ttl.num_seconds(),
        })
    }

    /// Sign a refresh token carrying only the subject and its record id.
    pub fn issue_refresh_token(
        &self,
        principal_id: Uuid,
        token_id: Uuid,
    ) -> Result<SignedToken, AuthError> {
        let now = self.clock.now();
        let exp = now + self.refresh_ttl;

        let claims = RefreshTokenClaims {
            sub: principal_id,
            jti: token_id,
            iss: self.issuer.clone(),
            aud: Audience::Refresh.as_str().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))?;

        Ok(SignedToken {
            token,
            issued_at: now,
            expires_at: exp,
            ttl_seconds: self.refresh_ttl.num_seconds(),
        })
    }

    /// Verify signature, issuer, audience and expiry. Any failure is
    /// `InvalidToken`; partial claims are never returned.
    pub fn verify<C>(&self, token: &str, audience: Audience) -> Result<C, AuthError>
    where
        C: DeserializeOwned + ExpiringClaims,
    {
        if !validate_token_format(token) {
            tracing::debug!("Rejected structurally malformed token");
            return Err(AuthError::InvalidToken);
        }

        let key = match audience {
            Audience::Users => &self.access_decoding,
            Audience::Refresh => &self.refresh_decoding,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;

        let claims = decode::<C>(token, key, &validation)
            .map_err(|e| {
                tracing::debug!(audience = audience.as_str(), "Token verification failed: {}", e);
                AuthError::InvalidToken
            })?
            .claims;

        if self.clock.now().timestamp() >= claims.expires_at() {
            tracing::debug!(audience = audience.as_str(), "Token expired");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        self.verify(token, Audience::Users)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, AuthError> {
        self.verify(token, Audience::Refresh)
    }

    /// Decode claims without checking signature, audience or expiry. Only for
    /// inspection (logging, routing a refresh to its record); never trust the
    /// result for authorization.
    pub fn decode_unsafe<C: DeserializeOwned>(&self, token: &str) -> Option<C> {
        if !validate_token_format(token) {
            return None;
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<C>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// True when the token's `exp` has passed, or when it cannot be decoded.
    pub fn is_expired(&self, token: &str) -> bool {
        match self.decode_unsafe::<ExpiryOnly>(token) {
            Some(claims) => self.clock.now().timestamp() >= claims.exp,
            None => true,
        }
    }

    /// Expiry of a token as a timestamp, if it decodes.
    pub fn expires_at(&self, token: &str) -> Option<DateTime<Utc>> {
        self.decode_unsafe::<ExpiryOnly>(token)
            .and_then(|claims| Utc.timestamp_opt(claims.exp, 0).single())
    }
}

/// Cheap structural pre-check: three non-empty base64url segments.
pub fn validate_token_format(token: &str) -> bool {
    let mut segments = 0;
    for segment in token.split('.') {
        segments += 1;
        if segments > 3
            || segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return false;
        }
    }
    segments == 3
}

/// The signed portion of a token (`header.payload`), without the signature.
pub fn signing_input(token: &str) -> Option<&str> {
    if !validate_token_format(token) {
        return None;
    }
    token.rsplit_once('.').map(|(input, _)| input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::{ManualClock, UuidV4Generator};

    fn service() -> (TokenService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = JwtConfig::with_secrets("access-secret", "refresh-secret", "hash-secret");
        let svc = TokenService::new(&config, clock.clone(), Arc::new(UuidV4Generator));
        (svc, clock)
    }

    fn subject() -> AccessSubject {
        AccessSubject {
            principal_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            tenant_id: Some(Uuid::new_v4()),
            role: Some("Member".to_string()),
        }
    }

    #[test]
    fn test_access_token_round_trip() {
        let (svc, _) = service();
        let subject = subject();
        let signed = svc.issue_access_token(&subject).unwrap();

        let claims = svc.verify_access_token(&signed.token).unwrap();
        assert_eq!(claims.sub, subject.principal_id);
        assert_eq!(claims.tenant_id, subject.tenant_id);
        assert_eq!(claims.role.as_deref(), Some("Member"));
        assert_eq!(claims.aud, "users");
        assert_eq!(signed.ttl_seconds, 900);
    }

    #[test]
    fn test_audiences_do_not_cross() {
        let (svc, _) = service();
        let principal = Uuid::new_v4();
        let refresh = svc.issue_refresh_token(principal, Uuid::new_v4()).unwrap();
        let access = svc.issue_access_token(&subject()).unwrap();

        assert!(matches!(
            svc.verify::<RefreshTokenClaims>(&refresh.token, Audience::Users),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            svc.verify::<AccessTokenClaims>(&access.token, Audience::Refresh),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expiry_follows_injected_clock() {
        let (svc, clock) = service();
        let signed = svc.issue_access_token(&subject()).unwrap();
        assert!(!svc.is_expired(&signed.token));

        clock.advance(Duration::seconds(899));
        assert!(svc.verify_access_token(&signed.token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(svc.is_expired(&signed.token));
        assert!(matches!(
            svc.verify_access_token(&signed.token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (svc, _) = service();
        let signed = svc.issue_access_token(&subject()).unwrap();
        let (input, signature) = signed.token.rsplit_once('.').unwrap();
        let first = signature.chars().next().unwrap();
        let replacement = if first == 'x' { 'y' } else { 'x' };
        let tampered = format!("{}.{}{}", input, replacement, &signature[1..]);

        assert!(svc.verify_access_token(&tampered).is_err());
        // Unsafe decode still reads the claims.
        let claims: Option<AccessTokenClaims> = svc.decode_unsafe(&tampered);
        assert!(claims.is_some());
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let (svc, clock) = service();
        let other_config = JwtConfig::with_secrets("other-access", "other-refresh", "hash");
        let other = TokenService::new(&other_config, clock, Arc::new(UuidV4Generator));
        let signed = other.issue_access_token(&subject()).unwrap();
        assert!(svc.verify_access_token(&signed.token).is_err());
    }

    #[test]
    fn test_validate_token_format() {
        assert!(validate_token_format("aaa.bbb.ccc"));
        assert!(!validate_token_format("aaa.bbb"));
        assert!(!validate_token_format("aaa..ccc"));
        assert!(!validate_token_format("aaa.bbb.ccc.ddd"));
        assert!(!validate_token_format("aa a.bbb.ccc"));
        assert!(!validate_token_format(""));
    }

    #[test]
    fn test_signing_input_strips_signature() {
        assert_eq!(signing_input("head.body.sig"), Some("head.body"));
        assert_eq!(signing_input("not-a-token"), None);
    }

    #[test]
    fn test_malformed_token_is_expired_and_undecodable() {
        let (svc, _) = service();
        assert!(svc.is_expired("garbage"));
        assert!(svc.decode_unsafe::<AccessTokenClaims>("a.b.c").is_none());
    }
}
