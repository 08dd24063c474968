//! TOTP and backup-code verification with attempt throttling.

use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::config::MfaConfig;
use crate::models::Principal;
use crate::repository::Store;
use crate::services::attempts::AttemptCounter;
use crate::services::clock::Clock;
use crate::services::error::AuthError;
use crate::services::security_audit::SecurityAuditService;

const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const BACKUP_CODE_LEN: usize = 8;
const BACKUP_CODE_GROUP_SIZE: usize = 4;

/// Secret and provisioning URL shown to the user while enrolling.
#[derive(Debug, Clone, Serialize)]
pub struct MfaEnrollment {
    /// Base32 secret for manual entry
    pub secret: String,
    pub otpauth_url: String,
}

/// Plaintext backup codes, shown once.
#[derive(Debug, Clone, Serialize)]
pub struct BackupCodes {
    pub codes: Vec<String>,
}

#[derive(Clone)]
pub struct MfaGate {
    store: Arc<dyn Store>,
    attempts: Arc<dyn AttemptCounter>,
    config: MfaConfig,
    clock: Arc<dyn Clock>,
    audit: SecurityAuditService,
}

impl MfaGate {
    pub fn new(
        store: Arc<dyn Store>,
        attempts: Arc<dyn AttemptCounter>,
        config: MfaConfig,
        clock: Arc<dyn Clock>,
        audit: SecurityAuditService,
    ) -> Self {
        Self {
            store,
            attempts,
            config,
            clock,
            audit,
        }
    }

    fn totp(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP, AuthError> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            self.config.window,
            self.config.time_step_seconds,
            secret_bytes,
            Some(self.config.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP init error: {e}")))
    }

    /// Fresh random base32 secret.
    pub fn generate_secret(&self) -> Result<String, AuthError> {
        match Secret::generate_secret().to_encoded() {
            Secret::Encoded(secret) => Ok(secret),
            Secret::Raw(_) => Err(AuthError::Internal(anyhow::anyhow!(
                "Secret encoding failed"
            ))),
        }
    }

    /// New secret plus the otpauth URL for an authenticator app. Nothing is
    /// stored until [`MfaGate::enable_mfa`] confirms a code.
    pub fn begin_enrollment(&self, principal: &Principal) -> Result<MfaEnrollment, AuthError> {
        let secret = self.generate_secret()?;
        let bytes = decode_secret(&secret)?;
        let otpauth_url = self.totp(bytes, &principal.email)?.get_url();
        Ok(MfaEnrollment {
            secret,
            otpauth_url,
        })
    }

    /// Check a TOTP code, accepting the neighbouring time steps within the
    /// configured window.
    pub fn verify(&self, secret: &str, code: &str) -> bool {
        let code = code.trim();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let totp = match decode_secret(secret).and_then(|bytes| self.totp(bytes, "verify")) {
            Ok(totp) => totp,
            Err(e) => {
                tracing::warn!("Unusable TOTP secret: {}", e);
                return false;
            }
        };
        let now = self.clock.now().timestamp().max(0) as u64;
        totp.check(code, now)
    }

    /// Login-time check: TOTP first, then single-use backup codes. Failures
    /// count toward the throttle; a success resets it.
    pub async fn verify_for_login(
        &self,
        principal: &Principal,
        code: &str,
    ) -> Result<bool, AuthError> {
        if self.has_exceeded_attempts(principal.id).await? {
            tracing::warn!(principal_id = %principal.id, "MFA attempts exceeded");
            return Err(AuthError::MfaAttemptsExceeded);
        }

        let totp_ok = principal
            .mfa_secret
            .as_deref()
            .map(|secret| self.verify(secret, code))
            .unwrap_or(false);

        let ok = totp_ok || self.consume_backup_code(principal.id, code).await?;

        if ok {
            self.reset_attempts(principal.id).await?;
            tracing::info!(principal_id = %principal.id, backup_code = !totp_ok, "MFA verified");
            return Ok(true);
        }

        let failures = self
            .attempts
            .record_failure(&principal.id.to_string())
            .await?;
        tracing::warn!(principal_id = %principal.id, failures, "MFA verification failed");
        if failures >= u64::from(self.config.max_attempts) {
            self.audit.mfa_attempts_exceeded(principal.id, failures);
        }
        Ok(false)
    }

    async fn consume_backup_code(&self, principal_id: Uuid, code: &str) -> Result<bool, AuthError> {
        let Some(normalized) = normalize_backup_code(code) else {
            return Ok(false);
        };
        Ok(self
            .store
            .consume_backup_code(principal_id, &hash_backup_code(&normalized))
            .await?)
    }

    pub async fn has_exceeded_attempts(&self, principal_id: Uuid) -> Result<bool, AuthError> {
        let count = self.attempts.count(&principal_id.to_string()).await?;
        Ok(count >= u64::from(self.config.max_attempts))
    }

    pub async fn reset_attempts(&self, principal_id: Uuid) -> Result<(), AuthError> {
        self.attempts.reset(&principal_id.to_string()).await?;
        Ok(())
    }

    /// Confirm enrollment with a first valid code. Stores the secret and
    /// returns a fresh backup-code set.
    pub async fn enable_mfa(
        &self,
        principal_id: Uuid,
        secret: &str,
        code: &str,
    ) -> Result<BackupCodes, AuthError> {
        let mut principal = self.principal(principal_id).await?;
        if !self.verify(secret, code) {
            return Err(AuthError::MfaInvalidCode);
        }

        let codes = self.generate_backup_codes();
        principal.mfa_enabled = true;
        principal.mfa_secret = Some(secret.to_string());
        principal.backup_codes = hash_all(&codes);
        self.store.update_principal(&principal).await?;
        self.reset_attempts(principal_id).await?;

        tracing::info!(principal_id = %principal_id, "MFA enabled");
        Ok(BackupCodes { codes })
    }

    pub async fn disable_mfa(&self, principal_id: Uuid) -> Result<(), AuthError> {
        let mut principal = self.principal(principal_id).await?;
        principal.mfa_enabled = false;
        principal.mfa_secret = None;
        principal.backup_codes.clear();
        self.store.update_principal(&principal).await?;
        tracing::info!(principal_id = %principal_id, "MFA disabled");
        Ok(())
    }

    /// Replace the whole backup-code set.
    pub async fn regenerate_backup_codes(
        &self,
        principal_id: Uuid,
    ) -> Result<BackupCodes, AuthError> {
        let mut principal = self.principal(principal_id).await?;
        if !principal.requires_mfa() {
            return Err(AuthError::Validation("MFA is not enabled".to_string()));
        }
        let codes = self.generate_backup_codes();
        principal.backup_codes = hash_all(&codes);
        self.store.update_principal(&principal).await?;
        tracing::info!(principal_id = %principal_id, "Backup codes regenerated");
        Ok(BackupCodes { codes })
    }

    async fn principal(&self, principal_id: Uuid) -> Result<Principal, AuthError> {
        self.store
            .find_principal(principal_id)
            .await?
            .ok_or(AuthError::PrincipalNotFound)
    }

    fn generate_backup_codes(&self) -> Vec<String> {
        let mut rng = OsRng;
        (0..self.config.backup_code_count)
            .map(|_| generate_backup_code(&mut rng))
            .collect()
    }
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, AuthError> {
    Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("Invalid TOTP secret: {e:?}")))
}

/// Uppercase and strip separators. `None` when it cannot be a backup code.
pub fn normalize_backup_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    let valid = normalized.len() == BACKUP_CODE_LEN
        && normalized
            .bytes()
            .all(|ch| BACKUP_CODE_ALPHABET.contains(&ch));
    valid.then_some(normalized)
}

/// Stored form of a normalized backup code.
pub fn hash_backup_code(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

fn hash_all(codes: &[String]) -> Vec<String> {
    codes
        .iter()
        .filter_map(|code| normalize_backup_code(code))
        .map(|normalized| hash_backup_code(&normalized))
        .collect()
}

fn generate_backup_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 1);
    for (idx, byte) in raw.iter().enumerate() {
        if idx > 0 && idx % BACKUP_CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        let ch = BACKUP_CODE_ALPHABET[usize::from(*byte) % BACKUP_CODE_ALPHABET.len()];
        out.push(char::from(ch));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrincipalStatus;
    use crate::repository::{InMemoryStore, PrincipalRepository};
    use crate::services::attempts::InMemoryAttemptCounter;
    use crate::services::clock::{ManualClock, UuidV4Generator};
    use crate::services::security_audit::{RecordingAuditSink, SecurityEventType};
    use chrono::Duration;

    struct Fixture {
        gate: MfaGate,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingAuditSink>,
        store: Arc<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let sink = Arc::new(RecordingAuditSink::new());
        let store = Arc::new(InMemoryStore::new());
        let config = MfaConfig::default();
        let attempts = Arc::new(InMemoryAttemptCounter::new(
            config.attempt_window_seconds,
            clock.clone(),
        ));
        let audit =
            SecurityAuditService::new(sink.clone(), clock.clone(), Arc::new(UuidV4Generator));
        let gate = MfaGate::new(store.clone(), attempts, config, clock.clone(), audit);
        Fixture {
            gate,
            clock,
            sink,
            store,
        }
    }

    fn code_at(gate: &MfaGate, secret: &str, at: chrono::DateTime<chrono::Utc>) -> String {
        gate.totp(decode_secret(secret).unwrap(), "test")
            .unwrap()
            .generate(at.timestamp() as u64)
    }

    async fn enrolled(f: &Fixture) -> (Principal, BackupCodes) {
        let principal = Principal::new(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            "mfa@example.com".to_string(),
            f.clock.now(),
        )
        .with_status(PrincipalStatus::Active);
        f.store.insert_principal(&principal).await.unwrap();

        let enrollment = f.gate.begin_enrollment(&principal).unwrap();
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        let code = code_at(&f.gate, &enrollment.secret, f.clock.now());
        let codes = f
            .gate
            .enable_mfa(principal.id, &enrollment.secret, &code)
            .await
            .unwrap();
        let principal = f.store.find_principal(principal.id).await.unwrap().unwrap();
        (principal, codes)
    }

    #[test]
    fn test_verify_accepts_adjacent_steps_only() {
        let f = fixture();
        let secret = f.gate.generate_secret().unwrap();
        let now = f.clock.now();

        assert!(f.gate.verify(&secret, &code_at(&f.gate, &secret, now)));
        assert!(f
            .gate
            .verify(&secret, &code_at(&f.gate, &secret, now - Duration::seconds(30))));
        assert!(f
            .gate
            .verify(&secret, &code_at(&f.gate, &secret, now + Duration::seconds(30))));
        assert!(!f
            .gate
            .verify(&secret, &code_at(&f.gate, &secret, now - Duration::seconds(120))));
        assert!(!f.gate.verify(&secret, "abcdef"));
        assert!(!f.gate.verify("not base32!", "123456"));
    }

    #[tokio::test]
    async fn test_enable_rejects_wrong_code() {
        let f = fixture();
        let principal = Principal::new(Uuid::new_v4(), None, "x@example.com".to_string(), f.clock.now());
        f.store.insert_principal(&principal).await.unwrap();
        let secret = f.gate.generate_secret().unwrap();
        let wrong = code_at(&f.gate, &secret, f.clock.now() - Duration::minutes(10));

        assert!(matches!(
            f.gate.enable_mfa(principal.id, &secret, &wrong).await,
            Err(AuthError::MfaInvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_backup_code_is_single_use() {
        let f = fixture();
        let (principal, codes) = enrolled(&f).await;
        assert_eq!(codes.codes.len(), 10);
        assert_eq!(principal.backup_codes.len(), 10);

        let code = codes.codes[0].to_lowercase();
        assert!(f.gate.verify_for_login(&principal, &code).await.unwrap());
        assert!(!f.gate.verify_for_login(&principal, &code).await.unwrap());

        let stored = f.store.find_principal(principal.id).await.unwrap().unwrap();
        assert_eq!(stored.backup_codes.len(), 9);
    }

    #[tokio::test]
    async fn test_throttle_blocks_until_window_elapses() {
        let f = fixture();
        let (principal, _) = enrolled(&f).await;

        for _ in 0..5 {
            f.gate
                .verify_for_login(&principal, "WRONG-CODE")
                .await
                .unwrap();
        }
        assert!(f.gate.has_exceeded_attempts(principal.id).await.unwrap());

        let secret = principal.mfa_secret.clone().unwrap();
        let good = code_at(&f.gate, &secret, f.clock.now());
        assert!(matches!(
            f.gate.verify_for_login(&principal, &good).await,
            Err(AuthError::MfaAttemptsExceeded)
        ));
        assert_eq!(f.sink.count(SecurityEventType::MfaAttemptsExceeded), 1);

        f.clock.advance(Duration::minutes(15));
        let good = code_at(&f.gate, &secret, f.clock.now());
        assert!(f.gate.verify_for_login(&principal, &good).await.unwrap());
    }

    #[tokio::test]
    async fn test_regenerate_replaces_set() {
        let f = fixture();
        let (principal, old) = enrolled(&f).await;
        let new = f.gate.regenerate_backup_codes(principal.id).await.unwrap();
        let principal = f.store.find_principal(principal.id).await.unwrap().unwrap();

        assert!(!f.gate.verify_for_login(&principal, &old.codes[0]).await.unwrap());
        assert!(f.gate.verify_for_login(&principal, &new.codes[0]).await.unwrap());
    }

    #[test]
    fn test_backup_code_format_and_normalization() {
        let code = generate_backup_code(&mut OsRng);
        assert_eq!(code.len(), 9);
        assert_eq!(code.as_bytes()[4], b'-');
        assert_eq!(
            normalize_backup_code(&code.to_lowercase()).unwrap(),
            code.replace('-', "")
        );
        assert!(normalize_backup_code("short").is_none());
        assert!(normalize_backup_code("0000-1111").is_none());
    }
}
