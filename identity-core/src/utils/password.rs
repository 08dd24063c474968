use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString,
    },
    Argon2,
};
use std::fmt;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a password using Argon2
///
/// Uses Argon2id variant with secure default parameters.
/// Salt is automatically generated and included in the hash.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a hash using constant-time comparison
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

/// Credential check used by login.
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, stored_hash: &str, candidate: &Password) -> bool;

    /// Spend the same effort as a real check when there is no stored hash,
    /// so response time does not reveal whether an account exists.
    fn verify_dummy(&self, _candidate: &Password) {}
}

/// Argon2id verifier.
#[derive(Debug, Clone)]
pub struct Argon2Verifier {
    dummy_hash: PasswordHashString,
}

impl Argon2Verifier {
    pub fn new() -> Result<Self, anyhow::Error> {
        let dummy_hash = hash_password(&Password::new("identity-core-dummy-credential"))?;
        Ok(Self { dummy_hash })
    }
}

impl PasswordVerifier for Argon2Verifier {
    fn verify(&self, stored_hash: &str, candidate: &Password) -> bool {
        verify_password(candidate, &PasswordHashString::new(stored_hash.to_string())).is_ok()
    }

    fn verify_dummy(&self, candidate: &Password) {
        let _ = verify_password(candidate, &self.dummy_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let password = Password::new("mySecurePassword123");
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(hash.as_str().starts_with("$argon2"));
    }

    #[test]
    fn test_verify_password_correct_and_incorrect() {
        let password = Password::new("mySecurePassword123");
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(verify_password(&password, &hash).is_ok());
        assert!(verify_password(&Password::new("wrongPassword"), &hash).is_err());
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let password = Password::new("mySecurePassword123");
        let hash1 = hash_password(&password).expect("Failed to hash password");
        let hash2 = hash_password(&password).expect("Failed to hash password");

        // Random salt per hash
        assert_ne!(hash1.as_str(), hash2.as_str());
    }

    #[test]
    fn test_argon2_verifier() {
        let verifier = Argon2Verifier::new().unwrap();
        let hash = hash_password(&Password::new("correct horse")).unwrap();

        assert!(verifier.verify(hash.as_str(), &Password::new("correct horse")));
        assert!(!verifier.verify(hash.as_str(), &Password::new("battery staple")));
        assert!(!verifier.verify("not-a-phc-string", &Password::new("correct horse")));
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2");
        assert_eq!(format!("{:?}", password), "Password(***)");
    }
}
