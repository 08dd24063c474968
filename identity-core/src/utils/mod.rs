pub mod fingerprint;
pub mod password;

pub use fingerprint::device_fingerprint;
pub use password::{
    hash_password, verify_password, Argon2Verifier, Password, PasswordHashString,
    PasswordVerifier,
};
