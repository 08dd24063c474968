use sha2::{Digest, Sha256};

/// Device fingerprint: hex SHA-256 of `user_agent|ip_address`.
pub fn device_fingerprint(user_agent: &str, ip_address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(ip_address.as_bytes());
    hex::encode(hasher.finalize())
}
