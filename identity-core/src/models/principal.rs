//! Principal model - an authenticatable account, soft-deleted via status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Principal status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    Pending,
    Active,
    Suspended,
    Deleted,
}

impl PrincipalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalStatus::Pending => "pending",
            PrincipalStatus::Active => "active",
            PrincipalStatus::Suspended => "suspended",
            PrincipalStatus::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for PrincipalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PrincipalStatus::Pending),
            "active" => Ok(PrincipalStatus::Active),
            "suspended" => Ok(PrincipalStatus::Suspended),
            "deleted" => Ok(PrincipalStatus::Deleted),
            other => Err(format!("Invalid principal status: {}", other)),
        }
    }
}

/// Principal entity. `tenant_id` is `None` only before provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub status: PrincipalStatus,
    pub mfa_enabled: bool,
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    /// SHA-256 digests of the unused backup codes.
    #[serde(skip_serializing)]
    pub backup_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Create a new principal in `pending` status.
    pub fn new(id: Uuid, tenant_id: Option<Uuid>, email: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            email,
            password_hash: None,
            status: PrincipalStatus::Pending,
            mfa_enabled: false,
            mfa_secret: None,
            backup_codes: Vec::new(),
            created_at: now,
        }
    }

    pub fn with_password_hash(mut self, hash: String) -> Self {
        self.password_hash = Some(hash);
        self
    }

    pub fn with_status(mut self, status: PrincipalStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == PrincipalStatus::Active
    }

    /// MFA is only enforced when a secret is actually stored.
    pub fn requires_mfa(&self) -> bool {
        self.mfa_enabled && self.mfa_secret.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_principal_is_pending() {
        let p = Principal::new(Uuid::new_v4(), None, "a@example.com".to_string(), Utc::now());
        assert_eq!(p.status, PrincipalStatus::Pending);
        assert!(!p.is_active());
        assert!(!p.requires_mfa());
    }

    #[test]
    fn test_status_round_trips_through_code() {
        for status in [
            PrincipalStatus::Pending,
            PrincipalStatus::Active,
            PrincipalStatus::Suspended,
            PrincipalStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<PrincipalStatus>(), Ok(status));
        }
        assert!("archived".parse::<PrincipalStatus>().is_err());
    }

    #[test]
    fn test_serialization_skips_secrets() {
        let mut p = Principal::new(Uuid::new_v4(), None, "a@example.com".to_string(), Utc::now())
            .with_password_hash("$argon2id$...".to_string());
        p.mfa_secret = Some("JBSWY3DPEHPK3PXP".to_string());
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("JBSWY3DP"));
    }
}
