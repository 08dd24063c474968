use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device metadata captured when a refresh token is issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl DeviceInfo {
    pub fn new(user_agent: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            ip_address: Some(ip_address.into()),
        }
    }
}

/// One persisted record per issued refresh token. Records form a chain through
/// `replaces_token_id` / `replaced_by_token_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Unique identifier for the refresh token (jti claim)
    pub token_id: Uuid,

    pub principal_id: Uuid,

    /// Keyed hash of the token's header and payload segments
    pub token_hash: String,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    #[serde(default)]
    pub revoked: bool,

    /// Predecessor in the rotation chain
    pub replaces_token_id: Option<Uuid>,

    /// Successor in the rotation chain
    pub replaced_by_token_id: Option<Uuid>,

    pub device_info: Option<DeviceInfo>,
}

impl RefreshTokenRecord {
    pub fn new(
        token_id: Uuid,
        principal_id: Uuid,
        token_hash: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        device_info: Option<DeviceInfo>,
    ) -> Self {
        Self {
            token_id,
            principal_id,
            token_hash,
            issued_at,
            expires_at,
            revoked: false,
            replaces_token_id: None,
            replaced_by_token_id: None,
            device_info,
        }
    }

    /// Link this record as the successor of `previous`.
    pub fn replacing(mut self, previous: Uuid) -> Self {
        self.replaces_token_id = Some(previous);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Not expired and not revoked.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.revoked
    }
}
