//! Session model - one record per authenticated device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::device_fingerprint;

/// Session status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Suspicious,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Suspicious => "suspicious",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
        }
    }

    /// Expired and revoked sessions are kept for audit only.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Revoked)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "suspicious" => Ok(SessionStatus::Suspicious),
            "expired" => Ok(SessionStatus::Expired),
            "revoked" => Ok(SessionStatus::Revoked),
            other => Err(format!("Invalid session status: {}", other)),
        }
    }
}

/// Session entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub status: SessionStatus,
    pub is_trusted: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl Session {
    /// Still usable for requests: not terminal and not past `expires_at`.
    /// Suspicious sessions remain usable until someone revokes them.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at > now
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.expires_at > now
    }

    pub fn revoke(&mut self, now: DateTime<Utc>, reason: Option<String>) {
        self.status = SessionStatus::Revoked;
        self.revoked_at = Some(now);
        self.revoked_reason = reason;
    }
}

/// Input for [`crate::services::SessionRegistry::create`].
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub principal_id: Uuid,
    pub user_agent: String,
    pub ip_address: String,
    pub refresh_token_hash: Option<String>,
    pub remember_me: bool,
    pub is_trusted: bool,
}

impl CreateSession {
    pub fn new(
        principal_id: Uuid,
        user_agent: impl Into<String>,
        ip_address: impl Into<String>,
    ) -> Self {
        Self {
            principal_id,
            user_agent: user_agent.into(),
            ip_address: ip_address.into(),
            refresh_token_hash: None,
            remember_me: false,
            is_trusted: false,
        }
    }

    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }

    pub fn with_refresh_token_hash(mut self, hash: impl Into<String>) -> Self {
        self.refresh_token_hash = Some(hash.into());
        self
    }
}

/// Partial update for [`crate::services::SessionRegistry::update`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub is_trusted: Option<bool>,
    pub refresh_token_hash: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SessionPatch {
    /// Device changes recompute the fingerprint so dedup keeps matching.
    pub fn apply(self, session: &mut Session) {
        if let Some(trusted) = self.is_trusted {
            session.is_trusted = trusted;
        }
        if let Some(hash) = self.refresh_token_hash {
            session.refresh_token_hash = Some(hash);
        }
        let device_changed = self.ip_address.is_some() || self.user_agent.is_some();
        if let Some(ip) = self.ip_address {
            session.ip_address = ip;
        }
        if let Some(ua) = self.user_agent {
            session.user_agent = ua;
        }
        if device_changed {
            session.device_fingerprint = device_fingerprint(&session.user_agent, &session.ip_address);
        }
    }
}
