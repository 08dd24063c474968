//! Security audit trail, kept apart from ordinary auth logging.
//!
//! Records events such as:
//! - Refresh token reuse
//! - Cross-tenant elevation and cross-tenant denials
//! - MFA throttle trips
//! - Session-limit evictions and suspicious sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::services::clock::{Clock, IdGenerator};

/// Tracing target for audit entries.
pub const AUDIT_TARGET: &str = "security_audit";

/// Security audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// A revoked refresh token was presented again
    TokenReuse,
    /// Cross-tenant role used to reach another tenant's data
    CrossTenantElevation,
    /// Attempted access to resource in a different tenant
    CrossTenantAccess,
    /// Too many failed MFA attempts
    MfaAttemptsExceeded,
    /// Oldest session revoked to stay under the concurrency limit
    SessionLimitEviction,
    /// Session observed from an unexpected IP or after long inactivity
    SuspiciousSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Security audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAuditLog {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub principal_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    /// Additional context about the event
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Where audit entries end up.
pub trait SecurityAuditSink: Send + Sync {
    fn record(&self, log: SecurityAuditLog);
}

/// Emits each entry as a structured `warn` event on [`AUDIT_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl SecurityAuditSink for TracingAuditSink {
    fn record(&self, log: SecurityAuditLog) {
        tracing::warn!(
            target: AUDIT_TARGET,
            audit_id = %log.id,
            event_type = ?log.event_type,
            severity = log.severity.as_str(),
            principal_id = ?log.principal_id,
            tenant_id = ?log.tenant_id,
            details = %log.details,
            "Security event"
        );
    }
}

/// Keeps entries in memory; used by tests to assert on the audit trail.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<SecurityAuditLog>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<SecurityAuditLog> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, event_type: SecurityEventType) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|log| log.event_type == event_type)
            .count()
    }
}

impl SecurityAuditSink for RecordingAuditSink {
    fn record(&self, log: SecurityAuditLog) {
        TracingAuditSink.record(log.clone());
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(log);
    }
}

/// Security audit service for logging security events.
#[derive(Clone)]
pub struct SecurityAuditService {
    sink: Arc<dyn SecurityAuditSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl SecurityAuditService {
    pub fn new(
        sink: Arc<dyn SecurityAuditSink>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { sink, clock, ids }
    }

    pub fn log(
        &self,
        event_type: SecurityEventType,
        severity: Severity,
        principal_id: Option<Uuid>,
        tenant_id: Option<Uuid>,
        details: impl Into<String>,
    ) {
        self.sink.record(SecurityAuditLog {
            id: self.ids.next_id(),
            event_type,
            severity,
            principal_id,
            tenant_id,
            details: details.into(),
            created_at: self.clock.now(),
        });
    }

    pub fn token_reuse(&self, principal_id: Uuid, token_id: Uuid) {
        self.log(
            SecurityEventType::TokenReuse,
            Severity::Critical,
            Some(principal_id),
            None,
            format!("Revoked refresh token {} presented again", token_id),
        );
    }

    pub fn cross_tenant_elevation(&self, principal_id: Uuid, target_tenant: Uuid, role: &str) {
        self.log(
            SecurityEventType::CrossTenantElevation,
            Severity::Warning,
            Some(principal_id),
            Some(target_tenant),
            format!("Cross-tenant access to {} granted via role '{}'", target_tenant, role),
        );
    }

    pub fn cross_tenant_denied(
        &self,
        principal_id: Uuid,
        principal_tenant: Option<Uuid>,
        target_tenant: Uuid,
        reason: &str,
    ) {
        let from = principal_tenant
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string());
        self.log(
            SecurityEventType::CrossTenantAccess,
            Severity::Critical,
            Some(principal_id),
            Some(target_tenant),
            format!(
                "Attempted access to tenant {} from tenant {}: {}",
                target_tenant, from, reason
            ),
        );
    }

    pub fn mfa_attempts_exceeded(&self, principal_id: Uuid, attempts: u64) {
        self.log(
            SecurityEventType::MfaAttemptsExceeded,
            Severity::Warning,
            Some(principal_id),
            None,
            format!("{} failed MFA attempts in the current window", attempts),
        );
    }

    pub fn session_evicted(&self, principal_id: Uuid, session_id: Uuid) {
        self.log(
            SecurityEventType::SessionLimitEviction,
            Severity::Info,
            Some(principal_id),
            None,
            format!("Session {} revoked: session limit exceeded", session_id),
        );
    }

    pub fn suspicious_session(&self, principal_id: Uuid, session_id: Uuid, details: &str) {
        self.log(
            SecurityEventType::SuspiciousSession,
            Severity::Warning,
            Some(principal_id),
            None,
            format!("Session {}: {}", session_id, details),
        );
    }
}
