//! Periodic cleanup: expired refresh-token records and expired sessions.
//!
//! Both sweeps are idempotent and only touch rows already past their expiry,
//! so they can overlap with live traffic and with each other.

use std::future::Future;
use std::time::Duration;

use crate::services::error::AuthError;
use crate::services::refresh::RefreshTokenEngine;
use crate::services::session::SessionRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refresh_tokens_deleted: u64,
    pub sessions_expired: u64,
}

#[derive(Clone)]
pub struct MaintenanceRunner {
    refresh: RefreshTokenEngine,
    sessions: SessionRegistry,
    interval: Duration,
}

impl MaintenanceRunner {
    pub fn new(refresh: RefreshTokenEngine, sessions: SessionRegistry, interval: Duration) -> Self {
        Self {
            refresh,
            sessions,
            interval,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport, AuthError> {
        let report = SweepReport {
            refresh_tokens_deleted: self.refresh.sweep_expired().await?,
            sessions_expired: self.sessions.sweep_expired().await?,
        };
        tracing::debug!(
            refresh_tokens_deleted = report.refresh_tokens_deleted,
            sessions_expired = report.sessions_expired,
            "Maintenance sweep finished"
        );
        Ok(report)
    }

    /// Sweep on every tick until `shutdown` resolves. A failed sweep is
    /// logged and retried on the next tick.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = self.interval.as_secs(), "Maintenance loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Maintenance sweep failed");
                    }
                }
            }
        }
        tracing::info!("Maintenance loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JwtConfig, SessionConfig};
    use crate::models::{CreateSession, Principal, PrincipalStatus, SessionStatus};
    use crate::repository::{InMemoryStore, PrincipalRepository, RefreshTokenRepository};
    use crate::services::clock::{Clock, ManualClock, UuidV4Generator};
    use crate::services::security_audit::{RecordingAuditSink, SecurityAuditService};
    use crate::services::token::TokenService;
    use secrecy::SecretString;
    use std::sync::Arc;

    struct Fixture {
        runner: MaintenanceRunner,
        refresh: RefreshTokenEngine,
        sessions: SessionRegistry,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let ids = Arc::new(UuidV4Generator);
        let store = Arc::new(InMemoryStore::new());
        let audit = SecurityAuditService::new(
            Arc::new(RecordingAuditSink::new()),
            clock.clone(),
            ids.clone(),
        );
        let jwt = JwtConfig::with_secrets("access-secret", "refresh-secret", "hash-secret");
        let tokens = TokenService::new(&jwt, clock.clone(), ids.clone());
        let refresh = RefreshTokenEngine::new(
            store.clone(),
            tokens,
            SecretString::new("hash-secret".to_string()),
            clock.clone(),
            ids.clone(),
            audit.clone(),
        );
        let sessions = SessionRegistry::new(
            store.clone(),
            SessionConfig::default(),
            clock.clone(),
            ids,
            audit,
        );
        Fixture {
            runner: MaintenanceRunner::new(
                refresh.clone(),
                sessions.clone(),
                Duration::from_millis(10),
            ),
            refresh,
            sessions,
            store,
            clock,
        }
    }

    #[tokio::test]
    async fn test_sweeps_are_idempotent() {
        let f = fixture();
        let principal = Principal::new(
            uuid::Uuid::new_v4(),
            Some(uuid::Uuid::new_v4()),
            "sweep@example.com".to_string(),
            f.clock.now(),
        )
        .with_status(PrincipalStatus::Active);
        f.store.insert_principal(&principal).await.unwrap();

        let issued = f.refresh.create(&principal, None).await.unwrap();
        let session = f
            .sessions
            .create(CreateSession::new(principal.id, "agent", "10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(f.runner.run_once().await.unwrap(), SweepReport::default());

        f.clock.advance(chrono::Duration::days(8));
        let report = f.runner.run_once().await.unwrap();
        assert_eq!(report.refresh_tokens_deleted, 1);
        assert_eq!(report.sessions_expired, 1);

        assert_eq!(f.runner.run_once().await.unwrap(), SweepReport::default());
        assert!(f
            .store
            .find_refresh_token(issued.record.token_id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            f.sessions.get(session.id).await.unwrap().status,
            SessionStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let runner = f.runner.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_until(async {
                    let _ = rx.await;
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
