use identity_core::{
    config::IdentityConfig,
    db,
    services::{
        AttemptCounter, AuthError, Database, InMemoryAttemptCounter, RedisAttemptCounter,
        SystemClock, TracingAuditSink, UuidV4Generator,
    },
    utils::Argon2Verifier,
    Collaborators, IdentityCore,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(AppError::InternalError)?;

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting identity maintenance worker"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let database = Database::new(pool);
    tracing::info!("Database initialized successfully");

    let clock = Arc::new(SystemClock);
    let attempts: Arc<dyn AttemptCounter> = match &config.redis {
        Some(redis) => {
            let counter =
                RedisAttemptCounter::new(redis, "mfa_attempts", config.mfa.attempt_window_seconds)
                    .await?;
            counter.health_check().await.map_err(AuthError::from)?;
            Arc::new(counter)
        }
        None => {
            tracing::warn!("REDIS_URL not set, MFA attempt counters are process-local");
            Arc::new(InMemoryAttemptCounter::new(
                config.mfa.attempt_window_seconds,
                clock.clone(),
            ))
        }
    };

    let core = IdentityCore::new(
        &config.core_settings(),
        Collaborators {
            store: Arc::new(database),
            attempts,
            audit_sink: Arc::new(TracingAuditSink),
            passwords: Arc::new(Argon2Verifier::new()?),
            clock,
            ids: Arc::new(UuidV4Generator),
        },
    );

    let seeded = core.rbac.seed_system_roles().await?;
    tracing::info!(
        roles_created = seeded.roles_created,
        permissions_created = seeded.permissions_created,
        "System roles in place"
    );

    core.maintenance.run_until(shutdown_signal()).await;

    tracing::info!("Maintenance worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
