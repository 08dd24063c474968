use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::models::role::SUPER_ADMIN;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub mfa: MfaConfig,
    pub rbac: RbacConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    /// Signs tokens for the `users` audience.
    pub access_secret: SecretString,
    /// Signs tokens for the `refresh` audience.
    pub refresh_secret: SecretString,
    /// Keys the stored refresh-token hash.
    pub refresh_hash_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_days: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_concurrent: usize,
    pub default_ttl_hours: i64,
    pub remember_me_days: i64,
    pub inactivity_threshold_hours: i64,
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    pub issuer: String,
    pub time_step_seconds: u64,
    pub window: u8,
    pub max_attempts: u32,
    pub attempt_window_seconds: u64,
    pub backup_code_count: usize,
}

#[derive(Debug, Clone)]
pub struct RbacConfig {
    pub cross_tenant_role: String,
    pub permission_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            default_ttl_hours: 24,
            remember_me_days: 30,
            inactivity_threshold_hours: 24,
        }
    }
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            issuer: "identity-core".to_string(),
            time_step_seconds: 30,
            window: 1,
            max_attempts: 5,
            attempt_window_seconds: 900,
            backup_code_count: 10,
        }
    }
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            cross_tenant_role: SUPER_ADMIN.to_string(),
            permission_cache_ttl_seconds: 5,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 300,
        }
    }
}

/// The settings the core services are built from, without the process-level
/// pieces (database, Redis, logging).
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub mfa: MfaConfig,
    pub rbac: RbacConfig,
    pub maintenance: MaintenanceConfig,
}

impl CoreSettings {
    /// Default policy with the given signing secrets.
    pub fn with_jwt(jwt: JwtConfig) -> Self {
        Self {
            jwt,
            session: SessionConfig::default(),
            mfa: MfaConfig::default(),
            rbac: RbacConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl JwtConfig {
    /// Convenience constructor with the default TTLs (15 minutes / 7 days).
    pub fn with_secrets(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        refresh_hash_secret: impl Into<String>,
    ) -> Self {
        Self {
            issuer: "identity-core".to_string(),
            access_secret: SecretString::new(access_secret.into()),
            refresh_secret: SecretString::new(refresh_secret.into()),
            refresh_hash_secret: SecretString::new(refresh_hash_secret.into()),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_days: 7,
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let redis = match env::var("REDIS_URL") {
            Ok(url) if !url.trim().is_empty() => Some(RedisConfig { url }),
            _ => None,
        };

        let otlp_endpoint = match env::var("OTLP_ENDPOINT") {
            Ok(url) if !url.trim().is_empty() => Some(url),
            _ => common_config.otlp_endpoint.clone(),
        };

        let config = IdentityConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-core"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis,
            jwt: JwtConfig {
                issuer: get_env("JWT_ISSUER", Some("identity-core"), is_prod)?,
                access_secret: SecretString::new(get_env("JWT_ACCESS_SECRET", None, is_prod)?),
                refresh_secret: SecretString::new(get_env("JWT_REFRESH_SECRET", None, is_prod)?),
                refresh_hash_secret: SecretString::new(get_env(
                    "REFRESH_TOKEN_HASH_SECRET",
                    None,
                    is_prod,
                )?),
                access_token_ttl_seconds: parse_env("JWT_ACCESS_TOKEN_TTL_SECONDS", "900", is_prod)?,
                refresh_token_ttl_days: parse_env("JWT_REFRESH_TOKEN_TTL_DAYS", "7", is_prod)?,
            },
            session: SessionConfig {
                max_concurrent: parse_env("SESSION_MAX_CONCURRENT", "5", is_prod)?,
                default_ttl_hours: parse_env("SESSION_DEFAULT_TTL_HOURS", "24", is_prod)?,
                remember_me_days: parse_env("SESSION_REMEMBER_ME_DAYS", "30", is_prod)?,
                inactivity_threshold_hours: parse_env("SESSION_INACTIVITY_HOURS", "24", is_prod)?,
            },
            mfa: MfaConfig {
                issuer: get_env("MFA_ISSUER", Some("identity-core"), is_prod)?,
                time_step_seconds: parse_env("MFA_TIME_STEP_SECONDS", "30", is_prod)?,
                window: parse_env("MFA_WINDOW", "1", is_prod)?,
                max_attempts: parse_env("MFA_MAX_ATTEMPTS", "5", is_prod)?,
                attempt_window_seconds: parse_env("MFA_ATTEMPT_WINDOW_SECONDS", "900", is_prod)?,
                backup_code_count: parse_env("MFA_BACKUP_CODE_COUNT", "10", is_prod)?,
            },
            rbac: RbacConfig {
                cross_tenant_role: get_env("RBAC_CROSS_TENANT_ROLE", Some(SUPER_ADMIN), is_prod)?,
                permission_cache_ttl_seconds: parse_env(
                    "RBAC_PERMISSION_CACHE_TTL_SECONDS",
                    "5",
                    is_prod,
                )?,
            },
            maintenance: MaintenanceConfig {
                sweep_interval_seconds: parse_env(
                    "MAINTENANCE_SWEEP_INTERVAL_SECONDS",
                    "300",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            jwt: self.jwt.clone(),
            session: self.session.clone(),
            mfa: self.mfa.clone(),
            rbac: self.rbac.clone(),
            maintenance: self.maintenance.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.jwt.validate()?;

        if self.session.max_concurrent == 0 {
            return Err(config_error("SESSION_MAX_CONCURRENT must be greater than 0"));
        }

        if self.session.default_ttl_hours <= 0 || self.session.remember_me_days <= 0 {
            return Err(config_error("Session durations must be positive"));
        }

        if self.mfa.time_step_seconds == 0 {
            return Err(config_error("MFA_TIME_STEP_SECONDS must be greater than 0"));
        }

        if self.mfa.max_attempts == 0 {
            return Err(config_error("MFA_MAX_ATTEMPTS must be greater than 0"));
        }

        if self.maintenance.sweep_interval_seconds == 0 {
            return Err(config_error(
                "MAINTENANCE_SWEEP_INTERVAL_SECONDS must be greater than 0",
            ));
        }

        if self.environment == Environment::Prod && self.redis.is_none() {
            tracing::error!(
                "REDIS_URL is not set in production - MFA attempt counters will not be shared across instances"
            );
        }

        Ok(())
    }
}

impl JwtConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.access_token_ttl_seconds <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_TTL_SECONDS must be positive"));
        }

        if self.refresh_token_ttl_days <= 0 {
            return Err(config_error("JWT_REFRESH_TOKEN_TTL_DAYS must be positive"));
        }

        let secrets = [
            self.access_secret.expose_secret(),
            self.refresh_secret.expose_secret(),
            self.refresh_hash_secret.expose_secret(),
        ];
        if secrets.iter().any(|s| s.is_empty()) {
            return Err(config_error("Signing secrets must not be empty"));
        }

        if self.access_secret.expose_secret() == self.refresh_secret.expose_secret() {
            return Err(config_error(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ",
            ));
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
