//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use ebook_hub_core::AdminCredential;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// HS256 keys shorter than this are refused.
const MIN_JWT_KEY_LEN: usize = 32;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub uploads_path: PathBuf,
    pub public_base_url: String,
    pub allowed_origins: Vec<String>,
    pub jwt_key: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub session_ttl: chrono::Duration,
    pub admin: AdminCredential,
    pub firebase_api_key: String,
    pub db_init_attempts: u32,
    pub db_init_delay: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
        };
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Load Server and Database Settings ---
        let bind_address_str = or_default("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required("DATABASE_URL")?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let db_init_attempts = parse_number::<u32>("DB_INIT_ATTEMPTS", &or_default("DB_INIT_ATTEMPTS", "10"))?
            .max(1);
        let db_init_delay = Duration::from_secs(parse_number::<u64>(
            "DB_INIT_DELAY_SECS",
            &or_default("DB_INIT_DELAY_SECS", "3"),
        )?);

        // --- Load Asset Storage Settings ---
        let uploads_path = PathBuf::from(or_default("UPLOADS_PATH", "./uploads"));
        let public_base_url = or_default("PUBLIC_BASE_URL", "")
            .trim_end_matches('/')
            .to_string();
        let allowed_origins = or_default("ALLOWED_ORIGINS", "http://localhost:4200")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        // --- Load Session Settings ---
        let jwt_key = required("JWT_KEY")?;
        if jwt_key.len() < MIN_JWT_KEY_LEN {
            return Err(ConfigError::InvalidValue(
                "JWT_KEY".to_string(),
                format!("must be at least {} bytes", MIN_JWT_KEY_LEN),
            ));
        }
        let jwt_issuer = or_default("JWT_ISSUER", "ebook-hub");
        let jwt_audience = or_default("JWT_AUDIENCE", "ebook-hub-clients");
        let ttl_hours = parse_number::<i64>("SESSION_TTL_HOURS", &or_default("SESSION_TTL_HOURS", "24"))?;
        if ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_TTL_HOURS".to_string(),
                "must be positive".to_string(),
            ));
        }
        let session_ttl = chrono::Duration::try_hours(ttl_hours).ok_or_else(|| {
            ConfigError::InvalidValue(
                "SESSION_TTL_HOURS".to_string(),
                format!("{} hours is out of range", ttl_hours),
            )
        })?;

        // --- Load Identity Settings ---
        let admin_username = required("ADMIN_USERNAME")?;
        let admin = match (
            lookup("ADMIN_PASSWORD_HASH").filter(|v| !v.is_empty()),
            lookup("ADMIN_PASSWORD").filter(|v| !v.is_empty()),
        ) {
            (Some(hash), _) => AdminCredential::from_hash(&admin_username, &hash).map_err(|e| {
                ConfigError::InvalidValue("ADMIN_PASSWORD_HASH".to_string(), e.to_string())
            })?,
            (None, Some(password)) => AdminCredential::from_password(&admin_username, &password)
                .map_err(|e| ConfigError::InvalidValue("ADMIN_PASSWORD".to_string(), e.to_string()))?,
            (None, None) => return Err(ConfigError::MissingVar("ADMIN_PASSWORD_HASH".to_string())),
        };
        let firebase_api_key = required("FIREBASE_API_KEY")?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            uploads_path,
            public_base_url,
            allowed_origins,
            jwt_key,
            jwt_issuer,
            jwt_audience,
            session_ttl,
            admin,
            firebase_api_key,
            db_init_attempts,
            db_init_delay,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), format!("'{}' is not a valid number", raw))
    })
}
