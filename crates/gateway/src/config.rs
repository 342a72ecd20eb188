use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::warn;

use crate::error::ConfigError;

const DEFAULT_BIND: &str = "0.0.0.0:9009";
const DEFAULT_BLOB_PATH: &str = "./data/blobs";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs the portal on the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub storage_secret: String,
    pub blob_path: PathBuf,
    pub cookie_secure: bool,
    pub session_hours: i64,
    pub max_upload_bytes: usize,
}

impl GatewayConfig {
    /// Reads `HC_*` variables (plus `DATABASE_URL`) from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("HC_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid("HC_BIND_ADDR", e.to_string()))?;

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let jwt_secret = secret(&lookup, "HC_JWT_SECRET")?;
        let storage_secret = secret(&lookup, "HC_STORAGE_SECRET")?;

        Ok(Self {
            bind_addr,
            database_url,
            db_max_connections: parse_or(&lookup, "HC_DB_MAX_CONNECTIONS", 20)?,
            jwt_secret,
            storage_secret,
            blob_path: lookup("HC_BLOB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOB_PATH)),
            cookie_secure: parse_or(&lookup, "HC_COOKIE_SECURE", false)?,
            session_hours: parse_or(&lookup, "HC_SESSION_HOURS", 24)?,
            max_upload_bytes: parse_or(&lookup, "HC_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

fn secret<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if value.len() >= 32 => Ok(value),
        Some(_) => Err(ConfigError::Invalid(key, "must be at least 32 bytes".to_string())),
        None => {
            warn!("{} not set; generating an ephemeral secret (sessions and signed URLs will not survive a restart)", key);
            let mut bytes = [0u8; 32];
            rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
            Ok(hex::encode(bytes))
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(key, e.to_string())),
        None => Ok(default),
    }
}
