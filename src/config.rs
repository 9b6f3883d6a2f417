use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;
use tokio::time::Duration;

use crate::auth::RemoteStoreConfig;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address for binding the HTTP server.
    pub bind_addr: SocketAddr,
    /// Stable worker identity; generated per process when absent.
    pub worker_id: String,
    /// URL advertised to the backend for reaching this worker.
    pub worker_endpoint: String,
    /// Advertised session capacity.
    pub max_sessions: usize,
    /// Environment tag sent with registration.
    pub environment: String,
    /// Control-plane base URL; absence disables registration.
    pub backend_url: Option<String>,
    /// Bearer token for all backend calls.
    pub worker_auth_token: Option<String>,
    pub heartbeat_interval: Duration,
    pub max_registration_retries: u32,
    pub registration_retry_interval: Duration,
    pub worker_startup_delay: Duration,
    /// Explicit kill switches for backend coupling.
    pub registration_enabled: bool,
    pub standalone_mode: bool,
    /// S3-compatible store; absence leaves the auth store local-only.
    pub object_store: Option<RemoteStoreConfig>,
    /// Root directory for per-session auth material.
    pub session_path: PathBuf,
    pub qr_timeout: Duration,
    pub max_qr_attempts: u32,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub recovery_enabled: bool,
    pub recovery_startup_delay: Duration,
    /// Pause between bulk-send dispatches.
    pub bulk_message_delay: Duration,
}

impl Config {
    /// Loads runtime configuration using environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let port = parse_var("PORT", 8001_u16)?;
        let worker_id = match optional_var("WORKER_ID") {
            Some(id) => id,
            None => format!("worker-{}", uuid::Uuid::new_v4().simple()),
        };
        let worker_endpoint = optional_var("WORKER_ENDPOINT")
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let object_store = optional_var("MINIO_ENDPOINT").map(|endpoint| {
            Ok::<_, ConfigError>(RemoteStoreConfig {
                endpoint,
                port: parse_var("MINIO_PORT", 9000_u16)?,
                use_ssl: bool_var("MINIO_USE_SSL", false),
                access_key: var("MINIO_ACCESS_KEY", ""),
                secret_key: var("MINIO_SECRET_KEY", ""),
                bucket_sessions: var("MINIO_BUCKET_SESSIONS", "whatsapp-sessions"),
                bucket_media: var("MINIO_BUCKET_MEDIA", "whatsapp-media"),
                bucket_backups: var("MINIO_BUCKET_BACKUPS", "whatsapp-backups"),
            })
        });
        let object_store = object_store.transpose()?;

        let max_registration_retries = parse_var("MAX_REGISTRATION_RETRIES", 5_u32)?;
        if max_registration_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_REGISTRATION_RETRIES",
                value: "0".to_owned(),
            });
        }

        Ok(Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            worker_id,
            worker_endpoint,
            max_sessions: parse_var("MAX_SESSIONS", 50_usize)?,
            environment: var("WORKER_ENVIRONMENT", "production"),
            backend_url: optional_var("BACKEND_URL"),
            worker_auth_token: optional_var("WORKER_AUTH_TOKEN"),
            heartbeat_interval: millis_var("HEARTBEAT_INTERVAL", 30_000)?,
            max_registration_retries,
            registration_retry_interval: millis_var("REGISTRATION_RETRY_INTERVAL", 5_000)?,
            worker_startup_delay: millis_var("WORKER_STARTUP_DELAY", 5_000)?,
            registration_enabled: bool_var("BACKEND_REGISTRATION_ENABLED", true),
            standalone_mode: bool_var("STANDALONE_MODE", false),
            object_store,
            session_path: PathBuf::from(var("WHATSAPP_SESSION_PATH", "storage/sessions")),
            qr_timeout: millis_var("WHATSAPP_QR_TIMEOUT", 60_000)?,
            max_qr_attempts: parse_var("WHATSAPP_MAX_QR_ATTEMPTS", 3_u32)?,
            reconnect_interval: millis_var("WHATSAPP_RECONNECT_INTERVAL", 5_000)?,
            max_reconnect_attempts: parse_var("WHATSAPP_MAX_RECONNECT_ATTEMPTS", 5_u32)?,
            recovery_enabled: bool_var("SESSION_RECOVERY_ENABLED", true),
            recovery_startup_delay: millis_var("SESSION_RECOVERY_STARTUP_DELAY", 0)?,
            bulk_message_delay: millis_var("BULK_MESSAGE_DELAY_MS", 1_000)?,
        })
    }

    /// Whether this worker couples to the backend at all.
    pub fn backend_enabled(&self) -> bool {
        self.backend_url.is_some() && self.registration_enabled && !self.standalone_mode
    }
}

/// Errors while loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key} value: {value}")]
    Invalid { key: &'static str, value: String },
}

fn var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn bool_var(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|value| value == "true")
        .unwrap_or(default)
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => T::from_str(&raw).map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn millis_var(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_var(key, default)?))
}
