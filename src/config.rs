use std::env;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::AppError;

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub videochat_url: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    /// Minimum spacing between outbound provisioning calls, process-wide.
    pub min_request_interval: Duration,
    /// Per-request timeout for provisioning calls.
    pub provision_timeout: Duration,
    /// Maximum attempts when the provider answers 429.
    pub max_retries: u32,
    pub room_cache_ttl: Duration,
    /// Zone applied to sessions that carry no timezone of their own.
    pub default_timezone: Tz,
}

impl AppConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let videochat_url = env::var("VIDEOCHAT_URL")
            .map_err(|_| AppError::BadRequest("VIDEOCHAT_URL is not set".to_string()))?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::BadRequest("JWT_SECRET is not set".to_string()))?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

        let min_request_interval =
            Duration::from_millis(env_u64("PROVISION_MIN_INTERVAL_MS", 100));
        let provision_timeout = Duration::from_secs(env_u64("PROVISION_TIMEOUT_SECS", 5));
        let max_retries = env_u64("PROVISION_MAX_RETRIES", 4) as u32;
        let room_cache_ttl = Duration::from_secs(env_u64("ROOM_CACHE_TTL_SECS", 60));

        let default_timezone = env::var("DEFAULT_TIMEZONE")
            .unwrap_or_else(|_| "America/Bogota".to_string())
            .parse::<Tz>()
            .map_err(|_| AppError::BadRequest("DEFAULT_TIMEZONE is not a valid zone".to_string()))?;

        Ok(Self {
            videochat_url,
            jwt_secret,
            bind_addr,
            min_request_interval,
            provision_timeout,
            max_retries,
            room_cache_ttl,
            default_timezone,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
