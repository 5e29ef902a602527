pub mod dto;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use thiserror::Error;
use tracing::warn;

use crate::auth;
use crate::services::RateLimiter;

pub use dto::{RoomRequest, RoomResponse};

const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const JITTER_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provider rate limited after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("could not sign provider token")]
    Token,
}

/// A provisioned room as returned by the provider.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub room_id: String,
    pub join_link: String,
}

#[async_trait]
pub trait RoomProvider: Send + Sync {
    async fn create_room(&self, request: &RoomRequest) -> Result<RoomHandle, ProvisionError>;
}

/// Outcome of a single HTTP attempt. The retry loop matches on the tag
/// instead of inspecting error types.
enum CallOutcome {
    Provisioned(RoomHandle),
    RateLimited(Option<Duration>),
}

#[derive(Clone, Debug)]
pub struct VideochatConfig {
    pub base_url: String,
    pub jwt_secret: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

pub struct VideochatHttpClient {
    client: Client,
    config: VideochatConfig,
    limiter: Arc<RateLimiter>,
}

impl VideochatHttpClient {
    pub fn new(
        config: VideochatConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProvisionError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    async fn attempt(&self, request: &RoomRequest) -> Result<CallOutcome, ProvisionError> {
        let token = auth::sign_payload(request, &self.config.jwt_secret)
            .map_err(|_| ProvisionError::Token)?;
        let url = format!("{}/api/calls", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProvisionError::Timeout
                } else {
                    ProvisionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Ok(CallOutcome::RateLimited(hint));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<RoomResponse>()
            .await
            .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))?;

        Ok(CallOutcome::Provisioned(RoomHandle {
            room_id: parsed.room_id,
            join_link: parsed.link,
        }))
    }
}

#[async_trait]
impl RoomProvider for VideochatHttpClient {
    async fn create_room(&self, request: &RoomRequest) -> Result<RoomHandle, ProvisionError> {
        let mut attempt: u32 = 1;
        loop {
            self.limiter.acquire().await;

            match self.attempt(request).await? {
                CallOutcome::Provisioned(handle) => return Ok(handle),
                CallOutcome::RateLimited(hint) => {
                    if attempt >= self.config.max_retries {
                        return Err(ProvisionError::RetriesExhausted {
                            attempts: attempt,
                            retry_after: hint,
                        });
                    }
                    let wait = hint
                        .unwrap_or_else(|| {
                            backoff_delay(attempt, BASE_RETRY_DELAY, MAX_RETRY_DELAY)
                        })
                        .min(MAX_RETRY_DELAY);
                    warn!(
                        course_id = %request.course_id,
                        session_date = %request.session_date,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "provider rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Exponential delay with jitter: `base * 2^(attempt-1)` plus up to
/// `JITTER_MS`, never above `cap`.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(16);
    let exp = base.saturating_mul(1u32 << shift);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MS));
    (exp + jitter).min(cap)
}

/// `Retry-After` is either delay-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(Duration::from_secs(delta.num_seconds().max(0) as u64))
}
