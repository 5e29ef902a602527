use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persisted session row. One per (course_id, local_date).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: i64,
    pub course_id: String,
    pub local_date: NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub title: String,
    pub session_type: String,
    pub room_id: Option<String>,
    pub join_link: Option<String>,
}

/// One desired session as submitted by the course owner. Timestamps are
/// local wall-clock times interpreted in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub inicio: String,
    #[serde(rename = "final")]
    pub final_: String,
    pub timezone: Option<String>,
    pub titulo: Option<String>,
    #[serde(rename = "type")]
    pub session_type: Option<String>,
}

/// A desired session after timezone normalization and validation.
#[derive(Debug, Clone)]
pub struct NormalizedSession {
    /// Raw `inicio` echoed back so results correlate to the input.
    pub inicio: String,
    pub local_date: NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub title: String,
    pub session_type: String,
}

/// Everything the upsert writes for one (course_id, local_date) key.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub course_id: String,
    pub local_date: NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub title: String,
    pub session_type: String,
    pub room_id: Option<String>,
    pub join_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeAction {
    Created,
    Updated,
    Cached,
    Reused,
    Fallback,
    Failed,
}

impl OutcomeAction {
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeAction::Failed)
    }
}

/// Per-session outcome, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub date: NaiveDate,
    pub inicio: String,
    pub status: String,
    pub action: OutcomeAction,
}

impl SessionOutcome {
    pub fn new(date: NaiveDate, inicio: String, action: OutcomeAction) -> Self {
        let status = if action.is_failure() {
            "failed"
        } else {
            "success"
        };
        Self {
            date,
            inicio,
            status: status.to_string(),
            action,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub total: usize,
    pub invalid: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Informational result of one reconciliation run. Never itself mutates
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub results: Vec<SessionOutcome>,
    pub summary: ReconcileSummary,
    /// Set when at least one session died on the provider's rate limit.
    #[serde(default, skip_serializing)]
    pub rate_limited: bool,
    /// Retry hint (seconds) propagated from the provider, when it gave one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ReconcileReport {
    pub fn empty(total: usize, invalid: usize) -> Self {
        Self {
            results: Vec::new(),
            summary: ReconcileSummary {
                total,
                invalid,
                successful: 0,
                failed: 0,
            },
            rate_limited: false,
            retry_after: None,
        }
    }

    /// True when every processed session died on the provider's rate limit
    /// and nothing got through.
    pub fn exhausted_by_rate_limit(&self) -> bool {
        !self.results.is_empty() && self.summary.successful == 0 && self.rate_limited
    }
}
