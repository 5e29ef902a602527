use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Payload of `POST {VIDEOCHAT_URL}/api/calls`, one call per distinct local
/// date. `session_date` is echoed by the provider so results correlate
/// without positional coupling. Also signed into the bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct RoomRequest {
    pub course_id: String,
    pub session_date: NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomResponse {
    pub room_id: String,
    pub link: String,
    #[serde(default)]
    pub session_date: Option<NaiveDate>,
}
