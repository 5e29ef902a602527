use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::repository;
use crate::error::AppError;
use crate::models::{
    NormalizedSession, OutcomeAction, ReconcileReport, ReconcileSummary, SessionOutcome,
    SessionRecord, SessionRequest,
};
use crate::services::cache::{RoomCache, RoomKey};
use crate::videochat::{ProvisionError, RoomProvider, RoomRequest};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("unparseable {field} timestamp")]
    BadTimestamp { field: &'static str },

    #[error("end is not after start")]
    EmptyInterval,
}

/// Maps a course's desired set of class meetings to provisioned video rooms,
/// calling the provider only for dates with no known room, and upserting the
/// outcome keyed by (course_id, local_date).
pub struct Reconciler {
    db: SqlitePool,
    provider: Arc<dyn RoomProvider>,
    cache: Arc<RoomCache>,
    default_tz: Tz,
}

impl Reconciler {
    pub fn new(
        db: SqlitePool,
        provider: Arc<dyn RoomProvider>,
        cache: Arc<RoomCache>,
        default_tz: Tz,
    ) -> Self {
        Self {
            db,
            provider,
            cache,
            default_tz,
        }
    }

    pub async fn reconcile(
        &self,
        course_id: &str,
        requests: &[SessionRequest],
    ) -> Result<ReconcileReport, AppError> {
        let total = requests.len();

        let normalized: Vec<NormalizedSession> = requests
            .iter()
            .filter_map(|raw| match normalize(raw, self.default_tz) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(course_id, inicio = %raw.inicio, "dropping invalid session: {}", e);
                    None
                }
            })
            .collect();
        let invalid = total - normalized.len();

        if normalized.is_empty() {
            return Ok(ReconcileReport::empty(total, invalid));
        }

        // One batched lookup for every date in the run.
        let mut dates: Vec<NaiveDate> = Vec::new();
        for session in &normalized {
            if !dates.contains(&session.local_date) {
                dates.push(session.local_date);
            }
        }
        // Known rooms per date. Seeded from the store and kept current
        // within the run, so a date is provisioned at most once no matter
        // how many sessions land on it.
        let mut known: HashMap<NaiveDate, (Option<String>, Option<String>)> =
            repository::fetch_sessions_for_dates(&self.db, course_id, &dates)
                .await?
                .into_iter()
                .map(|row| (row.local_date, (row.room_id, row.join_link)))
                .collect();
        let mut failed_dates: HashSet<NaiveDate> = HashSet::new();

        let mut results = Vec::with_capacity(normalized.len());
        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut rate_limited = false;
        let mut retry_after: Option<u64> = None;

        for session in &normalized {
            let prior = known.get(&session.local_date).cloned();
            let prior_room = prior.as_ref().and_then(|(room, _)| room.clone());
            let prior_link = prior.as_ref().and_then(|(_, link)| link.clone());

            let (room_id, join_link, mut action) = if let Some(room) = prior_room {
                // A date with an assigned room never triggers a call.
                (Some(room), prior_link, OutcomeAction::Reused)
            } else if let Some(hit) = self.cache.get(&room_key(course_id, session)) {
                known.insert(
                    session.local_date,
                    (Some(hit.room_id.clone()), Some(hit.join_link.clone())),
                );
                (Some(hit.room_id), Some(hit.join_link), OutcomeAction::Cached)
            } else if failed_dates.contains(&session.local_date) {
                // This date's one call already failed in this run.
                (None, None, OutcomeAction::Failed)
            } else {
                let request = RoomRequest {
                    course_id: course_id.to_string(),
                    session_date: session.local_date,
                    start_utc: session.start_utc,
                    end_utc: session.end_utc,
                };
                match self.provider.create_room(&request).await {
                    Ok(handle) => {
                        self.cache.insert(
                            room_key(course_id, session),
                            handle.room_id.clone(),
                            handle.join_link.clone(),
                        );
                        known.insert(
                            session.local_date,
                            (Some(handle.room_id.clone()), Some(handle.join_link.clone())),
                        );
                        let action = if prior.is_some() {
                            OutcomeAction::Updated
                        } else {
                            OutcomeAction::Created
                        };
                        (Some(handle.room_id), Some(handle.join_link), action)
                    }
                    Err(e) => {
                        warn!(
                            course_id,
                            date = %session.local_date,
                            "provisioning failed: {}", e
                        );
                        if let ProvisionError::RetriesExhausted {
                            retry_after: hint, ..
                        } = &e
                        {
                            rate_limited = true;
                            if let Some(hint) = hint {
                                let secs = hint.as_secs();
                                retry_after =
                                    Some(retry_after.map_or(secs, |prev| prev.max(secs)));
                            }
                        }
                        // A concurrent run may have assigned a room since
                        // the batched lookup; re-check before giving up so
                        // the last known room wins over a null.
                        match self.rescue_prior_room(course_id, session.local_date).await {
                            Some((room, link)) => {
                                known.insert(
                                    session.local_date,
                                    (Some(room.clone()), link.clone()),
                                );
                                (Some(room), link, OutcomeAction::Fallback)
                            }
                            None => {
                                failed_dates.insert(session.local_date);
                                (None, None, OutcomeAction::Failed)
                            }
                        }
                    }
                }
            };

            // Every path persists, including failed-with-null: times and
            // title still update, and the coalesce rule protects the room.
            let record = SessionRecord {
                course_id: course_id.to_string(),
                local_date: session.local_date,
                start_utc: session.start_utc,
                end_utc: session.end_utc,
                title: session.title.clone(),
                session_type: session.session_type.clone(),
                room_id,
                join_link,
            };
            if let Err(e) = repository::upsert_session(&self.db, &record).await {
                error!(course_id, date = %session.local_date, "session upsert failed: {}", e);
                action = OutcomeAction::Failed;
            }

            if action.is_failure() {
                failed += 1;
            } else {
                successful += 1;
            }
            results.push(SessionOutcome::new(
                session.local_date,
                session.inicio.clone(),
                action,
            ));
        }

        info!(
            course_id,
            total, invalid, successful, failed, "reconciliation finished"
        );

        Ok(ReconcileReport {
            results,
            summary: ReconcileSummary {
                total,
                invalid,
                successful,
                failed,
            },
            rate_limited,
            retry_after,
        })
    }

    /// Re-reads the store for a room another run may have assigned while
    /// this one was calling the provider. A read error here only costs the
    /// fallback, not the batch.
    async fn rescue_prior_room(
        &self,
        course_id: &str,
        date: NaiveDate,
    ) -> Option<(String, Option<String>)> {
        match repository::fetch_sessions_for_dates(&self.db, course_id, &[date]).await {
            Ok(rows) => rows
                .into_iter()
                .find_map(|row| row.room_id.map(|room| (room, row.join_link))),
            Err(e) => {
                error!(course_id, date = %date, "fallback lookup failed: {}", e);
                None
            }
        }
    }
}

fn room_key(course_id: &str, session: &NormalizedSession) -> RoomKey {
    RoomKey {
        course_id: course_id.to_string(),
        local_date: session.local_date,
        start_utc: session.start_utc,
        end_utc: session.end_utc,
    }
}

/// Converts a raw desired session to UTC instants and a local calendar date.
/// Valid iff both timestamps parse under the zone and the interval is
/// non-empty.
pub fn normalize(raw: &SessionRequest, default_tz: Tz) -> Result<NormalizedSession, NormalizeError> {
    let tz = match &raw.timezone {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| NormalizeError::UnknownTimezone(name.clone()))?,
        None => default_tz,
    };

    let start_local =
        parse_in_zone(&raw.inicio, tz).ok_or(NormalizeError::BadTimestamp { field: "inicio" })?;
    let end_local =
        parse_in_zone(&raw.final_, tz).ok_or(NormalizeError::BadTimestamp { field: "final" })?;

    let start_utc = start_local.with_timezone(&Utc);
    let end_utc = end_local.with_timezone(&Utc);
    if end_utc <= start_utc {
        return Err(NormalizeError::EmptyInterval);
    }

    Ok(NormalizedSession {
        inicio: raw.inicio.clone(),
        local_date: start_local.date_naive(),
        start_utc,
        end_utc,
        title: raw.titulo.clone().unwrap_or_else(|| "Clase".to_string()),
        session_type: raw
            .session_type
            .clone()
            .unwrap_or_else(|| "Clase en vivo".to_string()),
    })
}

/// Accepts ISO timestamps with or without seconds, or a full RFC3339 instant
/// (whose own offset then wins). Ambiguous local times (DST fold) take the
/// earliest mapping; times inside a DST gap do not exist and fail.
fn parse_in_zone(raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&tz));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(instant) => Some(instant),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(inicio: &str, final_: &str, timezone: Option<&str>) -> SessionRequest {
        SessionRequest {
            inicio: inicio.to_string(),
            final_: final_.to_string(),
            timezone: timezone.map(str::to_string),
            titulo: None,
            session_type: None,
        }
    }

    fn bogota() -> Tz {
        "America/Bogota".parse().unwrap()
    }

    #[test]
    fn test_normalize_converts_to_utc() {
        let raw = request("2024-03-01T09:00", "2024-03-01T10:00", Some("America/Bogota"));
        let session = normalize(&raw, bogota()).expect("should normalize");

        // Bogota is UTC-5, no DST.
        assert_eq!(session.start_utc, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
        assert_eq!(session.end_utc, Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap());
        assert_eq!(session.local_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(session.title, "Clase");
        assert_eq!(session.session_type, "Clase en vivo");
    }

    #[test]
    fn test_local_date_is_local_not_utc() {
        // 22:00 in Bogota is 03:00 UTC the next day; the key stays on the
        // local calendar date.
        let raw = request("2024-03-01T22:00", "2024-03-01T23:00", Some("America/Bogota"));
        let session = normalize(&raw, bogota()).expect("should normalize");
        assert_eq!(session.local_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(session.start_utc.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    }

    #[test]
    fn test_inverted_interval_is_invalid() {
        let raw = request("2024-03-01T10:00", "2024-03-01T09:00", None);
        assert!(matches!(
            normalize(&raw, bogota()),
            Err(NormalizeError::EmptyInterval)
        ));

        let raw = request("2024-03-01T10:00", "2024-03-01T10:00", None);
        assert!(matches!(
            normalize(&raw, bogota()),
            Err(NormalizeError::EmptyInterval)
        ));
    }

    #[test]
    fn test_garbage_timestamp_is_invalid() {
        let raw = request("not-a-date", "2024-03-01T10:00", None);
        assert!(matches!(
            normalize(&raw, bogota()),
            Err(NormalizeError::BadTimestamp { field: "inicio" })
        ));
    }

    #[test]
    fn test_unknown_timezone_is_invalid() {
        let raw = request("2024-03-01T09:00", "2024-03-01T10:00", Some("Mars/Olympus"));
        assert!(matches!(
            normalize(&raw, bogota()),
            Err(NormalizeError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_missing_timezone_uses_default() {
        let raw = request("2024-03-01T09:00", "2024-03-01T10:00", None);
        let session = normalize(&raw, bogota()).expect("should normalize");
        assert_eq!(session.start_utc, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_dst_gap_time_is_invalid() {
        // 2024-03-10 02:30 does not exist in New York.
        let raw = request(
            "2024-03-10T02:30",
            "2024-03-10T03:30",
            Some("America/New_York"),
        );
        assert!(matches!(
            normalize(&raw, bogota()),
            Err(NormalizeError::BadTimestamp { field: "inicio" })
        ));
    }

    #[test]
    fn test_rfc3339_offset_wins_over_zone() {
        let raw = request(
            "2024-03-01T14:00:00+00:00",
            "2024-03-01T15:00:00+00:00",
            Some("America/Bogota"),
        );
        let session = normalize(&raw, bogota()).expect("should normalize");
        assert_eq!(session.start_utc, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
        // 14:00 UTC is 09:00 in Bogota, same calendar date.
        assert_eq!(session.local_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
