use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::models::{Course, Session, SessionRecord};

pub async fn find_course(db: &SqlitePool, id: &str) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>("SELECT id, owner_id, title FROM courses WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Owner or enrolled student may reach a course's rooms.
pub async fn user_has_course_access(
    db: &SqlitePool,
    user_id: &str,
    course_id: &str,
) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT 1 FROM enrollments WHERE user_id = ? AND course_id = ?
        UNION
        SELECT 1 FROM courses WHERE id = ? AND owner_id = ?
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(course_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(row.is_some())
}

/// Batched lookup for a reconciliation run: every session row for the course
/// on any of the given dates, in one round trip.
pub async fn fetch_sessions_for_dates(
    db: &SqlitePool,
    course_id: &str,
    dates: &[NaiveDate],
) -> Result<Vec<Session>, sqlx::Error> {
    if dates.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; dates.len()].join(",");
    let sql = format!(
        "SELECT id, course_id, local_date, start_utc, end_utc, title, session_type, \
         room_id, join_link \
         FROM sessions WHERE course_id = ? AND local_date IN ({placeholders})"
    );

    let mut query = sqlx::query_as::<_, Session>(&sql).bind(course_id);
    for date in dates {
        query = query.bind(date);
    }
    query.fetch_all(db).await
}

/// Sessions for a course ending at or after `from`, oldest first.
pub async fn fetch_sessions_from(
    db: &SqlitePool,
    course_id: &str,
    from: DateTime<Utc>,
) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, course_id, local_date, start_utc, end_utc, title, session_type,
               room_id, join_link
        FROM sessions
        WHERE course_id = ? AND end_utc >= ?
        ORDER BY start_utc ASC
        "#,
    )
    .bind(course_id)
    .bind(from)
    .fetch_all(db)
    .await
}

pub async fn find_session_by_room(
    db: &SqlitePool,
    course_id: &str,
    room_id: &str,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, course_id, local_date, start_utc, end_utc, title, session_type,
               room_id, join_link
        FROM sessions
        WHERE course_id = ? AND room_id = ?
        "#,
    )
    .bind(course_id)
    .bind(room_id)
    .fetch_optional(db)
    .await
}

/// Idempotent write keyed by (course_id, local_date). Times, title and type
/// always win; room_id/join_link coalesce so a null incoming value never
/// clears an assigned room. Single statement, so concurrent runs cannot
/// interleave a read between check and write.
pub async fn upsert_session(db: &SqlitePool, record: &SessionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sessions
            (course_id, local_date, start_utc, end_utc, title, session_type, room_id, join_link)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(course_id, local_date) DO UPDATE SET
            start_utc = excluded.start_utc,
            end_utc = excluded.end_utc,
            title = excluded.title,
            session_type = excluded.session_type,
            room_id = COALESCE(excluded.room_id, sessions.room_id),
            join_link = COALESCE(excluded.join_link, sessions.join_link)
        "#,
    )
    .bind(&record.course_id)
    .bind(record.local_date)
    .bind(record.start_utc)
    .bind(record.end_utc)
    .bind(&record.title)
    .bind(&record.session_type)
    .bind(&record.room_id)
    .bind(&record.join_link)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn insert_course(
    db: &SqlitePool,
    id: &str,
    owner_id: &str,
    title: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO courses (id, owner_id, title) VALUES (?, ?, ?)")
        .bind(id)
        .bind(owner_id)
        .bind(title)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn enroll_user(
    db: &SqlitePool,
    course_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO enrollments (course_id, user_id) VALUES (?, ?)")
        .bind(course_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}
