use axum::Json;
use axum::extract::{Path, Query};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::db::repository;
use crate::error::AppError;
use crate::models::{ReconcileReport, Session, SessionRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct DatesRequest {
    #[serde(default)]
    sessions: Vec<SessionRequest>,
}

/// Public view of a session. The raw provider link stays server-side; the
/// client gets the proxy path, which re-validates access on use.
#[derive(Debug, Serialize)]
struct SessionView {
    id: i64,
    inicio: DateTime<Utc>,
    #[serde(rename = "final")]
    final_: DateTime<Utc>,
    titulo: String,
    tipo: String,
    join_link: Option<String>,
}

impl SessionView {
    fn from_session(session: Session) -> Self {
        let join_link = session
            .room_id
            .as_ref()
            .map(|room| format!("/courses/{}/join/{}", session.course_id, room));
        Self {
            id: session.id,
            inicio: session.start_utc,
            final_: session.end_utc,
            titulo: session.title,
            tipo: session.session_type,
            join_link,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JoinParams {
    auth: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/courses/{course_id}/dates",
            get(list_dates).post(schedule_dates),
        )
        .route("/courses/{course_id}/join/{room_id}", get(join_room))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

async fn list_dates(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<SessionView>>, AppError> {
    repository::find_course(&state.db, &course_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let from = Utc::now() - Duration::weeks(2);
    let sessions = repository::fetch_sessions_from(&state.db, &course_id, from).await?;
    Ok(Json(
        sessions.into_iter().map(SessionView::from_session).collect(),
    ))
}

async fn schedule_dates(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DatesRequest>,
) -> Result<Json<ReconcileReport>, AppError> {
    let token = auth::bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("Token required".to_string()))?;
    let claims = auth::verify_token(&token, &state.config.jwt_secret)?;

    let course = repository::find_course(&state.db, &course_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if course.owner_id != claims.id {
        return Err(AppError::Forbidden);
    }

    if body.sessions.is_empty() {
        return Err(AppError::BadRequest("sessions must not be empty".to_string()));
    }

    let report = state.reconciler.reconcile(&course_id, &body.sessions).await?;
    if report.exhausted_by_rate_limit() {
        return Err(AppError::RateLimited {
            retry_after: report.retry_after,
        });
    }
    Ok(Json(report))
}

/// Access-checked redirect into the videochat service. Raw join links never
/// leave the backend; this is the only way in.
async fn join_room(
    State(state): State<AppState>,
    Path((course_id, room_id)): Path<(String, String)>,
    Query(params): Query<JoinParams>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    let token = params
        .auth
        .or_else(|| auth::bearer_token(&headers))
        .ok_or_else(|| AppError::Unauthorized("Token required".to_string()))?;
    let claims = auth::verify_token(&token, &state.config.jwt_secret)?;

    if !repository::user_has_course_access(&state.db, &claims.id, &course_id).await? {
        return Err(AppError::Forbidden);
    }

    let session = repository::find_session_by_room(&state.db, &course_id, &room_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let room_token = match session.join_link.as_deref().and_then(link_token) {
        Some(token) => token,
        None => auth::sign_room_token(&room_id, &course_id, &state.config.jwt_secret)?,
    };

    let url = format!(
        "{}/join?token={}&user_token={}",
        state.config.videochat_url, room_token, token
    );
    Ok(Redirect::to(&url))
}

/// Pulls the `token` query parameter out of a stored join link.
fn link_token(link: &str) -> Option<String> {
    let (_, query) = link.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(str::to_string)
}
