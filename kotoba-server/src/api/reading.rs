//! Reading sessions and reading statistics

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use kotoba_common::time;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::auth::CurrentUser;
use super::books::book_not_found;
use crate::db::reading::{self, ReadingSession, SessionEnd};
use crate::db::{self, books, users};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;

/// Streak after reading on `now`'s UTC day
///
/// `previous_end` is when the user last finished a session. Reading again
/// the same day keeps the streak, the next day extends it, a gap restarts it.
pub fn next_streak(current: i64, previous_end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let Some(previous) = previous_end else {
        return 1;
    };

    let gap = (time::utc_day(&now) - time::utc_day(&previous)).num_days();
    match gap {
        d if d <= 0 => current.max(1),
        1 => current + 1,
        _ => 1,
    }
}

/// Whole minutes between start and end, never negative
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes().max(0)
}

/// Progress percentage from a character position
fn progress_for(position: i64, text_length: i64) -> f64 {
    if text_length <= 0 {
        return 0.0;
    }
    (position as f64 / text_length as f64 * 100.0).min(100.0)
}

/// Close an open session and roll its effects into the user and the book
async fn close_session(
    conn: &mut SqliteConnection,
    user_id: i64,
    session: &ReadingSession,
    mut end: SessionEnd,
) -> ApiResult<ReadingSession> {
    end.duration_minutes = duration_minutes(session.start_time, end.end_time);

    let previous_end = reading::previous_end_time(&mut *conn, user_id, session.id).await?;
    let current_streak = users::streak_days(&mut *conn, user_id).await?;
    let streak = next_streak(current_streak, previous_end, end.end_time);

    let finished = reading::finish_session(&mut *conn, user_id, session.id, &end).await?;
    users::record_reading(&mut *conn, user_id, end.duration_minutes, streak, &end.end_time).await?;

    let progress = books::text_length(&mut *conn, session.book_id)
        .await?
        .map(|len| progress_for(end.end_position, len));
    books::record_read(&mut *conn, session.book_id, &end.end_time, progress).await?;

    debug!(
        "Session {} closed: {} min, position {} -> {}, streak {}",
        session.id, end.duration_minutes, session.start_position, end.end_position, streak
    );

    Ok(finished)
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub book_id: i64,
    pub start_position: Option<i64>,
}

/// POST /api/reading/start-session
pub async fn start_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<StartSessionRequest>,
) -> ApiResult<Json<Value>> {
    if req.start_position.is_some_and(|p| p < 0) {
        return Err(ApiError::BadRequest("start_position must not be negative".to_string()));
    }

    let now = time::now();
    let mut tx = db::begin_write(&state.db).await?;

    if !books::is_owned(&mut tx, user.id, req.book_id).await? {
        return Err(book_not_found());
    }

    for open in reading::open_for_book(&mut tx, user.id, req.book_id).await? {
        let end = SessionEnd {
            end_time: now,
            end_position: open.end_position,
            words_learned: open.words_learned,
            words_reviewed: open.words_reviewed,
            new_words_encountered: open.new_words_encountered.clone(),
            words_looked_up: open.words_looked_up.clone(),
            ..Default::default()
        };
        close_session(&mut tx, user.id, &open, end).await?;
        info!("Closed stale session {} before starting a new one", open.id);
    }

    let start_position = match req.start_position {
        Some(position) => position,
        None => reading::last_end_position(&mut tx, user.id, req.book_id)
            .await?
            .unwrap_or(0),
    };

    let session = reading::insert_session(&mut tx, user.id, req.book_id, start_position, &now).await?;
    tx.commit().await?;

    info!(
        "User {} started session {} on book {} at {}",
        user.id, session.id, req.book_id, start_position
    );

    Ok(Json(json!({
        "message": "Reading session started",
        "session": session,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct EndSessionRequest {
    pub session_id: Option<i64>,
    pub end_position: Option<i64>,
    pub words_learned: Option<i64>,
    pub words_reviewed: Option<i64>,
    #[serde(default)]
    pub new_words_encountered: Vec<i64>,
    #[serde(default)]
    pub words_looked_up: Vec<i64>,
}

impl EndSessionRequest {
    fn validate(&self) -> ApiResult<()> {
        let negative = [self.end_position, self.words_learned, self.words_reviewed]
            .iter()
            .any(|v| v.is_some_and(|n| n < 0));
        if negative {
            return Err(ApiError::BadRequest(
                "Positions and word counts must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// POST /api/reading/end-session
pub async fn end_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<EndSessionRequest>,
) -> ApiResult<Json<Value>> {
    req.validate()?;

    let now = time::now();
    let mut tx = db::begin_write(&state.db).await?;

    let session = match req.session_id {
        Some(id) => {
            let session = reading::get_session(&mut tx, user.id, id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Reading session not found".to_string()))?;
            if session.end_time.is_some() {
                return Err(ApiError::Conflict("Reading session already ended".to_string()));
            }
            session
        }
        None => reading::latest_open(&mut tx, user.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("No active reading session".to_string()))?,
    };

    let end = SessionEnd {
        end_time: now,
        duration_minutes: 0,
        end_position: req.end_position.unwrap_or(session.end_position),
        words_learned: req.words_learned.unwrap_or(0),
        words_reviewed: req.words_reviewed.unwrap_or(0),
        new_words_encountered: req.new_words_encountered,
        words_looked_up: req.words_looked_up,
    };
    let finished = close_session(&mut tx, user.id, &session, end).await?;
    tx.commit().await?;

    info!(
        "User {} ended session {} after {} minutes",
        user.id,
        finished.id,
        finished.duration_minutes.unwrap_or(0)
    );

    Ok(Json(json!({
        "message": "Reading session ended",
        "session": finished,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionsQuery {
    pub book_id: Option<i64>,
}

/// GET /api/reading/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<SessionsQuery>,
) -> ApiResult<Json<Vec<ReadingSession>>> {
    Ok(Json(reading::list_sessions(&state.db, user.id, query.book_id).await?))
}

/// GET /api/reading/stats
pub async fn stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let totals = reading::totals(&state.db, user.id).await?;
    let looked_up = reading::looked_up_word_count(&state.db, user.id).await?;

    let average = if totals.finished_sessions > 0 {
        let avg = totals.finished_minutes as f64 / totals.finished_sessions as f64;
        (avg * 10.0).round() / 10.0
    } else {
        0.0
    };

    Ok(Json(json!({
        "total_reading_time": user.total_reading_time,
        "books_read": totals.books_read,
        "sessions_count": totals.sessions_count,
        "average_session_minutes": average,
        "words_learned": user.total_words_learned,
        "words_looked_up": looked_up,
        "streak_days": user.streak_days,
    })))
}

/// Build reading session routes
pub fn reading_routes() -> Router<AppState> {
    Router::new()
        .route("/api/reading/start-session", post(start_session))
        .route("/api/reading/end-session", post(end_session))
        .route("/api/reading/sessions", get(list_sessions))
        .route("/api/reading/stats", get(stats))
}
