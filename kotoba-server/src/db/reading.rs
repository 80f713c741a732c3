//! Reading sessions

use chrono::{DateTime, Utc};
use kotoba_common::{time, Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{get_json, get_ts, get_ts_opt};

#[derive(Debug, Clone, Serialize)]
pub struct ReadingSession {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub start_position: i64,
    pub end_position: i64,
    pub words_learned: i64,
    pub words_reviewed: i64,
    pub new_words_encountered: Vec<i64>,
    pub words_looked_up: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// Values written when a session ends
#[derive(Debug, Clone, Default)]
pub struct SessionEnd {
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub end_position: i64,
    pub words_learned: i64,
    pub words_reviewed: i64,
    pub new_words_encountered: Vec<i64>,
    pub words_looked_up: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionTotals {
    pub sessions_count: i64,
    pub books_read: i64,
    pub finished_minutes: i64,
    pub finished_sessions: i64,
}

fn row_to_session(row: &SqliteRow) -> Result<ReadingSession> {
    Ok(ReadingSession {
        id: row.get("id"),
        user_id: row.get("user_id"),
        book_id: row.get("book_id"),
        start_time: get_ts(row, "start_time")?,
        end_time: get_ts_opt(row, "end_time")?,
        duration_minutes: row.get("duration_minutes"),
        start_position: row.get("start_position"),
        end_position: row.get("end_position"),
        words_learned: row.get("words_learned"),
        words_reviewed: row.get("words_reviewed"),
        new_words_encountered: get_json(row, "new_words_encountered")?,
        words_looked_up: get_json(row, "words_looked_up")?,
        created_at: get_ts(row, "created_at")?,
    })
}

pub async fn get_session(
    conn: &mut SqliteConnection,
    user_id: i64,
    id: i64,
) -> Result<Option<ReadingSession>> {
    let row = sqlx::query("SELECT * FROM reading_sessions WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(row_to_session).transpose()
}

/// The user's most recently started session that has not ended
pub async fn latest_open(conn: &mut SqliteConnection, user_id: i64) -> Result<Option<ReadingSession>> {
    let row = sqlx::query(
        "SELECT * FROM reading_sessions WHERE user_id = ? AND end_time IS NULL \
         ORDER BY start_time DESC, id DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(row_to_session).transpose()
}

/// Open sessions of the user on one book
pub async fn open_for_book(
    conn: &mut SqliteConnection,
    user_id: i64,
    book_id: i64,
) -> Result<Vec<ReadingSession>> {
    let rows = sqlx::query(
        "SELECT * FROM reading_sessions WHERE user_id = ? AND book_id = ? AND end_time IS NULL",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_all(conn)
    .await?;
    rows.iter().map(row_to_session).collect()
}

/// End position of the last finished session on a book
pub async fn last_end_position(
    conn: &mut SqliteConnection,
    user_id: i64,
    book_id: i64,
) -> Result<Option<i64>> {
    let position: Option<i64> = sqlx::query_scalar(
        "SELECT end_position FROM reading_sessions \
         WHERE user_id = ? AND book_id = ? AND end_time IS NOT NULL \
         ORDER BY end_time DESC, id DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_optional(conn)
    .await?;
    Ok(position)
}

/// End time of the user's latest finished session other than `exclude_id`
pub async fn previous_end_time(
    conn: &mut SqliteConnection,
    user_id: i64,
    exclude_id: i64,
) -> Result<Option<DateTime<Utc>>> {
    let end: Option<String> = sqlx::query_scalar(
        "SELECT end_time FROM reading_sessions \
         WHERE user_id = ? AND id != ? AND end_time IS NOT NULL \
         ORDER BY end_time DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(exclude_id)
    .fetch_optional(conn)
    .await?;
    time::parse_db_opt(end)
}

pub async fn insert_session(
    conn: &mut SqliteConnection,
    user_id: i64,
    book_id: i64,
    start_position: i64,
    start_time: &DateTime<Utc>,
) -> Result<ReadingSession> {
    let ts = time::format_db(start_time);
    let id = sqlx::query(
        r#"
        INSERT INTO reading_sessions (user_id, book_id, start_time, start_position, end_position, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(&ts)
    .bind(start_position)
    .bind(start_position)
    .bind(&ts)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    get_session(conn, user_id, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Session {} missing after insert", id)))
}

/// Write the end-of-session values; only affects sessions still open
pub async fn finish_session(
    conn: &mut SqliteConnection,
    user_id: i64,
    id: i64,
    end: &SessionEnd,
) -> Result<ReadingSession> {
    sqlx::query(
        r#"
        UPDATE reading_sessions SET
            end_time = ?,
            duration_minutes = ?,
            end_position = ?,
            words_learned = ?,
            words_reviewed = ?,
            new_words_encountered = ?,
            words_looked_up = ?
        WHERE id = ? AND user_id = ? AND end_time IS NULL
        "#,
    )
    .bind(time::format_db(&end.end_time))
    .bind(end.duration_minutes)
    .bind(end.end_position)
    .bind(end.words_learned)
    .bind(end.words_reviewed)
    .bind(serde_json::to_string(&end.new_words_encountered)?)
    .bind(serde_json::to_string(&end.words_looked_up)?)
    .bind(id)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    get_session(conn, user_id, id)
        .await?
        .ok_or_else(|| Error::NotFound("Reading session not found".to_string()))
}

/// The user's sessions, newest first, optionally for one book
pub async fn list_sessions(
    pool: &SqlitePool,
    user_id: i64,
    book_id: Option<i64>,
) -> Result<Vec<ReadingSession>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM reading_sessions
        WHERE user_id = ? AND (? IS NULL OR book_id = ?)
        ORDER BY start_time DESC, id DESC
        "#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(book_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_session).collect()
}

pub async fn totals(pool: &SqlitePool, user_id: i64) -> Result<SessionTotals> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS sessions_count,
            COUNT(DISTINCT book_id) AS books_read,
            COALESCE(SUM(duration_minutes), 0) AS finished_minutes,
            COALESCE(SUM(CASE WHEN end_time IS NOT NULL THEN 1 ELSE 0 END), 0) AS finished_sessions
        FROM reading_sessions
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(SessionTotals {
        sessions_count: row.get("sessions_count"),
        books_read: row.get("books_read"),
        finished_minutes: row.get("finished_minutes"),
        finished_sessions: row.get("finished_sessions"),
    })
}

/// Distinct words looked up across all the user's sessions
pub async fn looked_up_word_count(pool: &SqlitePool, user_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT j.value)
        FROM reading_sessions s, json_each(s.words_looked_up) j
        WHERE s.user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
