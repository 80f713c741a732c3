//! User accounts and per-user aggregates

use chrono::{DateTime, Utc};
use kotoba_common::{time, Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{conflict_on_unique, get_json, get_ts, get_ts_opt};

/// User account; the password hash never leaves the server
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub preferred_language: String,
    pub learning_preferences: Value,
    pub total_words_learned: i64,
    /// Minutes
    pub total_reading_time: i64,
    pub streak_days: i64,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub hashed_password: &'a str,
    pub preferred_language: &'a str,
}

const USER_COLUMNS: &str = "id, username, email, hashed_password, created_at, updated_at, \
    last_activity, is_active, preferred_language, learning_preferences, \
    total_words_learned, total_reading_time, streak_days";

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        hashed_password: row.get("hashed_password"),
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
        last_activity: get_ts_opt(row, "last_activity")?,
        is_active: row.get("is_active"),
        preferred_language: row.get("preferred_language"),
        learning_preferences: get_json(row, "learning_preferences")?,
        total_words_learned: row.get("total_words_learned"),
        total_reading_time: row.get("total_reading_time"),
        streak_days: row.get("streak_days"),
    })
}

/// Insert a user; duplicate username or email is `Conflict`
pub async fn create_user(pool: &SqlitePool, new: &NewUser<'_>) -> Result<User> {
    let now = time::format_db(&time::now());

    let id = sqlx::query(
        r#"
        INSERT INTO users (username, email, hashed_password, preferred_language, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.username)
    .bind(new.email)
    .bind(new.hashed_password)
    .bind(new.preferred_language)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "Username or email already exists"))?
    .last_insert_rowid();

    get_user(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("User {} missing after insert", id)))
}

/// True when either the username or the email is taken
pub async fn username_or_email_taken(pool: &SqlitePool, username: &str, email: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? OR email = ?")
        .bind(username)
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_user).transpose()
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS))
        .bind(username)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_user).transpose()
}

/// Record that the user did something now
pub async fn touch_last_activity(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET last_activity = ? WHERE id = ?")
        .bind(time::format_db(&time::now()))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Partial profile update; `None` fields are left unchanged
pub async fn update_profile(
    pool: &SqlitePool,
    id: i64,
    preferred_language: Option<&str>,
    learning_preferences: Option<&Value>,
) -> Result<User> {
    let preferences = learning_preferences.map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        UPDATE users SET
            preferred_language = COALESCE(?, preferred_language),
            learning_preferences = COALESCE(?, learning_preferences),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(preferred_language)
    .bind(preferences)
    .bind(time::format_db(&time::now()))
    .bind(id)
    .execute(pool)
    .await?;

    get_user(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))
}

/// Shift `total_words_learned` by `delta`, never below zero
pub async fn adjust_words_learned(conn: &mut SqliteConnection, id: i64, delta: i64) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    sqlx::query(
        "UPDATE users SET total_words_learned = MAX(0, total_words_learned + ?), updated_at = ? WHERE id = ?",
    )
    .bind(delta)
    .bind(time::format_db(&time::now()))
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Current streak length, read inside a transaction
pub async fn streak_days(conn: &mut SqliteConnection, id: i64) -> Result<i64> {
    let streak: i64 = sqlx::query_scalar("SELECT streak_days FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(streak)
}

/// Add finished reading time and store the new streak
pub async fn record_reading(
    conn: &mut SqliteConnection,
    id: i64,
    minutes: i64,
    streak_days: i64,
    at: &DateTime<Utc>,
) -> Result<()> {
    let ts = time::format_db(at);
    sqlx::query(
        r#"
        UPDATE users SET
            total_reading_time = total_reading_time + ?,
            streak_days = ?,
            last_activity = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(minutes.max(0))
    .bind(streak_days)
    .bind(&ts)
    .bind(&ts)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}
