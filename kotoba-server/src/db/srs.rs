//! SRS cards and review history

use chrono::{DateTime, Duration, Utc};
use kotoba_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{conflict_on_unique, get_json, get_ts, get_ts_opt};
use crate::scheduler::{self, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    #[default]
    Recognition,
    Recall,
    Production,
}

impl CardType {
    pub fn as_str(self) -> &'static str {
        match self {
            CardType::Recognition => "recognition",
            CardType::Recall => "recall",
            CardType::Production => "production",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "recognition" => Ok(CardType::Recognition),
            "recall" => Ok(CardType::Recall),
            "production" => Ok(CardType::Production),
            other => Err(Error::Internal(format!("Unknown card type '{}'", other))),
        }
    }
}

/// Where a review happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewContext {
    Reader,
    SrsSession,
    Manual,
}

impl ReviewContext {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewContext::Reader => "reader",
            ReviewContext::SrsSession => "srs_session",
            ReviewContext::Manual => "manual",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "reader" => Ok(ReviewContext::Reader),
            "srs_session" => Ok(ReviewContext::SrsSession),
            "manual" => Ok(ReviewContext::Manual),
            other => Err(Error::Internal(format!("Unknown review context '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "desktop" => Ok(DeviceType::Desktop),
            "mobile" => Ok(DeviceType::Mobile),
            "tablet" => Ok(DeviceType::Tablet),
            other => Err(Error::Internal(format!("Unknown device type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub id: i64,
    pub user_id: i64,
    pub word_id: i64,
    pub card_type: CardType,
    pub front_content: Value,
    pub back_content: Value,
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetition_count: i64,
    pub due_date: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub total_reviews: i64,
    pub correct_reviews: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub is_suspended: bool,
    pub is_buried: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    pub fn state(&self) -> scheduler::CardState {
        scheduler::CardState {
            ease_factor: self.ease_factor,
            interval_days: self.interval_days,
            repetition_count: self.repetition_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewRecord {
    pub id: i64,
    pub user_id: i64,
    pub card_id: i64,
    pub reviewed_at: DateTime<Utc>,
    pub response_quality: i64,
    pub response_time_ms: Option<i64>,
    pub old_interval: Option<i64>,
    pub old_ease_factor: Option<f64>,
    pub new_interval: Option<i64>,
    pub new_ease_factor: Option<f64>,
    pub new_due_date: Option<DateTime<Utc>>,
    pub review_context: Option<ReviewContext>,
    pub device_type: Option<DeviceType>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCard {
    pub word_id: i64,
    pub card_type: CardType,
    pub front_content: Value,
    pub back_content: Value,
}

/// Review metadata supplied by the client
#[derive(Debug, Clone, Default)]
pub struct ReviewMeta {
    pub response_time_ms: Option<i64>,
    pub review_context: Option<ReviewContext>,
    pub device_type: Option<DeviceType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SrsStats {
    pub total_cards: i64,
    pub due_cards: i64,
    pub suspended_cards: i64,
    pub new_cards: i64,
    pub reviews_today: i64,
    pub total_reviews: i64,
    pub correct_reviews: i64,
    /// Correct / total reviews, 0 when nothing has been reviewed
    pub retention_rate: f64,
}

fn row_to_card(row: &SqliteRow) -> Result<Card> {
    let card_type: String = row.get("card_type");
    Ok(Card {
        id: row.get("id"),
        user_id: row.get("user_id"),
        word_id: row.get("word_id"),
        card_type: CardType::parse(&card_type)?,
        front_content: get_json(row, "front_content")?,
        back_content: get_json(row, "back_content")?,
        ease_factor: row.get("ease_factor"),
        interval_days: row.get("interval_days"),
        repetition_count: row.get("repetition_count"),
        due_date: get_ts(row, "due_date")?,
        last_reviewed_at: get_ts_opt(row, "last_reviewed_at")?,
        total_reviews: row.get("total_reviews"),
        correct_reviews: row.get("correct_reviews"),
        current_streak: row.get("current_streak"),
        longest_streak: row.get("longest_streak"),
        is_suspended: row.get("is_suspended"),
        is_buried: row.get("is_buried"),
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn row_to_review(row: &SqliteRow) -> Result<ReviewRecord> {
    let context: Option<String> = row.get("review_context");
    let device: Option<String> = row.get("device_type");
    Ok(ReviewRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        card_id: row.get("card_id"),
        reviewed_at: get_ts(row, "reviewed_at")?,
        response_quality: row.get("response_quality"),
        response_time_ms: row.get("response_time_ms"),
        old_interval: row.get("old_interval"),
        old_ease_factor: row.get("old_ease_factor"),
        new_interval: row.get("new_interval"),
        new_ease_factor: row.get("new_ease_factor"),
        new_due_date: get_ts_opt(row, "new_due_date")?,
        review_context: context.as_deref().map(ReviewContext::parse).transpose()?,
        device_type: device.as_deref().map(DeviceType::parse).transpose()?,
        created_at: get_ts(row, "created_at")?,
    })
}

/// Create a card due immediately; one card per (user, word, type)
pub async fn create_card(pool: &SqlitePool, user_id: i64, new: &NewCard) -> Result<Card> {
    let now = time::format_db(&time::now());

    let id = sqlx::query(
        r#"
        INSERT INTO srs_cards (user_id, word_id, card_type, front_content, back_content,
                               ease_factor, interval_days, repetition_count, due_date,
                               created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, 0, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(new.word_id)
    .bind(new.card_type.as_str())
    .bind(serde_json::to_string(&new.front_content)?)
    .bind(serde_json::to_string(&new.back_content)?)
    .bind(scheduler::DEFAULT_EASE)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "A card of this type already exists for this word"))?
    .last_insert_rowid();

    let mut conn = pool.acquire().await?;
    get_card(&mut conn, user_id, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Card {} missing after insert", id)))
}

pub async fn get_card(conn: &mut SqliteConnection, user_id: i64, id: i64) -> Result<Option<Card>> {
    let row = sqlx::query("SELECT * FROM srs_cards WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(row_to_card).transpose()
}

/// Cards due at `now`, excluding suspended and buried, earliest first
pub async fn due_cards(
    pool: &SqlitePool,
    user_id: i64,
    now: &DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Card>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM srs_cards
        WHERE user_id = ? AND due_date <= ? AND is_suspended = 0 AND is_buried = 0
        ORDER BY due_date, id
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(time::format_db(now))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_card).collect()
}

pub async fn count_due(pool: &SqlitePool, user_id: i64, now: &DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM srs_cards \
         WHERE user_id = ? AND due_date <= ? AND is_suspended = 0 AND is_buried = 0",
    )
    .bind(user_id)
    .bind(time::format_db(now))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Set suspension / burial flags; `None` leaves a flag unchanged
pub async fn update_flags(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    is_suspended: Option<bool>,
    is_buried: Option<bool>,
) -> Result<Option<Card>> {
    let result = sqlx::query(
        r#"
        UPDATE srs_cards SET
            is_suspended = COALESCE(?, is_suspended),
            is_buried = COALESCE(?, is_buried),
            updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(is_suspended)
    .bind(is_buried)
    .bind(time::format_db(&time::now()))
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    let mut conn = pool.acquire().await?;
    get_card(&mut conn, user_id, id).await
}

/// Returns false when nothing matched; history rows cascade
pub async fn delete_card(pool: &SqlitePool, user_id: i64, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM srs_cards WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Persist a graded card and append the history row
///
/// Runs on the caller's transaction. Returns the updated card.
pub async fn record_review(
    conn: &mut SqliteConnection,
    card: &Card,
    quality: i64,
    schedule: &Schedule,
    meta: &ReviewMeta,
    now: &DateTime<Utc>,
) -> Result<Card> {
    let now_str = time::format_db(now);
    let due_str = time::format_db(&schedule.due_date);
    let (current_streak, longest_streak) =
        scheduler::update_streaks(card.current_streak, card.longest_streak, schedule.correct);

    sqlx::query(
        r#"
        UPDATE srs_cards SET
            ease_factor = ?,
            interval_days = ?,
            repetition_count = ?,
            due_date = ?,
            last_reviewed_at = ?,
            total_reviews = total_reviews + 1,
            correct_reviews = correct_reviews + ?,
            current_streak = ?,
            longest_streak = ?,
            is_buried = 0,
            updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(schedule.ease_factor)
    .bind(schedule.interval_days)
    .bind(schedule.repetition_count)
    .bind(&due_str)
    .bind(&now_str)
    .bind(if schedule.correct { 1_i64 } else { 0 })
    .bind(current_streak)
    .bind(longest_streak)
    .bind(&now_str)
    .bind(card.id)
    .bind(card.user_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO review_history (user_id, card_id, reviewed_at, response_quality,
                                    response_time_ms, old_interval, old_ease_factor,
                                    new_interval, new_ease_factor, new_due_date,
                                    review_context, device_type, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(card.user_id)
    .bind(card.id)
    .bind(&now_str)
    .bind(quality)
    .bind(meta.response_time_ms)
    .bind(card.interval_days)
    .bind(card.ease_factor)
    .bind(schedule.interval_days)
    .bind(schedule.ease_factor)
    .bind(&due_str)
    .bind(meta.review_context.map(ReviewContext::as_str))
    .bind(meta.device_type.map(DeviceType::as_str))
    .bind(&now_str)
    .execute(&mut *conn)
    .await?;

    get_card(conn, card.user_id, card.id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Card {} missing after review", card.id)))
}

/// A card's reviews, newest first
pub async fn history(pool: &SqlitePool, user_id: i64, card_id: i64) -> Result<Vec<ReviewRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM review_history WHERE user_id = ? AND card_id = ? ORDER BY reviewed_at DESC, id DESC",
    )
    .bind(user_id)
    .bind(card_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_review).collect()
}

/// Start of the UTC day containing `now`
fn day_start(now: &DateTime<Utc>) -> DateTime<Utc> {
    let start = time::utc_day(now).and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    start.unwrap_or_else(|| *now - Duration::hours(24))
}

pub async fn stats(pool: &SqlitePool, user_id: i64, now: &DateTime<Utc>) -> Result<SrsStats> {
    let now_str = time::format_db(now);

    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_cards,
            COALESCE(SUM(CASE WHEN due_date <= ? AND is_suspended = 0 AND is_buried = 0
                              THEN 1 ELSE 0 END), 0) AS due_cards,
            COALESCE(SUM(is_suspended), 0) AS suspended_cards,
            COALESCE(SUM(CASE WHEN total_reviews = 0 THEN 1 ELSE 0 END), 0) AS new_cards
        FROM srs_cards
        WHERE user_id = ?
        "#,
    )
    .bind(&now_str)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let reviews = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_reviews,
            COALESCE(SUM(CASE WHEN response_quality >= 2 THEN 1 ELSE 0 END), 0) AS correct_reviews,
            COALESCE(SUM(CASE WHEN reviewed_at >= ? THEN 1 ELSE 0 END), 0) AS reviews_today
        FROM review_history
        WHERE user_id = ?
        "#,
    )
    .bind(time::format_db(&day_start(now)))
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let total_reviews: i64 = reviews.get("total_reviews");
    let correct_reviews: i64 = reviews.get("correct_reviews");
    let retention_rate = if total_reviews > 0 {
        ((correct_reviews as f64 / total_reviews as f64) * 10_000.0).round() / 10_000.0
    } else {
        0.0
    };

    Ok(SrsStats {
        total_cards: row.get("total_cards"),
        due_cards: row.get("due_cards"),
        suspended_cards: row.get("suspended_cards"),
        new_cards: row.get("new_cards"),
        reviews_today: reviews.get("reviews_today"),
        total_reviews,
        correct_reviews,
        retention_rate,
    })
}
