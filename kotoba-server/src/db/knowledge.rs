//! Per-user word knowledge

use chrono::{DateTime, Utc};
use kotoba_common::{time, Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{get_ts, get_ts_opt};

/// Lowest level that counts a word as learned
pub const KNOWN_LEVEL: i64 = 3;
pub const MAX_KNOWLEDGE_LEVEL: i64 = 4;

#[derive(Debug, Clone, Serialize)]
pub struct Knowledge {
    pub id: i64,
    pub user_id: i64,
    pub word_id: i64,
    pub knowledge_level: i64,
    pub first_encountered_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub srs_level: i64,
    pub next_review_at: Option<DateTime<Utc>>,
    pub review_count: i64,
    pub correct_count: i64,
    pub streak: i64,
    pub first_seen_book_id: Option<i64>,
    pub times_encountered: i64,
    pub notes: Option<String>,
    pub is_ignored: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Knowledge row joined with the word it describes
#[derive(Debug, Clone, Serialize)]
pub struct KnownWord {
    #[serde(flatten)]
    pub knowledge: Knowledge,
    pub surface_form: String,
    pub reading: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MarkKnown {
    pub word_id: i64,
    pub knowledge_level: i64,
    pub book_id: Option<i64>,
    pub notes: Option<String>,
    pub is_ignored: Option<bool>,
}

/// Knowledge fields touched by a review
#[derive(Debug, Clone)]
pub struct ReviewUpdate {
    pub srs_level: i64,
    pub next_review_at: DateTime<Utc>,
    pub correct: bool,
    pub reviewed_at: DateTime<Utc>,
}

fn row_to_knowledge(row: &SqliteRow) -> Result<Knowledge> {
    Ok(Knowledge {
        id: row.get("id"),
        user_id: row.get("user_id"),
        word_id: row.get("word_id"),
        knowledge_level: row.get("knowledge_level"),
        first_encountered_at: get_ts(row, "first_encountered_at")?,
        last_reviewed_at: get_ts_opt(row, "last_reviewed_at")?,
        srs_level: row.get("srs_level"),
        next_review_at: get_ts_opt(row, "next_review_at")?,
        review_count: row.get("review_count"),
        correct_count: row.get("correct_count"),
        streak: row.get("streak"),
        first_seen_book_id: row.get("first_seen_book_id"),
        times_encountered: row.get("times_encountered"),
        notes: row.get("notes"),
        is_ignored: row.get("is_ignored"),
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

pub async fn get_knowledge(
    conn: &mut SqliteConnection,
    user_id: i64,
    word_id: i64,
) -> Result<Option<Knowledge>> {
    let row = sqlx::query("SELECT * FROM user_word_knowledge WHERE user_id = ? AND word_id = ?")
        .bind(user_id)
        .bind(word_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(row_to_knowledge).transpose()
}

/// The user's knowledge rows for a set of words
pub async fn for_words(pool: &SqlitePool, user_id: i64, word_ids: &[i64]) -> Result<Vec<Knowledge>> {
    if word_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
        "SELECT * FROM user_word_knowledge WHERE user_id = ",
    );
    qb.push_bind(user_id).push(" AND word_id IN (");
    let mut ids = qb.separated(", ");
    for id in word_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(") ORDER BY word_id");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(row_to_knowledge).collect()
}

/// Change in `total_words_learned` when a level moves from `old` to `new`
pub fn learned_delta(old: Option<i64>, new: i64) -> i64 {
    let was_known = old.is_some_and(|level| level >= KNOWN_LEVEL);
    let is_known = new >= KNOWN_LEVEL;
    match (was_known, is_known) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

/// Insert or update the user's knowledge of a word
///
/// Returns the stored row and the previous level (`None` if new).
pub async fn mark_known(
    conn: &mut SqliteConnection,
    user_id: i64,
    mark: &MarkKnown,
) -> Result<(Knowledge, Option<i64>)> {
    let now = time::format_db(&time::now());
    let existing = get_knowledge(&mut *conn, user_id, mark.word_id).await?;

    match &existing {
        Some(row) => {
            sqlx::query(
                r#"
                UPDATE user_word_knowledge SET
                    knowledge_level = ?,
                    times_encountered = times_encountered + 1,
                    notes = COALESCE(?, notes),
                    is_ignored = COALESCE(?, is_ignored),
                    first_seen_book_id = COALESCE(first_seen_book_id, ?),
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(mark.knowledge_level)
            .bind(mark.notes.as_deref())
            .bind(mark.is_ignored)
            .bind(mark.book_id)
            .bind(&now)
            .bind(row.id)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO user_word_knowledge (user_id, word_id, knowledge_level,
                                                 first_encountered_at, first_seen_book_id,
                                                 notes, is_ignored, times_encountered,
                                                 created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(mark.word_id)
            .bind(mark.knowledge_level)
            .bind(&now)
            .bind(mark.book_id)
            .bind(mark.notes.as_deref())
            .bind(mark.is_ignored.unwrap_or(false))
            .bind(&now)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
        }
    }

    let stored = get_knowledge(&mut *conn, user_id, mark.word_id)
        .await?
        .ok_or_else(|| Error::Internal("Knowledge row missing after upsert".to_string()))?;

    Ok((stored, existing.map(|row| row.knowledge_level)))
}

/// Mirror a card review onto the knowledge row, if the user has one
pub async fn apply_review(
    conn: &mut SqliteConnection,
    user_id: i64,
    word_id: i64,
    update: &ReviewUpdate,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE user_word_knowledge SET
            srs_level = ?,
            next_review_at = ?,
            review_count = review_count + 1,
            correct_count = correct_count + ?,
            streak = CASE WHEN ? THEN streak + 1 ELSE 0 END,
            last_reviewed_at = ?,
            updated_at = ?
        WHERE user_id = ? AND word_id = ?
        "#,
    )
    .bind(update.srs_level)
    .bind(time::format_db(&update.next_review_at))
    .bind(if update.correct { 1_i64 } else { 0 })
    .bind(update.correct)
    .bind(time::format_db(&update.reviewed_at))
    .bind(time::format_db(&update.reviewed_at))
    .bind(user_id)
    .bind(word_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// The user's words at or above `min_level`, most recently updated first
pub async fn list_known(pool: &SqlitePool, user_id: i64, min_level: i64) -> Result<Vec<KnownWord>> {
    let rows = sqlx::query(
        r#"
        SELECT k.*, w.surface_form AS surface_form, w.reading AS reading
        FROM user_word_knowledge k
        JOIN words w ON w.id = k.word_id
        WHERE k.user_id = ? AND k.knowledge_level >= ?
        ORDER BY k.updated_at DESC, k.id DESC
        "#,
    )
    .bind(user_id)
    .bind(min_level)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(KnownWord {
                knowledge: row_to_knowledge(row)?,
                surface_form: row.get("surface_form"),
                reading: row.get("reading"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learned_delta() {
        assert_eq!(learned_delta(None, 3), 1);
        assert_eq!(learned_delta(None, 2), 0);
        assert_eq!(learned_delta(Some(1), 4), 1);
        assert_eq!(learned_delta(Some(3), 4), 0);
        assert_eq!(learned_delta(Some(4), 2), -1);
        assert_eq!(learned_delta(Some(0), 0), 0);
    }
}
