//! Uploaded books

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use kotoba_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{get_json, get_ts, get_ts_opt};
use crate::text::{Chapter, Extracted, TextStats};

/// Book processing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(Error::Internal(format!("Unknown processing status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Book {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub language: String,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub processing_status: ProcessingStatus,
    pub word_count: i64,
    pub unique_word_count: i64,
    pub difficulty_level: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub reading_progress: f64,
    pub chapter_data: Vec<Chapter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBook<'a> {
    pub user_id: i64,
    pub title: &'a str,
    pub file_path: &'a str,
    pub file_name: &'a str,
    pub file_size: i64,
    pub mime_type: &'a str,
}

/// Columns for list/get; the text column is swapped in only on request
fn select_columns(include_text: bool) -> String {
    format!(
        "id, user_id, title, author, language, file_path, file_name, file_size, mime_type, \
         processing_status, word_count, unique_word_count, difficulty_level, uploaded_at, \
         last_read_at, reading_progress, chapter_data, {} AS extracted_text",
        if include_text { "extracted_text" } else { "NULL" }
    )
}

fn row_to_book(row: &SqliteRow) -> Result<Book> {
    let status: String = row.get("processing_status");
    Ok(Book {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        author: row.get("author"),
        language: row.get("language"),
        file_path: row.get("file_path"),
        file_name: row.get("file_name"),
        file_size: row.get("file_size"),
        mime_type: row.get("mime_type"),
        processing_status: status.parse()?,
        word_count: row.get("word_count"),
        unique_word_count: row.get("unique_word_count"),
        difficulty_level: row.get("difficulty_level"),
        uploaded_at: get_ts(row, "uploaded_at")?,
        last_read_at: get_ts_opt(row, "last_read_at")?,
        reading_progress: row.get("reading_progress"),
        chapter_data: get_json(row, "chapter_data")?,
        extracted_text: row.get("extracted_text"),
    })
}

pub async fn insert_book(pool: &SqlitePool, new: &NewBook<'_>) -> Result<Book> {
    let id = sqlx::query(
        r#"
        INSERT INTO books (user_id, title, file_path, file_name, file_size, mime_type,
                           processing_status, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(new.user_id)
    .bind(new.title)
    .bind(new.file_path)
    .bind(new.file_name)
    .bind(new.file_size)
    .bind(new.mime_type)
    .bind(time::format_db(&time::now()))
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_book(pool, new.user_id, id, false)
        .await?
        .ok_or_else(|| Error::Internal(format!("Book {} missing after insert", id)))
}

/// The user's books, newest first, without extracted text
pub async fn list_books(pool: &SqlitePool, user_id: i64) -> Result<Vec<Book>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM books WHERE user_id = ? ORDER BY uploaded_at DESC, id DESC",
        select_columns(false)
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_book).collect()
}

pub async fn get_book(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    include_text: bool,
) -> Result<Option<Book>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM books WHERE id = ? AND user_id = ?",
        select_columns(include_text)
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_book).transpose()
}

/// True when the book exists and belongs to the user
pub async fn is_owned(conn: &mut SqliteConnection, user_id: i64, id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

/// Delete the row; returns the removed book so the caller can unlink its file
pub async fn delete_book(pool: &SqlitePool, user_id: i64, id: i64) -> Result<Option<Book>> {
    let Some(book) = get_book(pool, user_id, id, false).await? else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM books WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(Some(book))
}

/// Outcome of trying to move a book into `processing`
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyProcessing,
    NotFound,
}

/// Atomically flip a book to `processing` unless it already is
pub async fn claim_for_processing(pool: &SqlitePool, user_id: i64, id: i64) -> Result<ClaimOutcome> {
    let result = sqlx::query(
        "UPDATE books SET processing_status = 'processing' \
         WHERE id = ? AND user_id = ? AND processing_status != 'processing'",
    )
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(ClaimOutcome::Claimed);
    }

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(if exists > 0 {
        ClaimOutcome::AlreadyProcessing
    } else {
        ClaimOutcome::NotFound
    })
}

/// Store extraction and analysis results and mark the book completed
///
/// A metadata title replaces the title only while it is still the upload's
/// file name; an existing author is never overwritten.
pub async fn store_processed(
    pool: &SqlitePool,
    id: i64,
    extracted: &Extracted,
    stats: &TextStats,
) -> Result<()> {
    let title = extracted
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    sqlx::query(
        r#"
        UPDATE books SET
            processing_status = 'completed',
            extracted_text = ?,
            chapter_data = ?,
            word_count = ?,
            unique_word_count = ?,
            difficulty_level = ?,
            title = CASE WHEN title = file_name THEN COALESCE(?, title) ELSE title END,
            author = COALESCE(author, ?)
        WHERE id = ?
        "#,
    )
    .bind(&extracted.text)
    .bind(serde_json::to_string(&extracted.chapters)?)
    .bind(stats.word_count)
    .bind(stats.unique_word_count)
    .bind(stats.difficulty.map(|d| d.as_str()))
    .bind(title)
    .bind(extracted.author.as_deref())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE books SET processing_status = 'failed' WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Set reading progress (percentage, two decimals) and `last_read_at`
pub async fn update_progress(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    progress: f64,
) -> Result<Option<Book>> {
    let result = sqlx::query(
        "UPDATE books SET reading_progress = ?, last_read_at = ? WHERE id = ? AND user_id = ?",
    )
    .bind(round_progress(progress))
    .bind(time::format_db(&time::now()))
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_book(pool, user_id, id, false).await
}

/// Length of the extracted text in characters, if any
pub async fn text_length(conn: &mut SqliteConnection, id: i64) -> Result<Option<i64>> {
    let len: Option<i64> = sqlx::query_scalar("SELECT length(extracted_text) FROM books WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .flatten();
    Ok(len.filter(|n| *n > 0))
}

/// Mark the book read at `at`, optionally with a new progress value
pub async fn record_read(
    conn: &mut SqliteConnection,
    id: i64,
    at: &DateTime<Utc>,
    progress: Option<f64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE books SET last_read_at = ?, reading_progress = COALESCE(?, reading_progress) WHERE id = ?",
    )
    .bind(time::format_db(at))
    .bind(progress.map(round_progress))
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Clamp to 0..=100 and round to two decimals
pub fn round_progress(progress: f64) -> f64 {
    (progress.clamp(0.0, 100.0) * 100.0).round() / 100.0
}
