//! Highlights, notes and lookup markers attached to book text ranges

use chrono::{DateTime, Utc};
use kotoba_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_json, get_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    WordLookup,
    Note,
    Highlight,
}

impl AnnotationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationType::WordLookup => "word_lookup",
            AnnotationType::Note => "note",
            AnnotationType::Highlight => "highlight",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "word_lookup" => Ok(AnnotationType::WordLookup),
            "note" => Ok(AnnotationType::Note),
            "highlight" => Ok(AnnotationType::Highlight),
            other => Err(Error::Internal(format!("Unknown annotation type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub start_position: i64,
    pub end_position: i64,
    pub selected_text: String,
    pub annotation_type: AnnotationType,
    pub annotation_data: Value,
    pub highlight_color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnnotation {
    pub start_position: i64,
    pub end_position: i64,
    pub selected_text: String,
    pub annotation_type: AnnotationType,
    pub annotation_data: Value,
    pub highlight_color: Option<String>,
}

/// Partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct AnnotationChanges {
    pub annotation_type: Option<AnnotationType>,
    pub annotation_data: Option<Value>,
    pub highlight_color: Option<String>,
}

fn row_to_annotation(row: &SqliteRow) -> Result<Annotation> {
    let kind: String = row.get("annotation_type");
    Ok(Annotation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        book_id: row.get("book_id"),
        start_position: row.get("start_position"),
        end_position: row.get("end_position"),
        selected_text: row.get("selected_text"),
        annotation_type: AnnotationType::parse(&kind)?,
        annotation_data: get_json(row, "annotation_data")?,
        highlight_color: row.get("highlight_color"),
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

pub async fn list_for_book(pool: &SqlitePool, user_id: i64, book_id: i64) -> Result<Vec<Annotation>> {
    let rows = sqlx::query(
        "SELECT * FROM book_annotations WHERE user_id = ? AND book_id = ? ORDER BY start_position, id",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_annotation).collect()
}

pub async fn get_annotation(
    pool: &SqlitePool,
    user_id: i64,
    book_id: i64,
    id: i64,
) -> Result<Option<Annotation>> {
    let row = sqlx::query("SELECT * FROM book_annotations WHERE id = ? AND user_id = ? AND book_id = ?")
        .bind(id)
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_annotation).transpose()
}

pub async fn create_annotation(
    pool: &SqlitePool,
    user_id: i64,
    book_id: i64,
    new: &NewAnnotation,
) -> Result<Annotation> {
    let now = time::format_db(&time::now());

    let id = sqlx::query(
        r#"
        INSERT INTO book_annotations (user_id, book_id, start_position, end_position, selected_text,
                                      annotation_type, annotation_data, highlight_color,
                                      created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(new.start_position)
    .bind(new.end_position)
    .bind(&new.selected_text)
    .bind(new.annotation_type.as_str())
    .bind(serde_json::to_string(&new.annotation_data)?)
    .bind(new.highlight_color.as_deref())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_annotation(pool, user_id, book_id, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Annotation {} missing after insert", id)))
}

pub async fn update_annotation(
    pool: &SqlitePool,
    user_id: i64,
    book_id: i64,
    id: i64,
    changes: &AnnotationChanges,
) -> Result<Option<Annotation>> {
    let data = changes
        .annotation_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE book_annotations SET
            annotation_type = COALESCE(?, annotation_type),
            annotation_data = COALESCE(?, annotation_data),
            highlight_color = COALESCE(?, highlight_color),
            updated_at = ?
        WHERE id = ? AND user_id = ? AND book_id = ?
        "#,
    )
    .bind(changes.annotation_type.map(|t| t.as_str()))
    .bind(data)
    .bind(changes.highlight_color.as_deref())
    .bind(time::format_db(&time::now()))
    .bind(id)
    .bind(user_id)
    .bind(book_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_annotation(pool, user_id, book_id, id).await
}

/// Returns false when nothing matched
pub async fn delete_annotation(pool: &SqlitePool, user_id: i64, book_id: i64, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM book_annotations WHERE id = ? AND user_id = ? AND book_id = ?")
        .bind(id)
        .bind(user_id)
        .bind(book_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
