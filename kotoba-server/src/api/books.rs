//! Book upload, processing and reading progress

use std::path::Path;

use axum::{
    extract::{multipart::Field, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::auth::CurrentUser;
use crate::db::books::{self, Book, ClaimOutcome, NewBook};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiMultipart, ApiPath, ApiQuery};
use crate::text::{self, extract};
use crate::AppState;

const UNSUPPORTED_TYPE: &str = "File type not supported. Please upload EPUB, TXT, or PDF files.";
const MAX_STORED_NAME_CHARS: usize = 100;

pub(crate) fn book_not_found() -> ApiError {
    ApiError::NotFound("Book not found".to_string())
}

/// 404 unless the book exists and belongs to `user_id`
pub(crate) async fn ensure_owned(state: &AppState, user_id: i64, book_id: i64) -> ApiResult<()> {
    let mut conn = state.db.acquire().await?;
    if books::is_owned(&mut conn, user_id, book_id).await? {
        Ok(())
    } else {
        Err(book_not_found())
    }
}

/// Content type of an uploaded part
///
/// The declared type wins; a missing or generic declaration falls back to
/// the file extension.
fn resolve_mime(declared: Option<&str>, file_name: &str) -> Option<&'static str> {
    let declared = declared.map(extract::normalize_mime).filter(|m| !m.is_empty());

    match declared.as_deref() {
        Some("application/octet-stream") | None => extract::mime_from_file_name(file_name),
        Some(mime) => extract::supported_mime(mime),
    }
}

/// Reduce a client-supplied file name to a safe single path component
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .take(MAX_STORED_NAME_CHARS)
        .collect();

    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "book".to_string()
    } else {
        cleaned
    }
}

/// Stream a multipart field to `path`, enforcing the size limit
///
/// Returns the number of bytes written.
async fn write_field(field: &mut Field<'_>, path: &Path, max_bytes: u64) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await? {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "File exceeds the maximum upload size of {} bytes",
                max_bytes
            )));
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// GET /api/books/
pub async fn list_books(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<Book>>> {
    Ok(Json(books::list_books(&state.db, user.id).await?))
}

/// POST /api/books/upload
pub async fn upload_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiMultipart(mut multipart): ApiMultipart,
) -> ApiResult<Json<Value>> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("book")
            .to_string();

        let mime = resolve_mime(field.content_type(), &file_name)
            .ok_or_else(|| ApiError::BadRequest(UNSUPPORTED_TYPE.to_string()))?;

        let stored_name = format!("{}_{}_{}", user.id, Uuid::new_v4(), sanitize_file_name(&file_name));
        let path = state.config.upload_dir.join(&stored_name);

        let size = match write_field(&mut field, &path, state.config.max_upload_bytes).await {
            Ok(size) => size,
            Err(e) => {
                remove_quietly(&path).await;
                return Err(e);
            }
        };

        let file_path = path.to_string_lossy().into_owned();
        let inserted = books::insert_book(
            &state.db,
            &NewBook {
                user_id: user.id,
                title: &file_name,
                file_path: &file_path,
                file_name: &file_name,
                file_size: size as i64,
                mime_type: mime,
            },
        )
        .await;

        let book = match inserted {
            Ok(book) => book,
            Err(e) => {
                remove_quietly(&path).await;
                return Err(e.into());
            }
        };

        info!(
            "User {} uploaded '{}' ({} bytes, {}) as book {}",
            user.id, file_name, size, mime, book.id
        );

        return Ok(Json(json!({
            "message": "Book uploaded successfully",
            "book": book,
        })));
    }

    Err(ApiError::BadRequest("No file provided".to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub struct BookQuery {
    #[serde(default)]
    pub include_text: bool,
}

/// GET /api/books/:id
pub async fn get_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<BookQuery>,
) -> ApiResult<Json<Book>> {
    let book = books::get_book(&state.db, user.id, id, query.include_text)
        .await?
        .ok_or_else(book_not_found)?;
    Ok(Json(book))
}

/// DELETE /api/books/:id
pub async fn delete_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    let book = books::delete_book(&state.db, user.id, id)
        .await?
        .ok_or_else(book_not_found)?;

    match tokio::fs::remove_file(&book.file_path).await {
        Ok(()) => debug!("Removed {}", book.file_path),
        Err(e) => warn!("Book {} deleted but file {} not removed: {}", id, book.file_path, e),
    }

    info!("User {} deleted book {}", user.id, id);
    Ok(Json(json!({ "message": "Book deleted successfully" })))
}

/// Extract, analyse and store a claimed book
///
/// Any failure leaves the book `failed` rather than `processing`.
async fn process_claimed(db: SqlitePool, user_id: i64, id: i64) -> ApiResult<()> {
    let result = extract_and_store(&db, user_id, id).await;
    if result.is_err() {
        if let Err(e) = books::mark_failed(&db, id).await {
            error!("Could not mark book {} as failed: {}", id, e);
        }
    }
    result
}

async fn extract_and_store(db: &SqlitePool, user_id: i64, id: i64) -> ApiResult<()> {
    let book = books::get_book(db, user_id, id, false)
        .await?
        .ok_or_else(book_not_found)?;

    let path = book.file_path.clone();
    let mime = book
        .mime_type
        .clone()
        .or_else(|| extract::mime_from_file_name(&book.file_name).map(str::to_string))
        .unwrap_or_default();

    info!("Processing book {} ({})", id, mime);

    let outcome = tokio::task::spawn_blocking(move || {
        let extracted = extract::extract_file(Path::new(&path), &mime)?;
        let stats = text::analyze(&extracted.text);
        Ok::<_, extract::ExtractError>((extracted, stats))
    })
    .await;

    let (extracted, stats) = match outcome {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            warn!("Extraction failed for book {}: {}", id, e);
            return Err(ApiError::Unprocessable(e.to_string()));
        }
        Err(join_err) => {
            error!("Extraction task for book {} aborted: {}", id, join_err);
            return Err(ApiError::Unprocessable(
                "Text extraction failed unexpectedly".to_string(),
            ));
        }
    };

    books::store_processed(db, id, &extracted, &stats).await?;

    info!(
        "Book {} processed: {} words ({} unique), {} chapters, kanji {:.0}%, difficulty {}",
        id,
        stats.word_count,
        stats.unique_word_count,
        extracted.chapters.len(),
        stats.kanji_ratio * 100.0,
        stats.difficulty.map(|d| d.as_str()).unwrap_or("n/a")
    );

    Ok(())
}

/// POST /api/books/:id/process
///
/// The book stays `processing` until extraction settles; a second request
/// meanwhile is rejected. The work runs as a detached task so a client
/// disconnect does not abandon a claimed book.
pub async fn process_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    match books::claim_for_processing(&state.db, user.id, id).await? {
        ClaimOutcome::Claimed => {}
        ClaimOutcome::AlreadyProcessing => {
            return Err(ApiError::Conflict("Book is already being processed".to_string()))
        }
        ClaimOutcome::NotFound => return Err(book_not_found()),
    }

    tokio::spawn(process_claimed(state.db.clone(), user.id, id))
        .await
        .map_err(|e| ApiError::Internal(format!("Processing task for book {} failed: {}", id, e)))??;

    let book = books::get_book(&state.db, user.id, id, false)
        .await?
        .ok_or_else(book_not_found)?;

    Ok(Json(json!({
        "message": "Book processed successfully",
        "book": book,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub reading_progress: f64,
}

/// PUT /api/books/:id/progress
pub async fn update_progress(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ProgressRequest>,
) -> ApiResult<Json<Book>> {
    if !(0.0..=100.0).contains(&req.reading_progress) {
        return Err(ApiError::BadRequest(
            "reading_progress must be between 0 and 100".to_string(),
        ));
    }

    let book = books::update_progress(&state.db, user.id, id, req.reading_progress)
        .await?
        .ok_or_else(book_not_found)?;
    Ok(Json(book))
}

/// Build book routes
pub fn book_routes() -> Router<AppState> {
    Router::new()
        .route("/api/books/", get(list_books))
        .route("/api/books/upload", post(upload_book))
        .route("/api/books/:id", get(get_book).delete(delete_book))
        .route("/api/books/:id/process", post(process_book))
        .route("/api/books/:id/progress", put(update_progress))
}
