//! Dictionary lookup and per-user word knowledge

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use wana_kana::ConvertJapanese;

use super::auth::CurrentUser;
use super::books::book_not_found;
use crate::db::knowledge::{self, KnownWord, MarkKnown, KNOWN_LEVEL, MAX_KNOWLEDGE_LEVEL};
use crate::db::{self, books, users, words};
use crate::db::words::{NewDefinition, NewWord, WordEntry};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::AppState;

fn word_not_found() -> ApiError {
    ApiError::NotFound("Word not found".to_string())
}

/// Forms a lookup query matches: the query itself and its hiragana spelling
fn lookup_forms(query: &str) -> Vec<String> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let mut forms = vec![query.to_string()];
    let hiragana = query.to_hiragana();
    if hiragana != query {
        forms.push(hiragana);
    }
    forms
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    pub source: Option<String>,
}

/// GET /api/words/lookup/:word
pub async fn lookup_word(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(word): ApiPath<String>,
    ApiQuery(query): ApiQuery<LookupQuery>,
) -> ApiResult<Json<Value>> {
    let forms = lookup_forms(&word);
    let found = words::find_by_forms(&state.db, &forms).await?;

    let mut entries = Vec::with_capacity(found.len());
    for w in found {
        let definitions = words::definitions_for(&state.db, w.id, query.source.as_deref()).await?;
        entries.push(WordEntry { word: w, definitions });
    }

    let ids: Vec<i64> = entries.iter().map(|e| e.word.id).collect();
    let known = knowledge::for_words(&state.db, user.id, &ids).await?;

    debug!("Lookup '{}' matched {} entries", word, entries.len());

    Ok(Json(json!({
        "word": word,
        "entries": entries,
        "knowledge": known,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateWordRequest {
    #[serde(flatten)]
    pub word: NewWord,
    #[serde(default)]
    pub definitions: Vec<NewDefinition>,
}

fn check_level(name: &str, value: Option<i64>, max: i64) -> ApiResult<()> {
    match value {
        Some(v) if !(1..=max).contains(&v) => Err(ApiError::BadRequest(format!(
            "{} must be between 1 and {}",
            name, max
        ))),
        _ => Ok(()),
    }
}

fn validate_new_word(req: &CreateWordRequest) -> ApiResult<()> {
    if req.word.surface_form.trim().is_empty() {
        return Err(ApiError::BadRequest("surface_form must not be empty".to_string()));
    }
    check_level("jlpt_level", req.word.jlpt_level, 5)?;
    check_level("wanikani_level", req.word.wanikani_level, 60)?;
    check_level("kanken_level", req.word.kanken_level, 10)?;
    if let Some(rank) = req.word.frequency_rank {
        if rank < 1 {
            return Err(ApiError::BadRequest("frequency_rank must be positive".to_string()));
        }
    }
    for def in &req.definitions {
        if def.definition.trim().is_empty() || def.dictionary_source.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Definitions need a dictionary_source and definition text".to_string(),
            ));
        }
    }
    Ok(())
}

/// POST /api/words
pub async fn create_word(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<CreateWordRequest>,
) -> ApiResult<(StatusCode, Json<WordEntry>)> {
    validate_new_word(&req)?;

    let entry = words::create_entry(&state.db, &req.word, &req.definitions).await?;
    info!(
        "User {} added word {} '{}' with {} definitions",
        user.id,
        entry.word.id,
        entry.word.surface_form,
        entry.definitions.len()
    );

    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /api/words/:id
pub async fn get_word(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<WordEntry>> {
    let entry = words::get_entry(&state.db, id).await?.ok_or_else(word_not_found)?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
pub struct MarkKnownRequest {
    pub word_id: i64,
    pub knowledge_level: Option<i64>,
    pub book_id: Option<i64>,
    pub notes: Option<String>,
    pub is_ignored: Option<bool>,
}

/// POST /api/words/mark-known
///
/// Crossing the known threshold in either direction adjusts the user's
/// `total_words_learned` in the same transaction.
pub async fn mark_known(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<MarkKnownRequest>,
) -> ApiResult<Json<Value>> {
    let level = req.knowledge_level.unwrap_or(KNOWN_LEVEL);
    if !(0..=MAX_KNOWLEDGE_LEVEL).contains(&level) {
        return Err(ApiError::BadRequest(format!(
            "knowledge_level must be between 0 and {}",
            MAX_KNOWLEDGE_LEVEL
        )));
    }

    let mut tx = db::begin_write(&state.db).await?;

    if !words::exists(&mut tx, req.word_id).await? {
        return Err(word_not_found());
    }
    if let Some(book_id) = req.book_id {
        if !books::is_owned(&mut tx, user.id, book_id).await? {
            return Err(book_not_found());
        }
    }

    let mark = MarkKnown {
        word_id: req.word_id,
        knowledge_level: level,
        book_id: req.book_id,
        notes: req.notes,
        is_ignored: req.is_ignored,
    };
    let (stored, previous) = knowledge::mark_known(&mut tx, user.id, &mark).await?;

    let delta = knowledge::learned_delta(previous, level);
    if delta != 0 {
        users::adjust_words_learned(&mut tx, user.id, delta).await?;
    }

    tx.commit().await?;

    debug!(
        "User {} marked word {} at level {} (was {:?})",
        user.id, req.word_id, level, previous
    );

    Ok(Json(json!({
        "message": "Word knowledge updated",
        "knowledge": stored,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct KnownQuery {
    pub min_level: Option<i64>,
}

/// GET /api/words/known
pub async fn list_known(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<KnownQuery>,
) -> ApiResult<Json<Vec<KnownWord>>> {
    let min_level = query.min_level.unwrap_or(KNOWN_LEVEL);
    Ok(Json(knowledge::list_known(&state.db, user.id, min_level).await?))
}

/// Build word routes
pub fn word_routes() -> Router<AppState> {
    Router::new()
        .route("/api/words", post(create_word))
        .route("/api/words/lookup/:word", get(lookup_word))
        .route("/api/words/mark-known", post(mark_known))
        .route("/api/words/known", get(list_known))
        .route("/api/words/:id", get(get_word))
}
