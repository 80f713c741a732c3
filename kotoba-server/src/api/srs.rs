//! Spaced repetition: cards, reviews and statistics

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use kotoba_common::time;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::auth::CurrentUser;
use crate::db;
use crate::db::knowledge::{self, ReviewUpdate};
use crate::db::srs::{
    self, Card, CardType, DeviceType, NewCard, ReviewContext, ReviewMeta, ReviewRecord, SrsStats,
};
use crate::db::words::{self, WordEntry};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::scheduler::{self, Grade};
use crate::AppState;

const DEFAULT_DUE_LIMIT: i64 = 50;
const MAX_DUE_LIMIT: i64 = 500;

fn card_not_found() -> ApiError {
    ApiError::NotFound("Card not found".to_string())
}

/// Front side derived from the word: the text and its reading
fn default_front(entry: &WordEntry) -> Value {
    json!({
        "text": entry.word.surface_form,
        "furigana": entry.word.reading,
    })
}

/// Back side derived from the word's first definition
fn default_back(entry: &WordEntry) -> Value {
    let first = entry.definitions.first();
    json!({
        "definition": first.map(|d| d.definition.as_str()),
        "example": first.and_then(|d| d.example_sentence.as_deref()),
        "notes": Value::Null,
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateCardRequest {
    pub word_id: i64,
    #[serde(default)]
    pub card_type: CardType,
    pub front_content: Option<Value>,
    pub back_content: Option<Value>,
}

/// POST /api/srs/cards
pub async fn create_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<CreateCardRequest>,
) -> ApiResult<(StatusCode, Json<Card>)> {
    let entry = words::get_entry(&state.db, req.word_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Word not found".to_string()))?;

    let new = NewCard {
        word_id: req.word_id,
        card_type: req.card_type,
        front_content: req.front_content.unwrap_or_else(|| default_front(&entry)),
        back_content: req.back_content.unwrap_or_else(|| default_back(&entry)),
    };

    let card = srs::create_card(&state.db, user.id, &new).await?;
    info!(
        "User {} created {} card {} for word {}",
        user.id,
        card.card_type.as_str(),
        card.id,
        card.word_id
    );

    Ok((StatusCode::CREATED, Json(card)))
}

#[derive(Debug, Default, Deserialize)]
pub struct DueQuery {
    pub limit: Option<i64>,
}

/// Requested page size, defaulted and clamped
fn due_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_DUE_LIMIT).clamp(1, MAX_DUE_LIMIT)
}

/// GET /api/srs/due-cards
pub async fn due_cards(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<DueQuery>,
) -> ApiResult<Json<Value>> {
    let now = time::now();
    let cards = srs::due_cards(&state.db, user.id, &now, due_limit(query.limit)).await?;
    let total_due = srs::count_due(&state.db, user.id, &now).await?;

    Ok(Json(json!({
        "due_cards": cards,
        "total_due": total_due,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub card_id: i64,
    pub quality: i64,
    pub response_time_ms: Option<i64>,
    pub review_context: Option<ReviewContext>,
    pub device_type: Option<DeviceType>,
}

/// POST /api/srs/review
///
/// Card, history row and knowledge row are written in one transaction.
pub async fn review_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<ReviewRequest>,
) -> ApiResult<Json<Value>> {
    let grade = Grade::from_quality(req.quality)
        .ok_or_else(|| ApiError::BadRequest("quality must be between 1 and 4".to_string()))?;
    if req.response_time_ms.is_some_and(|ms| ms < 0) {
        return Err(ApiError::BadRequest("response_time_ms must not be negative".to_string()));
    }

    let now = time::now();
    let mut tx = db::begin_write(&state.db).await?;

    let card = srs::get_card(&mut tx, user.id, req.card_id)
        .await?
        .ok_or_else(card_not_found)?;
    if card.is_suspended {
        return Err(ApiError::Conflict("Card is suspended".to_string()));
    }

    let schedule = scheduler::schedule(&card.state(), grade, now);
    let meta = ReviewMeta {
        response_time_ms: req.response_time_ms,
        review_context: req.review_context,
        device_type: req.device_type,
    };
    let updated = srs::record_review(&mut tx, &card, grade.quality(), &schedule, &meta, &now).await?;

    knowledge::apply_review(
        &mut tx,
        user.id,
        card.word_id,
        &ReviewUpdate {
            srs_level: schedule.repetition_count,
            next_review_at: schedule.due_date,
            correct: schedule.correct,
            reviewed_at: now,
        },
    )
    .await?;

    tx.commit().await?;

    debug!(
        "Card {} graded {:?}: interval {} -> {} days, ease {:.2} -> {:.2}",
        card.id, grade, card.interval_days, schedule.interval_days, card.ease_factor, schedule.ease_factor
    );

    Ok(Json(json!({
        "message": "Review recorded",
        "correct": schedule.correct,
        "next_review": schedule.due_date,
        "card": updated,
    })))
}

/// GET /api/srs/cards/:id
pub async fn get_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Card>> {
    let mut conn = state.db.acquire().await?;
    let card = srs::get_card(&mut conn, user.id, id)
        .await?
        .ok_or_else(card_not_found)?;
    Ok(Json(card))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCardRequest {
    pub is_suspended: Option<bool>,
    pub is_buried: Option<bool>,
}

/// PATCH /api/srs/cards/:id
pub async fn update_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateCardRequest>,
) -> ApiResult<Json<Card>> {
    let card = srs::update_flags(&state.db, user.id, id, req.is_suspended, req.is_buried)
        .await?
        .ok_or_else(card_not_found)?;
    Ok(Json(card))
}

/// DELETE /api/srs/cards/:id
pub async fn delete_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Value>> {
    if !srs::delete_card(&state.db, user.id, id).await? {
        return Err(card_not_found());
    }
    info!("User {} deleted card {}", user.id, id);
    Ok(Json(json!({ "message": "Card deleted successfully" })))
}

/// GET /api/srs/cards/:id/history
pub async fn card_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Vec<ReviewRecord>>> {
    let mut conn = state.db.acquire().await?;
    if srs::get_card(&mut conn, user.id, id).await?.is_none() {
        return Err(card_not_found());
    }
    drop(conn);

    Ok(Json(srs::history(&state.db, user.id, id).await?))
}

/// GET /api/srs/stats
pub async fn stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<SrsStats>> {
    Ok(Json(srs::stats(&state.db, user.id, &time::now()).await?))
}

/// Build SRS routes
pub fn srs_routes() -> Router<AppState> {
    Router::new()
        .route("/api/srs/cards", post(create_card))
        .route("/api/srs/due-cards", get(due_cards))
        .route("/api/srs/review", post(review_card))
        .route(
            "/api/srs/cards/:id",
            get(get_card).patch(update_card).delete(delete_card),
        )
        .route("/api/srs/cards/:id/history", get(card_history))
        .route("/api/srs/stats", get(stats))
}
