//! Book annotations

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::CurrentUser;
use super::books::ensure_owned;
use crate::db::annotations::{self, Annotation, AnnotationChanges, AnnotationType, NewAnnotation};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath};
use crate::AppState;

fn annotation_not_found() -> ApiError {
    ApiError::NotFound("Annotation not found".to_string())
}

/// `#RRGGBB`
fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

fn validate_color(color: Option<&str>) -> ApiResult<()> {
    match color {
        Some(c) if !is_hex_color(c) => Err(ApiError::BadRequest(
            "highlight_color must be a #RRGGBB hex color".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_data(data: Option<&Value>) -> ApiResult<()> {
    match data {
        Some(v) if !v.is_object() => Err(ApiError::BadRequest(
            "annotation_data must be a JSON object".to_string(),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnotationRequest {
    pub start_position: i64,
    pub end_position: i64,
    pub selected_text: String,
    pub annotation_type: AnnotationType,
    pub annotation_data: Option<Value>,
    pub highlight_color: Option<String>,
}

impl CreateAnnotationRequest {
    fn validate(self) -> ApiResult<NewAnnotation> {
        if self.start_position < 0 || self.start_position >= self.end_position {
            return Err(ApiError::BadRequest(
                "start_position must be non-negative and less than end_position".to_string(),
            ));
        }
        if self.selected_text.trim().is_empty() {
            return Err(ApiError::BadRequest("selected_text must not be empty".to_string()));
        }
        validate_color(self.highlight_color.as_deref())?;
        validate_data(self.annotation_data.as_ref())?;

        Ok(NewAnnotation {
            start_position: self.start_position,
            end_position: self.end_position,
            selected_text: self.selected_text,
            annotation_type: self.annotation_type,
            annotation_data: self.annotation_data.unwrap_or_else(|| json!({})),
            highlight_color: self.highlight_color,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateAnnotationRequest {
    pub annotation_type: Option<AnnotationType>,
    pub annotation_data: Option<Value>,
    pub highlight_color: Option<String>,
}

/// GET /api/books/:id/annotations
pub async fn list_annotations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(book_id): ApiPath<i64>,
) -> ApiResult<Json<Vec<Annotation>>> {
    ensure_owned(&state, user.id, book_id).await?;
    Ok(Json(annotations::list_for_book(&state.db, user.id, book_id).await?))
}

/// POST /api/books/:id/annotations
pub async fn create_annotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(book_id): ApiPath<i64>,
    ApiJson(req): ApiJson<CreateAnnotationRequest>,
) -> ApiResult<(StatusCode, Json<Annotation>)> {
    let new = req.validate()?;
    ensure_owned(&state, user.id, book_id).await?;

    let created = annotations::create_annotation(&state.db, user.id, book_id, &new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/books/:id/annotations/:annotation_id
pub async fn get_annotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath((book_id, id)): ApiPath<(i64, i64)>,
) -> ApiResult<Json<Annotation>> {
    ensure_owned(&state, user.id, book_id).await?;
    let annotation = annotations::get_annotation(&state.db, user.id, book_id, id)
        .await?
        .ok_or_else(annotation_not_found)?;
    Ok(Json(annotation))
}

/// PUT /api/books/:id/annotations/:annotation_id
pub async fn update_annotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath((book_id, id)): ApiPath<(i64, i64)>,
    ApiJson(req): ApiJson<UpdateAnnotationRequest>,
) -> ApiResult<Json<Annotation>> {
    validate_color(req.highlight_color.as_deref())?;
    validate_data(req.annotation_data.as_ref())?;
    ensure_owned(&state, user.id, book_id).await?;

    let changes = AnnotationChanges {
        annotation_type: req.annotation_type,
        annotation_data: req.annotation_data,
        highlight_color: req.highlight_color,
    };

    let updated = annotations::update_annotation(&state.db, user.id, book_id, id, &changes)
        .await?
        .ok_or_else(annotation_not_found)?;
    Ok(Json(updated))
}

/// DELETE /api/books/:id/annotations/:annotation_id
pub async fn delete_annotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath((book_id, id)): ApiPath<(i64, i64)>,
) -> ApiResult<Json<Value>> {
    ensure_owned(&state, user.id, book_id).await?;
    if !annotations::delete_annotation(&state.db, user.id, book_id, id).await? {
        return Err(annotation_not_found());
    }
    Ok(Json(json!({ "message": "Annotation deleted successfully" })))
}

/// Build annotation routes
pub fn annotation_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/books/:id/annotations",
            get(list_annotations).post(create_annotation),
        )
        .route(
            "/api/books/:id/annotations/:annotation_id",
            get(get_annotation)
                .put(update_annotation)
                .delete(delete_annotation),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: i64, end: i64) -> CreateAnnotationRequest {
        CreateAnnotationRequest {
            start_position: start,
            end_position: end,
            selected_text: "猫".to_string(),
            annotation_type: AnnotationType::Highlight,
            annotation_data: None,
            highlight_color: Some("#ffcc00".to_string()),
        }
    }

    #[test]
    fn test_hex_color() {
        assert!(is_hex_color("#FFCC00"));
        assert!(is_hex_color("#a1b2c3"));
        assert!(!is_hex_color("FFCC00"));
        assert!(!is_hex_color("#FFF"));
        assert!(!is_hex_color("#GGGGGG"));
        assert!(!is_hex_color("#ＦＦＦＦＦ"));
    }

    #[test]
    fn test_range_validation() {
        assert!(request(0, 1).validate().is_ok());
        assert!(request(5, 5).validate().is_err());
        assert!(request(6, 5).validate().is_err());
        assert!(request(-1, 5).validate().is_err());
    }

    #[test]
    fn test_defaults_empty_data_object() {
        let new = request(0, 3).validate().unwrap();
        assert_eq!(new.annotation_data, json!({}));
    }

    #[test]
    fn test_rejects_non_object_data() {
        let mut req = request(0, 3);
        req.annotation_data = Some(json!([1, 2]));
        assert!(req.validate().is_err());

        let mut req = request(0, 3);
        req.selected_text = "  ".to_string();
        assert!(req.validate().is_err());
    }
}
