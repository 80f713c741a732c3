//! Authentication endpoints and the current-user extractor
//!
//! Clients send `Authorization: Bearer <token>`; tokens are issued by
//! `/api/auth/login` (JSON) or `/api/auth/token` (form, OAuth2 password flow).

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use kotoba_common::auth::{hash_password, verify_password, TOKEN_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::db::users::{self, NewUser, User};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiForm, ApiJson};
use crate::AppState;

const USERNAME_MIN_CHARS: usize = 3;
const USERNAME_MAX_CHARS: usize = 50;
const EMAIL_MAX_CHARS: usize = 100;
const PASSWORD_MIN_CHARS: usize = 6;

/// The authenticated, active user making the request
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("Authorization header is required".to_string()))?;

        let token = header
            .to_str()
            .ok()
            .and_then(bearer_token)
            .ok_or_else(|| ApiError::Unauthorized("Invalid authorization header format".to_string()))?;

        let claims = state.tokens.verify(token).map_err(|e| {
            debug!("Rejected token: {}", e);
            ApiError::Unauthorized("Invalid token".to_string())
        })?;

        let user = users::get_user(&state.db, claims.user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| ApiError::Unauthorized("User not found or inactive".to_string()))?;

        Ok(CurrentUser(user))
    }
}

/// Token from a `Bearer <token>` header value (scheme is case-insensitive)
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// ========================================
// Validation
// ========================================

/// Registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&len) {
        return Err(format!(
            "Username must be between {} and {} characters",
            USERNAME_MIN_CHARS, USERNAME_MAX_CHARS
        ));
    }
    if username.chars().any(char::is_whitespace) {
        return Err("Username must not contain whitespace".to_string());
    }
    Ok(())
}

/// Accepts `local@domain.tld`
fn validate_email(email: &str) -> Result<(), String> {
    let invalid = || "Invalid email address".to_string();

    if email.chars().count() > EMAIL_MAX_CHARS || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_CHARS
        ));
    }
    Ok(())
}

fn validate_registration(req: &RegisterRequest) -> Result<(), String> {
    validate_username(&req.username)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    Ok(())
}

// ========================================
// Handlers
// ========================================

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();
    let req = RegisterRequest {
        username,
        email,
        ..req
    };
    validate_registration(&req).map_err(ApiError::BadRequest)?;

    if users::username_or_email_taken(&state.db, &req.username, &req.email).await? {
        return Err(ApiError::BadRequest("Username or email already exists".to_string()));
    }

    let hashed_password = hash_password(&req.password)?;
    let user = users::create_user(
        &state.db,
        &NewUser {
            username: &req.username,
            email: &req.email,
            hashed_password: &hashed_password,
            preferred_language: req.preferred_language.as_deref().unwrap_or("en"),
        },
    )
    .await
    .map_err(|e| match e {
        // lost a race with a concurrent registration
        kotoba_common::Error::Conflict(msg) => ApiError::BadRequest(msg),
        other => other.into(),
    })?;

    info!("Registered user {} (id {})", user.username, user.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "user": user,
        })),
    ))
}

/// Login credentials (JSON body or form fields)
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

async fn authenticate(state: &AppState, creds: &LoginRequest) -> ApiResult<Json<Value>> {
    let user = users::find_by_username(&state.db, creds.username.trim())
        .await?
        .filter(|user| verify_password(&creds.password, &user.hashed_password))
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is inactive".to_string()));
    }

    let access_token = state.tokens.issue(user.id, &user.username)?;
    users::touch_last_activity(&state.db, user.id).await?;

    info!("User {} logged in", user.username);

    Ok(Json(json!({
        "access_token": access_token,
        "token_type": TOKEN_TYPE,
        "expires_in": state.tokens.lifetime_seconds(),
        "user": user,
    })))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<LoginRequest>,
) -> ApiResult<Json<Value>> {
    authenticate(&state, &creds).await
}

/// POST /api/auth/token
pub async fn token(
    State(state): State<AppState>,
    ApiForm(creds): ApiForm<LoginRequest>,
) -> ApiResult<Json<Value>> {
    authenticate(&state, &creds).await
}

/// GET /api/auth/me
pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub preferred_language: Option<String>,
    pub learning_preferences: Option<Value>,
}

/// PUT /api/auth/me
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    if let Some(prefs) = &req.learning_preferences {
        if !prefs.is_object() {
            return Err(ApiError::BadRequest(
                "learning_preferences must be a JSON object".to_string(),
            ));
        }
    }
    if let Some(lang) = &req.preferred_language {
        let len = lang.trim().chars().count();
        if len == 0 || len > 10 {
            return Err(ApiError::BadRequest("Invalid preferred_language".to_string()));
        }
    }

    let updated = users::update_profile(
        &state.db,
        user.id,
        req.preferred_language.as_deref().map(str::trim),
        req.learning_preferences.as_ref(),
    )
    .await?;

    Ok(Json(updated))
}

/// POST /api/auth/logout
///
/// Tokens are stateless; the client discards its copy.
pub async fn logout(CurrentUser(user): CurrentUser) -> Json<Value> {
    debug!("User {} logged out", user.username);
    Json(json!({ "message": "Successfully logged out" }))
}

/// Build authentication routes
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/token", post(token))
        .route("/api/auth/me", get(me).put(update_me))
        .route("/api/auth/logout", post(logout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer  xyz "), Some("xyz"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }

    #[test]
    fn test_username_length() {
        assert!(validate_username("ab").is_err());
        assert!(validate_username("abc").is_ok());
        assert!(validate_username(&"a".repeat(50)).is_ok());
        assert!(validate_username(&"a".repeat(51)).is_err());
        // counted in characters, not bytes
        assert!(validate_username("ゆき子").is_ok());
        assert!(validate_username("a b").is_err());
    }

    #[test]
    fn test_email_shape() {
        assert!(validate_email("yuki@example.com").is_ok());
        assert!(validate_email("yuki@mail.example.co.jp").is_ok());
        assert!(validate_email("yuki@example").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("yuki@@example.com").is_err());
        assert!(validate_email("yuki@example..com").is_err());
        assert!(validate_email("yuki example@x.com").is_err());
        assert!(validate_email("yukiexample.com").is_err());
    }

    #[test]
    fn test_password_length() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }
}
