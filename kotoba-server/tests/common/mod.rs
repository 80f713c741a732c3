//! Shared harness for API integration tests
//!
//! Each test gets its own temporary data directory, SQLite database and
//! upload directory; requests go through the full router via `oneshot`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use kotoba_common::auth::TokenSigner;
use kotoba_common::config::ServerConfig;
use kotoba_server::{build_router, AppState};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

pub const TEST_SECRET: &str = "integration-test-secret";
pub const PASSWORD: &str = "correct-horse";
pub const BOUNDARY: &str = "kotoba-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub db: SqlitePool,
    pub upload_dir: PathBuf,
    pub tokens: TokenSigner,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_max_upload(1024 * 1024).await
    }

    pub async fn with_max_upload(max_upload_bytes: u64) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let data_dir = dir.path().to_path_buf();

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path: data_dir.join("kotoba.db"),
            upload_dir: data_dir.join("uploads"),
            static_dir: data_dir.join("static"),
            data_dir: data_dir.clone(),
            token_secret: Some(TEST_SECRET.to_string()),
            token_expiry_hours: 24,
            max_upload_bytes,
            frontend_url: None,
            cors_origins: vec!["http://localhost:3000".to_string()],
            log_level: "warn".to_string(),
        };
        config.ensure_directories().expect("create directories");

        let db = kotoba_common::db::init_database(&config.database_path)
            .await
            .expect("init database");

        let tokens = TokenSigner::new(TEST_SECRET, config.token_expiry_hours);
        let upload_dir = config.upload_dir.clone();
        let state = AppState::new(db.clone(), config, tokens.clone());

        Self {
            router: build_router(state),
            db,
            upload_dir,
            tokens,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    /// JSON request, optionally authenticated
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn register(&self, username: &str) -> (StatusCode, Value) {
        self.call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": PASSWORD,
            })),
        )
        .await
    }

    /// Register and log in; returns the access token
    pub async fn login_new_user(&self, username: &str) -> String {
        let (status, _) = self.register(username).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = self
            .call(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().expect("token").to_string()
    }

    pub async fn upload(
        &self,
        token: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/books/upload")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(file_name, content_type, bytes)))
            .unwrap();
        self.send(request).await
    }

    /// Upload a UTF-8 text book and return its id
    pub async fn upload_text(&self, token: &str, text: &str) -> i64 {
        let (status, body) = self.upload(token, "book.txt", "text/plain", text.as_bytes()).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["book"]["id"].as_i64().expect("book id")
    }

    pub fn uploaded_files(&self) -> Vec<PathBuf> {
        list_files(&self.upload_dir)
    }
}

/// Single-part `multipart/form-data` body with a `file` field
pub fn multipart_body(file_name: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
