//! Integration tests for reading sessions and reading statistics

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::Duration;
use common::TestApp;
use kotoba_common::time;
use serde_json::{json, Value};
use tower::util::ServiceExt;

/// 200 characters of text
fn book_text() -> String {
    "吾輩は猫である。".repeat(25)
}

async fn start(app: &TestApp, token: &str, body: Value) -> Value {
    let (status, body) = app
        .call("POST", "/api/reading/start-session", Some(token), Some(body))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["session"].clone()
}

/// Move a session's start back by `minutes` plus a few seconds
async fn backdate(app: &TestApp, session_id: i64, minutes: i64) {
    let start = time::now() - Duration::minutes(minutes) - Duration::seconds(5);
    sqlx::query("UPDATE reading_sessions SET start_time = ? WHERE id = ?")
        .bind(time::format_db(&start))
        .bind(session_id)
        .execute(&app.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_end_session_records_duration_and_reading_time() {
    let app = TestApp::new().await;
    let token = app.login_new_user("reader").await;
    let book_id = app.upload_text(&token, &book_text()).await;

    let session = start(&app, &token, json!({ "book_id": book_id })).await;
    assert_eq!(session["start_position"], 0);
    assert!(session["end_time"].is_null());
    let session_id = session["id"].as_i64().unwrap();
    backdate(&app, session_id, 30).await;

    let (status, body) = app
        .call(
            "POST",
            "/api/reading/end-session",
            Some(&token),
            Some(json!({
                "session_id": session_id,
                "end_position": 50,
                "words_learned": 3,
                "words_looked_up": [7, 8, 7],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let ended = &body["session"];
    assert_eq!(ended["duration_minutes"], 30);
    assert_eq!(ended["end_position"], 50);
    assert_eq!(ended["words_learned"], 3);
    assert!(ended["end_time"].is_string());

    let (_, me) = app.call("GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(me["total_reading_time"], 30);
    assert_eq!(me["streak_days"], 1);

    // unprocessed book: no text length, progress untouched but last_read_at set
    let (_, book) = app
        .call("GET", &format!("/api/books/{}", book_id), Some(&token), None)
        .await;
    assert_eq!(book["reading_progress"], 0.0);
    assert!(book["last_read_at"].is_string());

    let (_, stats) = app.call("GET", "/api/reading/stats", Some(&token), None).await;
    assert_eq!(stats["total_reading_time"], 30);
    assert_eq!(stats["books_read"], 1);
    assert_eq!(stats["sessions_count"], 1);
    assert_eq!(stats["average_session_minutes"], 30.0);
    assert_eq!(stats["words_looked_up"], 2);
    assert_eq!(stats["streak_days"], 1);
}

#[tokio::test]
async fn test_end_session_sets_progress_for_processed_book() {
    let app = TestApp::new().await;
    let token = app.login_new_user("reader").await;
    let book_id = app.upload_text(&token, &book_text()).await;

    let (status, _) = app
        .call("POST", &format!("/api/books/{}/process", book_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    start(&app, &token, json!({ "book_id": book_id })).await;
    let (status, _) = app
        .call(
            "POST",
            "/api/reading/end-session",
            Some(&token),
            Some(json!({ "end_position": 50 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, book) = app
        .call("GET", &format!("/api/books/{}", book_id), Some(&token), None)
        .await;
    assert_eq!(book["reading_progress"], 25.0);

    // beyond the end clamps to 100
    start(&app, &token, json!({ "book_id": book_id })).await;
    app.call(
        "POST",
        "/api/reading/end-session",
        Some(&token),
        Some(json!({ "end_position": 5000 })),
    )
    .await;
    let (_, book) = app
        .call("GET", &format!("/api/books/{}", book_id), Some(&token), None)
        .await;
    assert_eq!(book["reading_progress"], 100.0);
}

#[tokio::test]
async fn test_start_resumes_from_last_position() {
    let app = TestApp::new().await;
    let token = app.login_new_user("reader").await;
    let book_id = app.upload_text(&token, &book_text()).await;

    start(&app, &token, json!({ "book_id": book_id, "start_position": 12 })).await;
    app.call(
        "POST",
        "/api/reading/end-session",
        Some(&token),
        Some(json!({ "end_position": 80 })),
    )
    .await;

    let session = start(&app, &token, json!({ "book_id": book_id })).await;
    assert_eq!(session["start_position"], 80);
}

#[tokio::test]
async fn test_start_closes_open_session_on_same_book() {
    let app = TestApp::new().await;
    let token = app.login_new_user("reader").await;
    let book_id = app.upload_text(&token, &book_text()).await;

    let first = start(&app, &token, json!({ "book_id": book_id, "start_position": 40 })).await;
    let second = start(&app, &token, json!({ "book_id": book_id })).await;
    assert_ne!(first["id"], second["id"]);
    assert_eq!(second["start_position"], 40);

    let (_, sessions) = app
        .call(
            "GET",
            &format!("/api/reading/sessions?book_id={}", book_id),
            Some(&token),
            None,
        )
        .await;
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    let open: Vec<&Value> = sessions.iter().filter(|s| s["end_time"].is_null()).collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["id"], second["id"]);
}

#[tokio::test]
async fn test_end_session_errors() {
    let app = TestApp::new().await;
    let token = app.login_new_user("reader").await;
    let other = app.login_new_user("other").await;
    let book_id = app.upload_text(&token, &book_text()).await;

    let (status, body) = app
        .call("POST", "/api/reading/end-session", Some(&token), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "No active reading session");

    let session = start(&app, &token, json!({ "book_id": book_id })).await;
    let session_id = session["id"].as_i64().unwrap();

    let (status, _) = app
        .call(
            "POST",
            "/api/reading/end-session",
            Some(&other),
            Some(json!({ "session_id": session_id })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let body = json!({ "session_id": session_id });
    let (status, _) = app
        .call("POST", "/api/reading/end-session", Some(&token), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call("POST", "/api/reading/end-session", Some(&token), Some(body))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_start_requires_own_book() {
    let app = TestApp::new().await;
    let alice = app.login_new_user("alice").await;
    let bob = app.login_new_user("bob").await;
    let book_id = app.upload_text(&alice, &book_text()).await;

    let (status, body) = app
        .call(
            "POST",
            "/api/reading/start-session",
            Some(&bob),
            Some(json!({ "book_id": book_id })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Book not found");
}

#[tokio::test]
async fn test_streak_continues_from_yesterday() {
    let app = TestApp::new().await;
    let token = app.login_new_user("reader").await;
    let book_id = app.upload_text(&token, &book_text()).await;

    // a session finished yesterday with a one-day streak
    let yesterday = time::format_db(&(time::now() - Duration::days(1)));
    sqlx::query(
        r#"
        INSERT INTO reading_sessions (user_id, book_id, start_time, end_time, duration_minutes,
                                      start_position, end_position, created_at)
        SELECT user_id, id, ?, ?, 10, 0, 20, ? FROM books WHERE id = ?
        "#,
    )
    .bind(&yesterday)
    .bind(&yesterday)
    .bind(&yesterday)
    .bind(book_id)
    .execute(&app.db)
    .await
    .unwrap();
    sqlx::query("UPDATE users SET streak_days = 1")
        .execute(&app.db)
        .await
        .unwrap();

    start(&app, &token, json!({ "book_id": book_id })).await;
    app.call("POST", "/api/reading/end-session", Some(&token), Some(json!({})))
        .await;

    let (_, me) = app.call("GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(me["streak_days"], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sessions_on_different_books() {
    let app = TestApp::new().await;
    let token = app.login_new_user("reader").await;
    let mut book_ids = Vec::new();
    for _ in 0..12 {
        book_ids.push(app.upload_text(&token, &book_text()).await);
    }

    let send_all = |uri: &'static str, bodies: Vec<Value>| {
        bodies
            .into_iter()
            .map(|body| {
                let router = app.router.clone();
                let request = Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap();
                tokio::spawn(async move { router.oneshot(request).await.unwrap().status() })
            })
            .collect::<Vec<_>>()
    };

    let starts = book_ids.iter().map(|id| json!({ "book_id": id })).collect();
    for handle in send_all("/api/reading/start-session", starts) {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let (_, sessions) = app.call("GET", "/api/reading/sessions", Some(&token), None).await;
    let ends = sessions
        .as_array()
        .unwrap()
        .iter()
        .map(|s| json!({ "session_id": s["id"], "end_position": 10 }))
        .collect();
    for handle in send_all("/api/reading/end-session", ends) {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let (_, stats) = app.call("GET", "/api/reading/stats", Some(&token), None).await;
    assert_eq!(stats["sessions_count"], 12);
    assert_eq!(stats["books_read"], 12);
    assert_eq!(stats["streak_days"], 1);
}
