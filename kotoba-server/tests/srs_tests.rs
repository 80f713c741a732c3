//! Integration tests for the dictionary, word knowledge and SRS review flow

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

async fn add_word(app: &TestApp, token: &str, body: Value) -> i64 {
    let (status, entry) = app.call("POST", "/api/words", Some(token), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", entry);
    entry["id"].as_i64().expect("word id")
}

async fn add_neko(app: &TestApp, token: &str) -> i64 {
    add_word(
        app,
        token,
        json!({
            "surface_form": "猫",
            "reading": "ねこ",
            "part_of_speech": "noun",
            "jlpt_level": 5,
            "frequency_rank": 1200,
            "definitions": [
                {
                    "dictionary_source": "jmdict",
                    "definition": "cat",
                    "example_sentence": "猫が好きです。",
                    "tags": ["common"],
                },
                {
                    "dictionary_source": "jmdict",
                    "definition": "shamisen (slang)",
                },
            ],
        }),
    )
    .await
}

async fn create_card(app: &TestApp, token: &str, word_id: i64) -> Value {
    let (status, card) = app
        .call("POST", "/api/srs/cards", Some(token), Some(json!({ "word_id": word_id })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", card);
    card
}

async fn review(app: &TestApp, token: &str, card_id: i64, quality: i64) -> (StatusCode, Value) {
    app.call(
        "POST",
        "/api/srs/review",
        Some(token),
        Some(json!({ "card_id": card_id, "quality": quality, "response_time_ms": 1800 })),
    )
    .await
}

#[tokio::test]
async fn test_lookup_matches_reading_and_katakana() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let word_id = add_neko(&app, &token).await;

    for query in ["猫", "ねこ", "ネコ"] {
        let (status, body) = app
            .call("GET", &format!("/api/words/lookup/{}", urlencode(query)), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["word"], query);

        let entries = body["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1, "{}", query);
        assert_eq!(entries[0]["id"], word_id);
        let defs = entries[0]["definitions"].as_array().unwrap();
        assert_eq!(defs[0]["definition"], "cat");
        assert_eq!(defs[0]["definition_order"], 1);
        assert_eq!(defs[1]["definition_order"], 2);
    }

    let (status, body) = app
        .call("GET", &format!("/api/words/lookup/{}", urlencode("犬")), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_lookup_orders_by_frequency() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;

    let unranked = add_word(&app, &token, json!({ "surface_form": "橋", "reading": "はし" })).await;
    let rare = add_word(
        &app,
        &token,
        json!({ "surface_form": "端", "reading": "はし", "frequency_rank": 5000 }),
    )
    .await;
    let common_word = add_word(
        &app,
        &token,
        json!({ "surface_form": "箸", "reading": "はし", "frequency_rank": 800 }),
    )
    .await;

    let (_, body) = app
        .call("GET", &format!("/api/words/lookup/{}", urlencode("はし")), Some(&token), None)
        .await;
    let ids: Vec<i64> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![common_word, rare, unranked]);
}

#[tokio::test]
async fn test_word_level_validation() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;

    let (status, _) = app
        .call(
            "POST",
            "/api/words",
            Some(&token),
            Some(json!({ "surface_form": "猫", "jlpt_level": 6 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.call("GET", "/api/words/9999", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mark_known_tracks_words_learned() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let word_id = add_neko(&app, &token).await;

    let learned = |app: &TestApp| {
        let db = app.db.clone();
        async move {
            sqlx::query_scalar::<_, i64>("SELECT total_words_learned FROM users WHERE username = 'learner'")
                .fetch_one(&db)
                .await
                .unwrap()
        }
    };

    let (status, body) = app
        .call(
            "POST",
            "/api/words/mark-known",
            Some(&token),
            Some(json!({ "word_id": word_id, "knowledge_level": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["knowledge"]["times_encountered"], 1);
    assert_eq!(learned(&app).await, 0);

    // default level crosses the threshold
    let (_, body) = app
        .call("POST", "/api/words/mark-known", Some(&token), Some(json!({ "word_id": word_id })))
        .await;
    assert_eq!(body["knowledge"]["knowledge_level"], 3);
    assert_eq!(body["knowledge"]["times_encountered"], 2);
    assert_eq!(learned(&app).await, 1);

    // staying above the threshold changes nothing
    app.call(
        "POST",
        "/api/words/mark-known",
        Some(&token),
        Some(json!({ "word_id": word_id, "knowledge_level": 4 })),
    )
    .await;
    assert_eq!(learned(&app).await, 1);

    // dropping back below decrements
    app.call(
        "POST",
        "/api/words/mark-known",
        Some(&token),
        Some(json!({ "word_id": word_id, "knowledge_level": 0 })),
    )
    .await;
    assert_eq!(learned(&app).await, 0);

    let (status, _) = app
        .call(
            "POST",
            "/api/words/mark-known",
            Some(&token),
            Some(json!({ "word_id": word_id, "knowledge_level": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call("POST", "/api/words/mark-known", Some(&token), Some(json!({ "word_id": 424242 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mark_known_rejects_foreign_book() {
    let app = TestApp::new().await;
    let alice = app.login_new_user("alice").await;
    let bob = app.login_new_user("bob").await;
    let word_id = add_neko(&app, &alice).await;
    let book_id = app.upload_text(&alice, "猫").await;

    let (status, body) = app
        .call(
            "POST",
            "/api/words/mark-known",
            Some(&bob),
            Some(json!({ "word_id": word_id, "book_id": book_id })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Book not found");

    let (status, body) = app
        .call(
            "POST",
            "/api/words/mark-known",
            Some(&alice),
            Some(json!({ "word_id": word_id, "book_id": book_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["knowledge"]["first_seen_book_id"], book_id);

    let (_, known) = app.call("GET", "/api/words/known", Some(&alice), None).await;
    let known = known.as_array().unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0]["surface_form"], "猫");
}

#[tokio::test]
async fn test_card_defaults_and_duplicates() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let word_id = add_neko(&app, &token).await;

    let card = create_card(&app, &token, word_id).await;
    assert_eq!(card["card_type"], "recognition");
    assert_eq!(card["front_content"]["text"], "猫");
    assert_eq!(card["front_content"]["furigana"], "ねこ");
    assert_eq!(card["back_content"]["definition"], "cat");
    assert_eq!(card["back_content"]["example"], "猫が好きです。");
    assert_eq!(card["ease_factor"], 2.5);
    assert_eq!(card["repetition_count"], 0);

    let (status, _) = app
        .call("POST", "/api/srs/cards", Some(&token), Some(json!({ "word_id": word_id })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            "POST",
            "/api/srs/cards",
            Some(&token),
            Some(json!({ "word_id": word_id, "card_type": "recall" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .call("POST", "/api/srs/cards", Some(&token), Some(json!({ "word_id": 31337 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_review_writes_one_history_row() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let word_id = add_neko(&app, &token).await;
    let card_id = create_card(&app, &token, word_id).await["id"].as_i64().unwrap();

    let (status, body) = review(&app, &token, card_id, 3).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["correct"], true);
    assert_eq!(body["card"]["interval_days"], 1);
    assert_eq!(body["card"]["repetition_count"], 1);
    assert_eq!(body["card"]["total_reviews"], 1);
    assert_eq!(body["card"]["current_streak"], 1);

    let (status, history) = app
        .call("GET", &format!("/api/srs/cards/{}/history", card_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["response_quality"], 3);
    assert_eq!(history[0]["response_time_ms"], 1800);
    assert_eq!(history[0]["old_interval"], 1);
    assert_eq!(history[0]["old_ease_factor"], 2.5);
    assert_eq!(history[0]["new_interval"], 1);
    assert_eq!(history[0]["new_ease_factor"], 2.5);

    let (_, body) = review(&app, &token, card_id, 1).await;
    assert_eq!(body["correct"], false);
    assert_eq!(body["card"]["repetition_count"], 0);
    assert_eq!(body["card"]["ease_factor"], 2.3);
    assert_eq!(body["card"]["current_streak"], 0);
    assert_eq!(body["card"]["longest_streak"], 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM review_history WHERE card_id = ?")
        .bind(card_id)
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn test_review_updates_knowledge_row() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let word_id = add_neko(&app, &token).await;
    let card_id = create_card(&app, &token, word_id).await["id"].as_i64().unwrap();

    app.call(
        "POST",
        "/api/words/mark-known",
        Some(&token),
        Some(json!({ "word_id": word_id, "knowledge_level": 2 })),
    )
    .await;

    review(&app, &token, card_id, 3).await;
    review(&app, &token, card_id, 4).await;

    let (_, body) = app
        .call("GET", &format!("/api/words/lookup/{}", urlencode("猫")), Some(&token), None)
        .await;
    let knowledge = &body["knowledge"][0];
    assert_eq!(knowledge["srs_level"], 2);
    assert_eq!(knowledge["review_count"], 2);
    assert_eq!(knowledge["correct_count"], 2);
    assert_eq!(knowledge["streak"], 2);
    assert!(knowledge["next_review_at"].is_string());
}

#[tokio::test]
async fn test_review_rejections() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let other = app.login_new_user("other").await;
    let word_id = add_neko(&app, &token).await;
    let card_id = create_card(&app, &token, word_id).await["id"].as_i64().unwrap();

    assert_eq!(review(&app, &token, card_id, 0).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(review(&app, &token, card_id, 5).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(review(&app, &other, card_id, 3).await.0, StatusCode::NOT_FOUND);

    app.call(
        "PATCH",
        &format!("/api/srs/cards/{}", card_id),
        Some(&token),
        Some(json!({ "is_suspended": true })),
    )
    .await;
    assert_eq!(review(&app, &token, card_id, 3).await.0, StatusCode::CONFLICT);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM review_history")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn test_review_metadata_validated() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let word_id = add_neko(&app, &token).await;
    let card_id = create_card(&app, &token, word_id).await["id"].as_i64().unwrap();

    for bad in [
        json!({ "card_id": card_id, "quality": 3, "review_context": "bogus" }),
        json!({ "card_id": card_id, "quality": 3, "device_type": "toaster" }),
    ] {
        let (status, body) = app.call("POST", "/api/srs/review", Some(&token), Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    let (status, _) = app
        .call(
            "POST",
            "/api/srs/review",
            Some(&token),
            Some(json!({
                "card_id": card_id,
                "quality": 3,
                "review_context": "srs_session",
                "device_type": "tablet",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = app
        .call("GET", &format!("/api/srs/cards/{}/history", card_id), Some(&token), None)
        .await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["review_context"], "srs_session");
    assert_eq!(history[0]["device_type"], "tablet");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reviews_and_marks_all_succeed() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;

    let mut card_ids = Vec::new();
    let mut word_ids = Vec::new();
    for i in 0..24 {
        let word_id = add_word(
            &app,
            &token,
            json!({
                "surface_form": format!("語{}", i),
                "reading": format!("ご{}", i),
                "definitions": [{ "dictionary_source": "jmdict", "definition": "word" }],
            }),
        )
        .await;
        word_ids.push(word_id);
        card_ids.push(create_card(&app, &token, word_id).await["id"].as_i64().unwrap());
    }

    let post = |uri: &str, body: Value| {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let mut requests = Vec::new();
    for &card_id in &card_ids {
        requests.push(post("/api/srs/review", json!({ "card_id": card_id, "quality": 3 })));
    }
    for &word_id in &word_ids {
        requests.push(post("/api/words/mark-known", json!({ "word_id": word_id })));
    }

    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let router = app.router.clone();
            tokio::spawn(async move { router.oneshot(request).await.unwrap().status() })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM review_history")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(reviews, card_ids.len() as i64);

    let (_, me) = app.call("GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(me["total_words_learned"], word_ids.len() as i64);
}

#[tokio::test]
async fn test_due_cards_excludes_future_suspended_buried() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;

    let mut card_ids = Vec::new();
    for (surface, reading) in [("猫", "ねこ"), ("犬", "いぬ"), ("鳥", "とり"), ("魚", "さかな")] {
        let word_id = add_word(
            &app,
            &token,
            json!({ "surface_form": surface, "reading": reading }),
        )
        .await;
        card_ids.push(create_card(&app, &token, word_id).await["id"].as_i64().unwrap());
    }
    let (due, future, suspended, buried) = (card_ids[0], card_ids[1], card_ids[2], card_ids[3]);

    let tomorrow = time::format_db(&(time::now() + Duration::days(1)));
    sqlx::query("UPDATE srs_cards SET due_date = ? WHERE id = ?")
        .bind(&tomorrow)
        .bind(future)
        .execute(&app.db)
        .await
        .unwrap();

    let (status, _) = app
        .call(
            "PATCH",
            &format!("/api/srs/cards/{}", suspended),
            Some(&token),
            Some(json!({ "is_suspended": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .call(
            "PATCH",
            &format!("/api/srs/cards/{}", buried),
            Some(&token),
            Some(json!({ "is_buried": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_buried"], true);
    assert_eq!(body["is_suspended"], false);

    let (status, body) = app.call("GET", "/api/srs/due-cards", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["due_cards"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![due]);
    assert_eq!(body["total_due"], 1);

    let (_, stats) = app.call("GET", "/api/srs/stats", Some(&token), None).await;
    assert_eq!(stats["total_cards"], 4);
    assert_eq!(stats["due_cards"], 1);
    assert_eq!(stats["suspended_cards"], 1);
    assert_eq!(stats["reviews_today"], 0);
    assert_eq!(stats["retention_rate"], 0.0);
}

#[tokio::test]
async fn test_reviewed_card_leaves_due_queue() {
    let app = TestApp::new().await;
    let token = app.login_new_user("learner").await;
    let word_id = add_neko(&app, &token).await;
    let card_id = create_card(&app, &token, word_id).await["id"].as_i64().unwrap();

    review(&app, &token, card_id, 4).await;

    let (_, body) = app.call("GET", "/api/srs/due-cards?limit=10", Some(&token), None).await;
    assert_eq!(body["total_due"], 0);

    let (_, stats) = app.call("GET", "/api/srs/stats", Some(&token), None).await;
    assert_eq!(stats["reviews_today"], 1);
    assert_eq!(stats["total_reviews"], 1);
    assert_eq!(stats["retention_rate"], 1.0);

    let (status, _) = app
        .call("DELETE", &format!("/api/srs/cards/{}", card_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call("GET", &format!("/api/srs/cards/{}", card_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Percent-encode a path segment
fn urlencode(segment: &str) -> String {
    segment
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
