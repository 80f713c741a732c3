//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates every table
//! idempotently. There is no migration tooling: the schema is created at
//! startup with `CREATE TABLE IF NOT EXISTS`.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas set on the connect options apply to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    let interrupted = fail_interrupted_processing(&pool).await?;
    if interrupted > 0 {
        warn!(
            "Marked {} book(s) left in processing by a previous run as failed",
            interrupted
        );
    }

    Ok(pool)
}

/// Create all tables and indexes (idempotent - safe to call multiple times)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    create_books_table(pool).await?;
    create_words_table(pool).await?;
    create_word_definitions_table(pool).await?;
    create_user_word_knowledge_table(pool).await?;
    create_reading_sessions_table(pool).await?;
    create_srs_cards_table(pool).await?;
    create_review_history_table(pool).await?;
    create_book_annotations_table(pool).await?;

    info!("Database schema ready");
    Ok(())
}

/// Mark books still `processing` as `failed`
///
/// Processing never outlives the process, so at startup such a row can only
/// be a leftover from an interrupted run. Returns the number of rows reset.
pub async fn fail_interrupted_processing(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE books SET processing_status = 'failed' WHERE processing_status = 'processing'",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Create the settings table
///
/// Stores generated service secrets as key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE CHECK (length(username) BETWEEN 3 AND 50),
            email TEXT NOT NULL UNIQUE CHECK (length(email) <= 100),
            hashed_password TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_activity TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            preferred_language TEXT NOT NULL DEFAULT 'en',
            learning_preferences TEXT NOT NULL DEFAULT '{}',
            total_words_learned INTEGER NOT NULL DEFAULT 0,
            total_reading_time INTEGER NOT NULL DEFAULT 0,
            streak_days INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_books_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            author TEXT,
            language TEXT NOT NULL DEFAULT 'ja',
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER,
            mime_type TEXT,
            processing_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (processing_status IN ('pending', 'processing', 'completed', 'failed')),
            word_count INTEGER NOT NULL DEFAULT 0,
            unique_word_count INTEGER NOT NULL DEFAULT 0,
            difficulty_level TEXT
                CHECK (difficulty_level IS NULL OR difficulty_level IN ('beginner', 'intermediate', 'advanced')),
            uploaded_at TEXT NOT NULL,
            last_read_at TEXT,
            reading_progress REAL NOT NULL DEFAULT 0.0
                CHECK (reading_progress >= 0.0 AND reading_progress <= 100.0),
            extracted_text TEXT,
            chapter_data TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_user ON books(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_words_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS words (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            surface_form TEXT NOT NULL,
            reading TEXT,
            pronunciation TEXT,
            part_of_speech TEXT,
            inflection_type TEXT,
            base_form TEXT,
            jlpt_level INTEGER CHECK (jlpt_level IS NULL OR jlpt_level BETWEEN 1 AND 5),
            wanikani_level INTEGER CHECK (wanikani_level IS NULL OR wanikani_level BETWEEN 1 AND 60),
            kanken_level INTEGER CHECK (kanken_level IS NULL OR kanken_level BETWEEN 1 AND 10),
            frequency_rank INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_words_surface ON words(surface_form)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_words_reading ON words(reading)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_words_base_form ON words(base_form)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_word_definitions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS word_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            word_id INTEGER NOT NULL REFERENCES words(id) ON DELETE CASCADE,
            dictionary_source TEXT NOT NULL,
            language TEXT NOT NULL,
            definition TEXT NOT NULL,
            example_sentence TEXT,
            example_translation TEXT,
            definition_order INTEGER NOT NULL DEFAULT 1,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_word_definitions_word ON word_definitions(word_id, definition_order)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_word_definitions_source ON word_definitions(dictionary_source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_word_knowledge_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_word_knowledge (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            word_id INTEGER NOT NULL REFERENCES words(id) ON DELETE CASCADE,
            knowledge_level INTEGER NOT NULL DEFAULT 0 CHECK (knowledge_level BETWEEN 0 AND 4),
            first_encountered_at TEXT NOT NULL,
            last_reviewed_at TEXT,
            srs_level INTEGER NOT NULL DEFAULT 0,
            next_review_at TEXT,
            review_count INTEGER NOT NULL DEFAULT 0,
            correct_count INTEGER NOT NULL DEFAULT 0,
            streak INTEGER NOT NULL DEFAULT 0,
            first_seen_book_id INTEGER REFERENCES books(id) ON DELETE SET NULL,
            times_encountered INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            is_ignored INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (user_id, word_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_reading_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            start_time TEXT NOT NULL,
            end_time TEXT,
            duration_minutes INTEGER,
            start_position INTEGER NOT NULL DEFAULT 0,
            end_position INTEGER NOT NULL DEFAULT 0,
            words_learned INTEGER NOT NULL DEFAULT 0,
            words_reviewed INTEGER NOT NULL DEFAULT 0,
            new_words_encountered TEXT NOT NULL DEFAULT '[]',
            words_looked_up TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reading_sessions_user ON reading_sessions(user_id, start_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_srs_cards_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS srs_cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            word_id INTEGER NOT NULL REFERENCES words(id) ON DELETE CASCADE,
            card_type TEXT NOT NULL DEFAULT 'recognition'
                CHECK (card_type IN ('recognition', 'recall', 'production')),
            front_content TEXT NOT NULL,
            back_content TEXT NOT NULL,
            ease_factor REAL NOT NULL DEFAULT 2.5,
            interval_days INTEGER NOT NULL DEFAULT 1,
            repetition_count INTEGER NOT NULL DEFAULT 0,
            due_date TEXT NOT NULL,
            last_reviewed_at TEXT,
            total_reviews INTEGER NOT NULL DEFAULT 0,
            correct_reviews INTEGER NOT NULL DEFAULT 0,
            current_streak INTEGER NOT NULL DEFAULT 0,
            longest_streak INTEGER NOT NULL DEFAULT 0,
            is_suspended INTEGER NOT NULL DEFAULT 0,
            is_buried INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (user_id, word_id, card_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_srs_cards_due ON srs_cards(user_id, due_date)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_review_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            card_id INTEGER NOT NULL REFERENCES srs_cards(id) ON DELETE CASCADE,
            reviewed_at TEXT NOT NULL,
            response_quality INTEGER NOT NULL CHECK (response_quality BETWEEN 1 AND 4),
            response_time_ms INTEGER,
            old_interval INTEGER,
            old_ease_factor REAL,
            new_interval INTEGER,
            new_ease_factor REAL,
            new_due_date TEXT,
            review_context TEXT
                CHECK (review_context IS NULL OR review_context IN ('reader', 'srs_session', 'manual')),
            device_type TEXT
                CHECK (device_type IS NULL OR device_type IN ('desktop', 'mobile', 'tablet')),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_review_history_card ON review_history(card_id, reviewed_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_book_annotations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS book_annotations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            start_position INTEGER NOT NULL,
            end_position INTEGER NOT NULL,
            selected_text TEXT NOT NULL,
            annotation_type TEXT NOT NULL DEFAULT 'word_lookup'
                CHECK (annotation_type IN ('word_lookup', 'note', 'highlight')),
            annotation_data TEXT NOT NULL DEFAULT '{}',
            highlight_color TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_book_annotations_book ON book_annotations(book_id, start_position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
