//! Dictionary words and their definitions

use chrono::{DateTime, Utc};
use kotoba_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{get_json, get_ts};

#[derive(Debug, Clone, Serialize)]
pub struct Word {
    pub id: i64,
    pub surface_form: String,
    pub reading: Option<String>,
    pub pronunciation: Option<String>,
    pub part_of_speech: Option<String>,
    pub inflection_type: Option<String>,
    pub base_form: Option<String>,
    pub jlpt_level: Option<i64>,
    pub wanikani_level: Option<i64>,
    pub kanken_level: Option<i64>,
    pub frequency_rank: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Definition {
    pub id: i64,
    pub word_id: i64,
    pub dictionary_source: String,
    pub language: String,
    pub definition: String,
    pub example_sentence: Option<String>,
    pub example_translation: Option<String>,
    pub definition_order: i64,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A word with its definitions, as returned by lookups
#[derive(Debug, Clone, Serialize)]
pub struct WordEntry {
    #[serde(flatten)]
    pub word: Word,
    pub definitions: Vec<Definition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWord {
    pub surface_form: String,
    pub reading: Option<String>,
    pub pronunciation: Option<String>,
    pub part_of_speech: Option<String>,
    pub inflection_type: Option<String>,
    pub base_form: Option<String>,
    pub jlpt_level: Option<i64>,
    pub wanikani_level: Option<i64>,
    pub kanken_level: Option<i64>,
    pub frequency_rank: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDefinition {
    pub dictionary_source: String,
    #[serde(default = "default_definition_language")]
    pub language: String,
    pub definition: String,
    pub example_sentence: Option<String>,
    pub example_translation: Option<String>,
    pub definition_order: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_definition_language() -> String {
    "en".to_string()
}

fn row_to_word(row: &SqliteRow) -> Result<Word> {
    Ok(Word {
        id: row.get("id"),
        surface_form: row.get("surface_form"),
        reading: row.get("reading"),
        pronunciation: row.get("pronunciation"),
        part_of_speech: row.get("part_of_speech"),
        inflection_type: row.get("inflection_type"),
        base_form: row.get("base_form"),
        jlpt_level: row.get("jlpt_level"),
        wanikani_level: row.get("wanikani_level"),
        kanken_level: row.get("kanken_level"),
        frequency_rank: row.get("frequency_rank"),
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn row_to_definition(row: &SqliteRow) -> Result<Definition> {
    Ok(Definition {
        id: row.get("id"),
        word_id: row.get("word_id"),
        dictionary_source: row.get("dictionary_source"),
        language: row.get("language"),
        definition: row.get("definition"),
        example_sentence: row.get("example_sentence"),
        example_translation: row.get("example_translation"),
        definition_order: row.get("definition_order"),
        tags: get_json(row, "tags")?,
        created_at: get_ts(row, "created_at")?,
    })
}

/// Words whose surface form, base form or reading equals one of `forms`
///
/// Ordered by frequency rank, unranked words last.
pub async fn find_by_forms(pool: &SqlitePool, forms: &[String]) -> Result<Vec<Word>> {
    if forms.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM words WHERE ");
    for (i, form) in forms.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("surface_form = ")
            .push_bind(form.clone())
            .push(" OR base_form = ")
            .push_bind(form.clone())
            .push(" OR reading = ")
            .push_bind(form.clone());
    }
    qb.push(" ORDER BY frequency_rank IS NULL, frequency_rank, id");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(row_to_word).collect()
}

/// Definitions of a word in display order, optionally from one dictionary only
pub async fn definitions_for(
    pool: &SqlitePool,
    word_id: i64,
    source: Option<&str>,
) -> Result<Vec<Definition>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM word_definitions
        WHERE word_id = ? AND (? IS NULL OR dictionary_source = ?)
        ORDER BY definition_order, id
        "#,
    )
    .bind(word_id)
    .bind(source)
    .bind(source)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_definition).collect()
}

pub async fn get_word(pool: &SqlitePool, id: i64) -> Result<Option<Word>> {
    let row = sqlx::query("SELECT * FROM words WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_word).transpose()
}

pub async fn get_entry(pool: &SqlitePool, id: i64) -> Result<Option<WordEntry>> {
    let Some(word) = get_word(pool, id).await? else {
        return Ok(None);
    };
    let definitions = definitions_for(pool, id, None).await?;
    Ok(Some(WordEntry { word, definitions }))
}

/// True when a word with this id exists
pub async fn exists(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM words WHERE id = ?")
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

/// Insert a word and its definitions in one transaction
pub async fn create_entry(
    pool: &SqlitePool,
    word: &NewWord,
    definitions: &[NewDefinition],
) -> Result<WordEntry> {
    let now = time::format_db(&time::now());
    let mut tx = super::begin_write(pool).await?;

    let word_id = sqlx::query(
        r#"
        INSERT INTO words (surface_form, reading, pronunciation, part_of_speech, inflection_type,
                           base_form, jlpt_level, wanikani_level, kanken_level, frequency_rank,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&word.surface_form)
    .bind(&word.reading)
    .bind(&word.pronunciation)
    .bind(&word.part_of_speech)
    .bind(&word.inflection_type)
    .bind(&word.base_form)
    .bind(word.jlpt_level)
    .bind(word.wanikani_level)
    .bind(word.kanken_level)
    .bind(word.frequency_rank)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (index, def) in definitions.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO word_definitions (word_id, dictionary_source, language, definition,
                                          example_sentence, example_translation,
                                          definition_order, tags, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(word_id)
        .bind(&def.dictionary_source)
        .bind(&def.language)
        .bind(&def.definition)
        .bind(&def.example_sentence)
        .bind(&def.example_translation)
        .bind(def.definition_order.unwrap_or(index as i64 + 1))
        .bind(serde_json::to_string(&def.tags)?)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    get_entry(pool, word_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Word {} missing after insert", word_id)))
}
