//! Per-table query modules
//!
//! Every query that reads or mutates user data filters on `user_id`, so a
//! row owned by someone else looks exactly like a missing row.

use chrono::{DateTime, Utc};
use kotoba_common::{time, Result};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

pub mod annotations;
pub mod books;
pub mod knowledge;
pub mod reading;
pub mod srs;
pub mod users;
pub mod words;

/// Begin a transaction holding the write lock from the start
///
/// A deferred transaction that reads first gets SQLITE_BUSY straight away
/// when it later tries to write while another writer is active; the busy
/// timeout only applies to acquiring the lock at `BEGIN IMMEDIATE`.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Read a required timestamp column
pub(crate) fn get_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    time::parse_db(&raw)
}

/// Read a nullable timestamp column
pub(crate) fn get_ts_opt(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    time::parse_db_opt(row.try_get(column)?)
}

/// Read a JSON-in-TEXT column
pub(crate) fn get_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Map a UNIQUE constraint violation to `Conflict`, pass everything else through
pub(crate) fn conflict_on_unique(err: sqlx::Error, message: &str) -> kotoba_common::Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            kotoba_common::Error::Conflict(message.to_string())
        }
        _ => err.into(),
    }
}
