//! # Kotoba Common Library
//!
//! Shared code for the Kotoba reading and review service:
//! - Error type and result alias
//! - Configuration resolution (CLI > ENV > TOML > defaults)
//! - Database initialization and schema
//! - Password hashing and access token signing
//! - Timestamp helpers for database columns

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
