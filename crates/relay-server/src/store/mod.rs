//! SQLite persistence of users, channels, and membership.
//!
//! Plain request/response plumbing: every query is connection-pool based and
//! the schema is applied idempotently at startup.

pub mod channels;
pub mod users;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::info;

/// Database handle shared across handlers.
pub type Db = SqlitePool;

const SCHEMA: &str = include_str!("schema.sql");

/// Open the pool and apply the schema.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the schema fails.
pub async fn connect(url: &str, max_connections: u32) -> Result<Db> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database URL: {url}"))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {url}"))?;

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .context("Failed to apply database schema")?;

    info!("Database ready at {}", url);
    Ok(pool)
}

/// Current time as stored in `created_at` columns.
#[must_use]
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
pub(crate) async fn test_db() -> Db {
    connect("sqlite::memory:", 1).await.expect("in-memory database")
}
