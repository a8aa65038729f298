// SQLite Connection Pool Setup

use crate::map_sqlx_error;
use outreach_core::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const MAX_CONNECTIONS: u32 = 5;

/// Create SQLite connection pool with WAL mode
///
/// An in-memory database lives per connection, so `sqlite::memory:` gets a
/// single-connection pool.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(map_sqlx_error)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        MAX_CONNECTIONS
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)?;

    debug!(url = %database_url, max_connections = max_connections, "SQLite pool ready");
    Ok(pool)
}

/// `sqlite://` URL for a database file path
pub fn database_url(path: &std::path::Path) -> String {
    format!("sqlite://{}", path.display())
}
