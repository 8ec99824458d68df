//! SQLite-backed cache store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use super::traits::CacheStore;
use crate::config::Config;
use crate::fetch::GatewayResponse;

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    bucket TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_bucket ON response_cache(bucket);
"#;

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Config::data_dir()?.join("cache.db");
    Self::open_at(&path)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory store, useful for tests.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStore for SqliteStore {
  fn put(&self, bucket: &str, key: &str, response: &GatewayResponse) -> Result<()> {
    let conn = self.lock()?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (bucket, request_key, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![bucket, key, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn get(&self, bucket: &str, key: &str) -> Result<Option<GatewayResponse>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body FROM response_cache
         WHERE bucket = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(params![bucket, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .ok();

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(GatewayResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("DELETE FROM response_cache WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;

    Ok(())
  }

  fn list_buckets(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT bucket FROM response_cache ORDER BY bucket")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let buckets = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(buckets)
  }

  fn entry_count(&self, bucket: &str) -> Result<u64> {
    let conn = self.lock()?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM response_cache WHERE bucket = ?",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count bucket {}: {}", bucket, e))?;

    Ok(count)
  }
}
