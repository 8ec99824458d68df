//! Deferred-write queue: mutations captured while offline, replayed on sync.
//!
//! The queue is a convenience, not a delivery guarantee. Enqueue failures are
//! dropped with a warning, replay is at-least-once and sequential, and a
//! failed item never blocks the items behind it. Idempotency on replay is the
//! server's responsibility.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::fetch::{GatewayRequest, GatewayResponse, RequestMode};

/// The two deferred-mutation kinds, each with its own sync tag and endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  /// Job updates made in the field
  Job,
  /// Location/tracking pings
  Tracking,
}

impl MutationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      MutationKind::Job => "job",
      MutationKind::Tracking => "tracking",
    }
  }

  /// Background-sync registration tag for this kind.
  pub fn sync_tag(&self) -> &'static str {
    match self {
      MutationKind::Job => "background-sync-jobs",
      MutationKind::Tracking => "background-sync-tracking",
    }
  }

  pub fn from_sync_tag(tag: &str) -> Option<Self> {
    match tag {
      "background-sync-jobs" => Some(MutationKind::Job),
      "background-sync-tracking" => Some(MutationKind::Tracking),
      _ => None,
    }
  }
}

/// A mutation recorded locally because it could not reach the server.
///
/// Never mutated in place; only inserted and removed.
#[derive(Debug, Clone)]
pub struct DeferredMutation {
  pub id: String,
  pub kind: MutationKind,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
}

impl DeferredMutation {
  pub fn new(kind: MutationKind, payload: Value) -> Self {
    Self {
      id: Uuid::now_v7().to_string(),
      kind,
      payload,
      enqueued_at: Utc::now(),
    }
  }

  /// The POST that replays this mutation to its endpoint.
  pub fn to_request(&self, endpoint: &Url) -> Result<GatewayRequest> {
    let body = serde_json::to_vec(&self.payload)
      .map_err(|e| eyre!("Failed to serialize payload for {}: {}", self.id, e))?;

    Ok(GatewayRequest {
      method: Method::POST,
      url: endpoint.clone(),
      mode: RequestMode::Subresource,
      headers: vec![("content-type".into(), "application/json".into())],
      body: Some(body),
    })
  }
}

/// Trait for durable queue backends.
pub trait QueueStore: Send + Sync {
  /// Append a mutation to the queue.
  fn append(&self, mutation: &DeferredMutation) -> Result<()>;

  /// All queued mutations of a kind, oldest first.
  fn list(&self, kind: MutationKind) -> Result<Vec<DeferredMutation>>;

  /// Remove a single mutation by id.
  fn remove(&self, kind: MutationKind, id: &str) -> Result<()>;
}

/// What a flush attempt accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
  /// Confirmed by the server and removed from the queue
  pub delivered: usize,
  /// Still queued for the next sync trigger
  pub remaining: usize,
}

/// The deferred-write queue over a storage backend.
pub struct SyncQueue<Q: QueueStore> {
  store: Arc<Q>,
}

impl<Q: QueueStore> SyncQueue<Q> {
  pub fn new(store: Q) -> Self {
    Self {
      store: Arc::new(store),
    }
  }

  /// Record a mutation for later replay. Best-effort: a failing backend
  /// drops the mutation with a warning instead of failing the caller.
  pub fn enqueue(&self, kind: MutationKind, payload: Value) {
    let mutation = DeferredMutation::new(kind, payload);
    if let Err(e) = self.store.append(&mutation) {
      warn!(kind = mutation.kind.as_str(), error = %e, "dropping deferred mutation");
    }
  }

  /// All queued mutations of a kind, oldest first.
  pub fn pending(&self, kind: MutationKind) -> Result<Vec<DeferredMutation>> {
    self.store.list(kind)
  }

  /// Replay all queued mutations of a kind, sequentially.
  ///
  /// Each item is posted on its own: a confirmed success removes exactly that
  /// item, anything else leaves it queued for the next trigger. One failed
  /// item never prevents later items from being attempted.
  pub async fn flush<F, Fut>(&self, kind: MutationKind, mut post: F) -> FlushOutcome
  where
    F: FnMut(DeferredMutation) -> Fut,
    Fut: Future<Output = Result<GatewayResponse>>,
  {
    let pending = match self.store.list(kind) {
      Ok(pending) => pending,
      Err(e) => {
        warn!(kind = kind.as_str(), error = %e, "failed to read deferred queue");
        return FlushOutcome::default();
      }
    };

    let mut outcome = FlushOutcome::default();
    for mutation in pending {
      let id = mutation.id.clone();
      match post(mutation).await {
        Ok(response) if response.is_success() => {
          if let Err(e) = self.store.remove(kind, &id) {
            warn!(id = %id, error = %e, "failed to remove delivered mutation");
          }
          outcome.delivered += 1;
        }
        Ok(response) => {
          warn!(id = %id, status = response.status, "mutation replay rejected, leaving queued");
          outcome.remaining += 1;
        }
        Err(e) => {
          warn!(id = %id, error = %e, "mutation replay failed, leaving queued");
          outcome.remaining += 1;
        }
      }
    }

    info!(
      kind = kind.as_str(),
      delivered = outcome.delivered,
      remaining = outcome.remaining,
      "flush complete"
    );
    outcome
  }
}

impl<Q: QueueStore> Clone for SyncQueue<Q> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

// ============================================================================
// Backends
// ============================================================================

/// Schema for the deferred-mutation queue.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_kind ON sync_queue(kind);
"#;

/// SQLite-backed queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  /// Open or create the queue at the default location.
  pub fn open() -> Result<Self> {
    let path = Config::data_dir()?.join("queue.db");
    Self::open_at(&path)
  }

  /// Open or create the queue at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory queue, useful for tests.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl QueueStore for SqliteQueue {
  fn append(&self, mutation: &DeferredMutation) -> Result<()> {
    let conn = self.lock()?;

    let payload = serde_json::to_string(&mutation.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO sync_queue (id, kind, payload, enqueued_at) VALUES (?, ?, ?, ?)",
        params![
          mutation.id,
          mutation.kind.as_str(),
          payload,
          mutation.enqueued_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to append mutation: {}", e))?;

    Ok(())
  }

  fn list(&self, kind: MutationKind) -> Result<Vec<DeferredMutation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT id, payload, enqueued_at FROM sync_queue WHERE kind = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String)> = stmt
      .query_map(params![kind.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query mutations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut mutations = Vec::with_capacity(rows.len());
    for (id, payload, enqueued_at) in rows {
      let payload: Value = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Failed to deserialize payload for {}: {}", id, e))?;
      let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
        .map_err(|e| eyre!("Failed to parse enqueued_at for {}: {}", id, e))?
        .with_timezone(&Utc);

      mutations.push(DeferredMutation {
        id,
        kind,
        payload,
        enqueued_at,
      });
    }

    Ok(mutations)
  }

  fn remove(&self, kind: MutationKind, id: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "DELETE FROM sync_queue WHERE kind = ? AND id = ?",
        params![kind.as_str(), id],
      )
      .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;

    Ok(())
  }
}

/// In-memory queue for tests and non-durable embedders.
#[derive(Default)]
pub struct MemoryQueue {
  items: Mutex<Vec<DeferredMutation>>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl QueueStore for MemoryQueue {
  fn append(&self, mutation: &DeferredMutation) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.push(mutation.clone());
    Ok(())
  }

  fn list(&self, kind: MutationKind) -> Result<Vec<DeferredMutation>> {
    let items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.iter().filter(|m| m.kind == kind).cloned().collect())
  }

  fn remove(&self, kind: MutationKind, id: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.retain(|m| !(m.kind == kind && m.id == id));
    Ok(())
  }
}
