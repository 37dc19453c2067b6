//! Durable local store: entity collections, cache metadata and the
//! write queue, all in one SQLite database.
//!
//! Every read operation treats "not found" as an ordinary outcome
//! (`Ok(None)` / empty vec), never an error. Opening the database runs
//! the schema migration; the open is idempotent and safe to repeat.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// Named entity collections, fixed at schema-definition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityStore {
  Tasks,
  Groups,
  Labels,
  Workspaces,
  CalendarAccounts,
}

impl EntityStore {
  pub const ALL: [EntityStore; 5] = [
    EntityStore::Tasks,
    EntityStore::Groups,
    EntityStore::Labels,
    EntityStore::Workspaces,
    EntityStore::CalendarAccounts,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      EntityStore::Tasks => "tasks",
      EntityStore::Groups => "groups",
      EntityStore::Labels => "labels",
      EntityStore::Workspaces => "workspaces",
      EntityStore::CalendarAccounts => "calendar_accounts",
    }
  }

  /// Cache-meta key tracking the collection's last full snapshot.
  pub fn meta_key(&self) -> String {
    format!("collection:{}", self.as_str())
  }
}

/// One row per logical read endpoint.
///
/// A `validator` is only meaningful paired with the data it validates:
/// for blob keys that means a non-null `value`, for collection keys the
/// row itself is only ever written together with a snapshot install.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMeta {
  pub key: String,
  pub value: Option<Value>,
  pub validator: Option<String>,
  pub last_updated: DateTime<Utc>,
}

/// A buffered write awaiting server confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
  pub id: i64,
  pub path: String,
  pub method: String,
  pub body: Option<Value>,
  /// Milliseconds since the epoch at enqueue time; replay order.
  pub timestamp: i64,
  pub retry_count: u32,
}

/// Schema for the sync database.
const SCHEMA: &str = r#"
-- Entity collections (opaque JSON bodies keyed by record id)
CREATE TABLE IF NOT EXISTS entity_records (
    store TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (store, id)
);

-- One row per logical read endpoint
CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT,
    validator TEXT,
    last_updated INTEGER NOT NULL
);

-- Durable write buffer, replayed in (timestamp, id) order
CREATE TABLE IF NOT EXISTS write_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    method TEXT NOT NULL,
    body TEXT,
    timestamp INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_write_queue_timestamp ON write_queue(timestamp);
"#;

/// SQLite-backed local store shared by every engine component.
pub struct LocalStore {
  conn: Mutex<Connection>,
}

impl LocalStore {
  /// Open or create the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open sync database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory database, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(())
  }

  // ==========================================================================
  // Entity collections
  // ==========================================================================

  /// Get a single record by id.
  pub fn get(&self, store: EntityStore, id: &str) -> Result<Option<Value>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let body: Option<String> = conn
      .query_row(
        "SELECT body FROM entity_records WHERE store = ? AND id = ?",
        params![store.as_str(), id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record: {}", e))?;

    match body {
      Some(body) => {
        let record = serde_json::from_str(&body)
          .map_err(|e| eyre!("Failed to parse stored record {}/{}: {}", store.as_str(), id, e))?;
        Ok(Some(record))
      }
      None => Ok(None),
    }
  }

  /// Get every record in a collection.
  pub fn get_all(&self, store: EntityStore) -> Result<Vec<Value>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT body FROM entity_records WHERE store = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let bodies: Vec<String> = stmt
      .query_map(params![store.as_str()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(bodies.len());
    for body in bodies {
      let record = serde_json::from_str(&body)
        .map_err(|e| eyre!("Failed to parse stored record in {}: {}", store.as_str(), e))?;
      records.push(record);
    }

    Ok(records)
  }

  /// Insert or overwrite a record. Returns the record id.
  pub fn put(&self, store: EntityStore, record: &Value) -> Result<String> {
    let id = record_id(store, record)?;
    let body = serde_json::to_string(record)
      .map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entity_records (store, id, body) VALUES (?, ?, ?)",
        params![store.as_str(), id, body],
      )
      .map_err(|e| eyre!("Failed to store record: {}", e))?;

    Ok(id)
  }

  /// Delete a record. Deleting an absent record is not an error.
  pub fn delete(&self, store: EntityStore, id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM entity_records WHERE store = ? AND id = ?",
        params![store.as_str(), id],
      )
      .map_err(|e| eyre!("Failed to delete record: {}", e))?;

    Ok(())
  }

  /// Remove every record in a collection.
  pub fn clear(&self, store: EntityStore) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM entity_records WHERE store = ?",
        params![store.as_str()],
      )
      .map_err(|e| eyre!("Failed to clear collection: {}", e))?;

    Ok(())
  }

  /// Replace a collection with a fresh server snapshot in one
  /// transaction: clear, insert each record, and record the snapshot's
  /// validator in the collection's cache-meta row. The meta row is
  /// never written any other way, so a stored validator always has its
  /// snapshot.
  pub fn install_snapshot(
    &self,
    store: EntityStore,
    records: &[Value],
    validator: Option<&str>,
  ) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM entity_records WHERE store = ?",
      params![store.as_str()],
    )
    .map_err(|e| eyre!("Failed to clear collection: {}", e))?;

    for record in records {
      let id = record_id(store, record)?;
      let body = serde_json::to_string(record)
        .map_err(|e| eyre!("Failed to serialize record: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO entity_records (store, id, body) VALUES (?, ?, ?)",
        params![store.as_str(), id, body],
      )
      .map_err(|e| eyre!("Failed to store record: {}", e))?;
    }

    tx.execute(
      "INSERT OR REPLACE INTO cache_meta (key, value, validator, last_updated) VALUES (?, NULL, ?, ?)",
      params![store.meta_key(), validator, Utc::now().timestamp_millis()],
    )
    .map_err(|e| eyre!("Failed to update collection meta: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit snapshot: {}", e))?;

    Ok(())
  }

  // ==========================================================================
  // Cache metadata
  // ==========================================================================

  pub fn get_meta(&self, key: &str) -> Result<Option<CacheMeta>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Option<String>, Option<String>, i64)> = conn
      .query_row(
        "SELECT value, validator, last_updated FROM cache_meta WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache meta: {}", e))?;

    match row {
      Some((value, validator, last_updated)) => {
        let value = match value {
          Some(text) => Some(
            serde_json::from_str(&text)
              .map_err(|e| eyre!("Failed to parse cached value for {}: {}", key, e))?,
          ),
          None => None,
        };

        Ok(Some(CacheMeta {
          key: key.to_string(),
          value,
          validator,
          last_updated: millis_to_datetime(last_updated)?,
        }))
      }
      None => Ok(None),
    }
  }

  pub fn put_meta(&self, meta: &CacheMeta) -> Result<()> {
    let value = match &meta.value {
      Some(value) => Some(
        serde_json::to_string(value)
          .map_err(|e| eyre!("Failed to serialize cached value: {}", e))?,
      ),
      None => None,
    };

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_meta (key, value, validator, last_updated) VALUES (?, ?, ?, ?)",
        params![
          meta.key,
          value,
          meta.validator,
          meta.last_updated.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache meta: {}", e))?;

    Ok(())
  }

  // ==========================================================================
  // Write queue
  // ==========================================================================

  /// Append a buffered write. Returns the queue id.
  pub fn enqueue(
    &self,
    path: &str,
    method: &str,
    body: Option<&Value>,
    timestamp: i64,
  ) -> Result<i64> {
    let body = match body {
      Some(body) => Some(
        serde_json::to_string(body).map_err(|e| eyre!("Failed to serialize body: {}", e))?,
      ),
      None => None,
    };

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO write_queue (path, method, body, timestamp) VALUES (?, ?, ?, ?)",
        params![path, method, body, timestamp],
      )
      .map_err(|e| eyre!("Failed to enqueue write: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  /// All buffered writes, oldest first. The autoincrement id breaks
  /// ties between writes enqueued in the same millisecond.
  pub fn queued_items(&self) -> Result<Vec<QueueItem>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, path, method, body, timestamp, retry_count FROM write_queue
         ORDER BY timestamp ASC, id ASC",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(i64, String, String, Option<String>, i64, u32)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut items = Vec::with_capacity(rows.len());
    for (id, path, method, body, timestamp, retry_count) in rows {
      let body = match body {
        Some(text) => Some(
          serde_json::from_str(&text)
            .map_err(|e| eyre!("Failed to parse queued body for item {}: {}", id, e))?,
        ),
        None => None,
      };

      items.push(QueueItem {
        id,
        path,
        method,
        body,
        timestamp,
        retry_count,
      });
    }

    Ok(items)
  }

  pub fn remove_queued(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM write_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued write: {}", e))?;

    Ok(())
  }

  pub fn bump_retry(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE write_queue SET retry_count = retry_count + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to update retry count: {}", e))?;

    Ok(())
  }

  pub fn queue_len(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM write_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;

    Ok(count as usize)
  }
}

fn record_id(store: EntityStore, record: &Value) -> Result<String> {
  record
    .get("id")
    .and_then(Value::as_str)
    .map(String::from)
    .ok_or_else(|| eyre!("Record for store '{}' is missing a string id", store.as_str()))
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(millis)
    .single()
    .ok_or_else(|| eyre!("Invalid timestamp in database: {}", millis))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_put_get_roundtrip() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = json!({"id": "t1", "title": "Buy milk"});

    let id = store.put(EntityStore::Tasks, &record).unwrap();
    assert_eq!(id, "t1");
    assert_eq!(store.get(EntityStore::Tasks, "t1").unwrap(), Some(record));
  }

  #[test]
  fn test_get_missing_is_none() {
    let store = LocalStore::open_in_memory().unwrap();
    assert_eq!(store.get(EntityStore::Tasks, "nope").unwrap(), None);
    assert!(store.get_all(EntityStore::Groups).unwrap().is_empty());
  }

  #[test]
  fn test_put_without_id_is_an_error() {
    let store = LocalStore::open_in_memory().unwrap();
    assert!(store.put(EntityStore::Tasks, &json!({"title": "no id"})).is_err());
  }

  #[test]
  fn test_collections_are_isolated() {
    let store = LocalStore::open_in_memory().unwrap();
    store.put(EntityStore::Tasks, &json!({"id": "a"})).unwrap();
    store.put(EntityStore::Groups, &json!({"id": "a"})).unwrap();

    store.delete(EntityStore::Tasks, "a").unwrap();
    assert_eq!(store.get(EntityStore::Tasks, "a").unwrap(), None);
    assert!(store.get(EntityStore::Groups, "a").unwrap().is_some());
  }

  #[test]
  fn test_snapshot_replaces_whole_collection() {
    let store = LocalStore::open_in_memory().unwrap();
    store.put(EntityStore::Tasks, &json!({"id": "old1"})).unwrap();
    store.put(EntityStore::Tasks, &json!({"id": "old2"})).unwrap();
    store.put(EntityStore::Tasks, &json!({"id": "keep"})).unwrap();

    // Strict subset of the previous contents
    let snapshot = vec![json!({"id": "keep"})];
    store
      .install_snapshot(EntityStore::Tasks, &snapshot, Some("\"v2\""))
      .unwrap();

    assert_eq!(store.get_all(EntityStore::Tasks).unwrap(), snapshot);

    let meta = store
      .get_meta(&EntityStore::Tasks.meta_key())
      .unwrap()
      .unwrap();
    assert_eq!(meta.validator.as_deref(), Some("\"v2\""));
    assert_eq!(meta.value, None);
  }

  #[test]
  fn test_meta_roundtrip() {
    let store = LocalStore::open_in_memory().unwrap();
    let meta = CacheMeta {
      key: "settings".to_string(),
      value: Some(json!({"darkMode": true})),
      validator: Some("\"abc\"".to_string()),
      last_updated: millis_to_datetime(1_700_000_000_000).unwrap(),
    };

    store.put_meta(&meta).unwrap();
    assert_eq!(store.get_meta("settings").unwrap(), Some(meta));
    assert_eq!(store.get_meta("other").unwrap(), None);
  }

  #[test]
  fn test_queue_order_with_timestamp_tiebreak() {
    let store = LocalStore::open_in_memory().unwrap();
    store.enqueue("/tasks/a", "PUT", None, 100).unwrap();
    store.enqueue("/tasks/b", "PUT", None, 50).unwrap();
    // Same millisecond as b: insertion order must win
    store.enqueue("/tasks/c", "PUT", None, 50).unwrap();

    let items = store.queued_items().unwrap();
    let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["/tasks/b", "/tasks/c", "/tasks/a"]);
  }

  #[test]
  fn test_queue_remove_and_retry() {
    let store = LocalStore::open_in_memory().unwrap();
    let body = json!({"id": "t1", "title": "x"});
    let id = store.enqueue("/tasks/t1", "PUT", Some(&body), 1).unwrap();

    store.bump_retry(id).unwrap();
    let items = store.queued_items().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].retry_count, 1);
    assert_eq!(items[0].body, Some(body));

    store.remove_queued(id).unwrap();
    assert_eq!(store.queue_len().unwrap(), 0);
  }
}
