//! Settings resource: single-blob cache keys with merge-serialized
//! partial updates.
//!
//! Settings are cheap to store whole, so they live in cache-meta rather
//! than an entity collection. Updates are partial objects; two rapid
//! updates fired without awaiting each other must not both read the
//! same stale base, so every update runs under one lock and merges onto
//! the last known value before persisting.

use chrono::Utc;
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::connectivity::Connectivity;
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::net::{ApiRequest, ConditionalFetcher, Method, Transport};
use crate::queue::MutationQueue;
use crate::store::{CacheMeta, LocalStore};

const SETTINGS_KEY: &str = "settings";
const SETTINGS_PATH: &str = "/settings";
const NOTIFICATIONS_KEY: &str = "notifications";
const NOTIFICATIONS_PATH: &str = "/settings/notifications";

#[derive(Clone)]
pub struct Settings {
  store: Arc<LocalStore>,
  transport: Arc<dyn Transport>,
  connectivity: Connectivity,
  queue: Arc<MutationQueue>,
  fetch: ConditionalFetcher,
  notifier: ChangeNotifier,
  update_lock: Arc<Mutex<()>>,
}

impl Settings {
  pub(crate) fn new(
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
    queue: Arc<MutationQueue>,
    fetch: ConditionalFetcher,
    notifier: ChangeNotifier,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
      queue,
      fetch,
      notifier,
      update_lock: Arc::new(Mutex::new(())),
    }
  }

  pub async fn general(&self) -> Result<Value> {
    self
      .fetch
      .fetch_or_cached(SETTINGS_PATH, SETTINGS_KEY, empty_object())
      .await
  }

  pub async fn notifications(&self) -> Result<Value> {
    self
      .fetch
      .fetch_or_cached(NOTIFICATIONS_PATH, NOTIFICATIONS_KEY, empty_object())
      .await
  }

  /// Apply a partial update to general settings. Returns the merged
  /// settings object.
  pub async fn update_general(&self, patch: Value) -> Result<Value> {
    self.update(SETTINGS_PATH, SETTINGS_KEY, patch).await
  }

  /// Apply a partial update to notification settings.
  pub async fn update_notifications(&self, patch: Value) -> Result<Value> {
    self.update(NOTIFICATIONS_PATH, NOTIFICATIONS_KEY, patch).await
  }

  async fn update(&self, path: &str, key: &str, patch: Value) -> Result<Value> {
    let _update = self.update_lock.lock().await;

    let base = self
      .store
      .get_meta(key)?
      .and_then(|m| m.value)
      .unwrap_or_else(empty_object);
    let merged = merge_onto(base, &patch);

    // The merged value is no longer any server version, so the old
    // validator must not survive it.
    self.store.put_meta(&CacheMeta {
      key: key.to_string(),
      value: Some(merged.clone()),
      validator: None,
      last_updated: Utc::now(),
    })?;
    self.notifier.emit(ChangeEvent::MetaUpdated(key.to_string()));

    if self.connectivity.is_online() {
      let request = ApiRequest::new(Method::Put, path, Some(merged.clone()));
      match self.transport.send(request).await {
        Ok(resp) if resp.is_success() => {
          return Ok(resp.body.unwrap_or(merged));
        }
        Ok(resp) => {
          warn!(path, status = resp.status, "settings write not confirmed, buffering");
        }
        Err(e) => {
          warn!(path, error = %e, "settings write failed, buffering");
        }
      }
    }

    self.queue.add(path, Method::Put, Some(merged.clone())).await?;
    Ok(merged)
  }
}

fn empty_object() -> Value {
  Value::Object(serde_json::Map::new())
}

/// Shallow merge of a partial update onto the last known value.
fn merge_onto(base: Value, patch: &Value) -> Value {
  match (base, patch) {
    (Value::Object(mut base), Value::Object(patch)) => {
      for (field, value) in patch {
        base.insert(field.clone(), value.clone());
      }
      Value::Object(base)
    }
    (_, patch) => patch.clone(),
  }
}
