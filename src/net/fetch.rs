//! Cache-validated reads with offline and failure fallback.
//!
//! Every read resolves to a value: fresh from the server, the locally
//! cached copy, or the caller's fallback. Network failures are logged
//! and swallowed here so callers never special-case them; only a local
//! store failure surfaces as an error.

use chrono::Utc;
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connectivity::Connectivity;
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::net::transport::{ApiRequest, Transport};
use crate::store::{CacheMeta, EntityStore, LocalStore};

#[derive(Clone)]
pub struct ConditionalFetcher {
  store: Arc<LocalStore>,
  transport: Arc<dyn Transport>,
  connectivity: Connectivity,
  notifier: ChangeNotifier,
}

impl ConditionalFetcher {
  pub fn new(
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
    notifier: ChangeNotifier,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
      notifier,
    }
  }

  /// Cache-validated read of a single JSON blob endpoint.
  ///
  /// Offline, "not modified", HTTP errors and transport failures all
  /// resolve to the cached value when one exists, else `fallback`.
  pub async fn fetch_or_cached(
    &self,
    path: &str,
    cache_key: &str,
    fallback: Value,
  ) -> Result<Value> {
    let meta = self.store.get_meta(cache_key)?;

    if !self.connectivity.is_online() {
      debug!(key = cache_key, "offline, serving cached value");
      return Ok(cached_or_fallback(meta, fallback));
    }

    // Only claim a validator when the data it validates is actually
    // held; a bare validator would let a 304 confirm data we don't have.
    let validator = meta
      .as_ref()
      .filter(|m| m.value.is_some())
      .and_then(|m| m.validator.clone());

    let request = ApiRequest::get(path).with_validator(validator);
    match self.transport.send(request).await {
      Ok(resp) if resp.is_not_modified() => {
        debug!(key = cache_key, "not modified, serving cached value");
        Ok(cached_or_fallback(meta, fallback))
      }
      Ok(resp) if resp.is_success() => match resp.body {
        Some(body) => {
          self.store.put_meta(&CacheMeta {
            key: cache_key.to_string(),
            value: Some(body.clone()),
            validator: resp.etag,
            last_updated: Utc::now(),
          })?;
          self.notifier.emit(ChangeEvent::MetaUpdated(cache_key.to_string()));
          Ok(body)
        }
        // Success without a body: nothing to cache, nothing to return
        None => Ok(cached_or_fallback(meta, fallback)),
      },
      Ok(resp) => {
        warn!(key = cache_key, status = resp.status, "read failed, serving cached value");
        Ok(cached_or_fallback(meta, fallback))
      }
      Err(e) => {
        warn!(key = cache_key, error = %e, "read errored, serving cached value");
        Ok(cached_or_fallback(meta, fallback))
      }
    }
  }

  /// Cache-validated read of a full entity collection.
  ///
  /// Same branch structure as [`fetch_or_cached`], except success
  /// installs a wholesale snapshot into the dedicated store and every
  /// fallback branch serves the last installed snapshot. Collections
  /// get their own store because records are individually addressable;
  /// a single task update must not rewrite one giant blob.
  ///
  /// [`fetch_or_cached`]: ConditionalFetcher::fetch_or_cached
  pub async fn fetch_collection(&self, path: &str, store: EntityStore) -> Result<Vec<Value>> {
    let meta = self.store.get_meta(&store.meta_key())?;

    if !self.connectivity.is_online() {
      debug!(store = store.as_str(), "offline, serving local snapshot");
      return self.store.get_all(store);
    }

    // The collection meta row only exists alongside an installed
    // snapshot, so its validator is always safe to present.
    let validator = meta.as_ref().and_then(|m| m.validator.clone());

    let request = ApiRequest::get(path).with_validator(validator);
    match self.transport.send(request).await {
      Ok(resp) if resp.is_not_modified() => {
        debug!(store = store.as_str(), "not modified, serving local snapshot");
        self.store.get_all(store)
      }
      Ok(resp) if resp.is_success() => match resp.body {
        Some(Value::Array(records)) => {
          self
            .store
            .install_snapshot(store, &records, resp.etag.as_deref())?;
          self.notifier.emit(ChangeEvent::CollectionRefreshed(store));
          Ok(records)
        }
        Some(_) => {
          warn!(store = store.as_str(), "expected an array body, serving local snapshot");
          self.store.get_all(store)
        }
        None => self.store.get_all(store),
      },
      Ok(resp) => {
        warn!(store = store.as_str(), status = resp.status, "read failed, serving local snapshot");
        self.store.get_all(store)
      }
      Err(e) => {
        warn!(store = store.as_str(), error = %e, "read errored, serving local snapshot");
        self.store.get_all(store)
      }
    }
  }
}

fn cached_or_fallback(meta: Option<CacheMeta>, fallback: Value) -> Value {
  meta.and_then(|m| m.value).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::FakeTransport;
  use serde_json::json;

  fn fetcher(online: bool) -> (ConditionalFetcher, Arc<LocalStore>, Arc<FakeTransport>) {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let transport = Arc::new(FakeTransport::new());
    let fetcher = ConditionalFetcher::new(
      store.clone(),
      transport.clone(),
      Connectivity::new(online),
      ChangeNotifier::new(),
    );
    (fetcher, store, transport)
  }

  fn seed_meta(store: &LocalStore, key: &str, value: Option<Value>, validator: Option<&str>) {
    store
      .put_meta(&CacheMeta {
        key: key.to_string(),
        value,
        validator: validator.map(String::from),
        last_updated: chrono::Utc::now(),
      })
      .unwrap();
  }

  #[tokio::test]
  async fn test_not_modified_returns_cached_value_without_touching_meta() {
    let (fetcher, store, transport) = fetcher(true);
    let cached = json!({"darkMode": true});
    seed_meta(&store, "settings", Some(cached.clone()), Some("\"e1\""));
    let before = store.get_meta("settings").unwrap();

    transport.push_response(304, None, None);
    let value = fetcher
      .fetch_or_cached("/settings", "settings", json!({}))
      .await
      .unwrap();

    assert_eq!(value, cached);
    assert_eq!(store.get_meta("settings").unwrap(), before);

    let sent = transport.sent_requests();
    assert_eq!(sent[0].if_none_match.as_deref(), Some("\"e1\""));
  }

  #[tokio::test]
  async fn test_success_persists_value_and_validator() {
    let (fetcher, store, transport) = fetcher(true);

    transport.push_response(200, Some("\"e2\""), Some(json!({"startWeekOn": "Monday"})));
    let value = fetcher
      .fetch_or_cached("/settings", "settings", json!({}))
      .await
      .unwrap();

    assert_eq!(value, json!({"startWeekOn": "Monday"}));
    let meta = store.get_meta("settings").unwrap().unwrap();
    assert_eq!(meta.value, Some(json!({"startWeekOn": "Monday"})));
    assert_eq!(meta.validator.as_deref(), Some("\"e2\""));
  }

  #[tokio::test]
  async fn test_stale_validator_without_value_is_never_sent() {
    let (fetcher, store, transport) = fetcher(true);
    seed_meta(&store, "settings", None, Some("\"stale\""));

    transport.push_response(200, None, Some(json!({})));
    fetcher
      .fetch_or_cached("/settings", "settings", json!({}))
      .await
      .unwrap();

    let sent = transport.sent_requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].if_none_match, None);
  }

  #[tokio::test]
  async fn test_offline_serves_cache_without_network() {
    let (fetcher, store, transport) = fetcher(false);
    seed_meta(&store, "settings", Some(json!({"darkMode": true})), None);

    let value = fetcher
      .fetch_or_cached("/settings", "settings", json!({}))
      .await
      .unwrap();

    assert_eq!(value, json!({"darkMode": true}));
    assert!(transport.sent_requests().is_empty());
  }

  #[tokio::test]
  async fn test_offline_without_cache_serves_fallback() {
    let (fetcher, _store, transport) = fetcher(false);

    let value = fetcher
      .fetch_or_cached("/settings", "settings", json!({"default": true}))
      .await
      .unwrap();

    assert_eq!(value, json!({"default": true}));
    assert!(transport.sent_requests().is_empty());
  }

  #[tokio::test]
  async fn test_transport_failure_falls_back_to_cache() {
    let (fetcher, store, transport) = fetcher(true);
    seed_meta(&store, "settings", Some(json!({"darkMode": true})), None);

    transport.push_error("connection reset");
    let value = fetcher
      .fetch_or_cached("/settings", "settings", json!({}))
      .await
      .unwrap();

    assert_eq!(value, json!({"darkMode": true}));
  }

  #[tokio::test]
  async fn test_server_error_falls_back() {
    let (fetcher, _store, transport) = fetcher(true);

    transport.push_response(503, None, None);
    let value = fetcher
      .fetch_or_cached("/settings", "settings", json!({"fallback": 1}))
      .await
      .unwrap();

    assert_eq!(value, json!({"fallback": 1}));
  }

  #[tokio::test]
  async fn test_collection_refresh_replaces_snapshot() {
    let (fetcher, store, transport) = fetcher(true);
    store
      .install_snapshot(
        EntityStore::Tasks,
        &[json!({"id": "t1"}), json!({"id": "t2"})],
        Some("\"v1\""),
      )
      .unwrap();

    // Strict subset of the previous snapshot
    transport.push_response(200, Some("\"v2\""), Some(json!([{"id": "t2"}])));
    let records = fetcher.fetch_collection("/tasks", EntityStore::Tasks).await.unwrap();

    assert_eq!(records, vec![json!({"id": "t2"})]);
    assert_eq!(store.get_all(EntityStore::Tasks).unwrap(), records);

    let sent = transport.sent_requests();
    assert_eq!(sent[0].if_none_match.as_deref(), Some("\"v1\""));
  }

  #[tokio::test]
  async fn test_collection_not_modified_serves_snapshot() {
    let (fetcher, store, transport) = fetcher(true);
    store
      .install_snapshot(EntityStore::Groups, &[json!({"id": "g1"})], Some("\"v1\""))
      .unwrap();

    transport.push_response(304, None, None);
    let records = fetcher
      .fetch_collection("/groups", EntityStore::Groups)
      .await
      .unwrap();

    assert_eq!(records, vec![json!({"id": "g1"})]);
  }

  #[tokio::test]
  async fn test_collection_without_snapshot_sends_no_validator() {
    let (fetcher, _store, transport) = fetcher(true);

    transport.push_response(200, None, Some(json!([])));
    fetcher
      .fetch_collection("/labels", EntityStore::Labels)
      .await
      .unwrap();

    assert_eq!(transport.sent_requests()[0].if_none_match, None);
  }
}
