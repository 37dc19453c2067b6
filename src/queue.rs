//! Durable mutation queue and its replay algorithm.

use chrono::Utc;
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::net::{ApiRequest, Method, Transport};
use crate::store::LocalStore;

/// Timestamp-ordered log of writes the server has not confirmed.
///
/// Items replay strictly in insertion order, one request at a time, so
/// dependent writes to the same resource apply in the order the user
/// issued them. A transport-level failure mid-pass stops the pass:
/// later items must not be sent ahead of one that failed to confirm.
pub struct MutationQueue {
  store: Arc<LocalStore>,
  transport: Arc<dyn Transport>,
  connectivity: Connectivity,
  /// Two replay triggers must never interleave requests.
  replay_lock: Mutex<()>,
}

impl MutationQueue {
  pub fn new(
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
      replay_lock: Mutex::new(()),
    }
  }

  /// Buffer a write. When online this also kicks off a replay pass, so
  /// queueing doubles as the retry-submission path rather than being
  /// offline-only.
  pub async fn add(&self, path: &str, method: Method, body: Option<Value>) -> Result<()> {
    let timestamp = Utc::now().timestamp_millis();
    self
      .store
      .enqueue(path, method.as_str(), body.as_ref(), timestamp)?;
    debug!(path, method = method.as_str(), "buffered write");

    if self.connectivity.is_online() {
      self.process().await?;
    }

    Ok(())
  }

  /// Replay every buffered write in order. No-op when offline.
  ///
  /// Outcome per item: 2xx confirms (deleted), 4xx is permanently
  /// invalid (deleted, retrying cannot help), 5xx is retained for a
  /// later pass, and a transport failure ends the whole pass.
  pub async fn process(&self) -> Result<()> {
    if !self.connectivity.is_online() {
      return Ok(());
    }

    let _pass = self.replay_lock.lock().await;

    let items = self.store.queued_items()?;
    if items.is_empty() {
      return Ok(());
    }
    info!(pending = items.len(), "replaying buffered writes");

    for item in items {
      let method = Method::parse(&item.method)?;
      let request = ApiRequest::new(method, item.path.as_str(), item.body.clone());

      match self.transport.send(request).await {
        Ok(resp) if resp.is_success() => {
          self.store.remove_queued(item.id)?;
          debug!(id = item.id, path = %item.path, "write confirmed");
        }
        Ok(resp) if resp.is_client_error() => {
          warn!(
            id = item.id,
            path = %item.path,
            status = resp.status,
            "write rejected by server, dropping"
          );
          self.store.remove_queued(item.id)?;
        }
        Ok(resp) => {
          warn!(
            id = item.id,
            path = %item.path,
            status = resp.status,
            "server error, keeping for a later pass"
          );
          self.store.bump_retry(item.id)?;
        }
        Err(e) => {
          warn!(id = item.id, path = %item.path, error = %e, "transport failure, stopping replay pass");
          return Ok(());
        }
      }
    }

    Ok(())
  }

  /// Number of buffered writes.
  pub fn len(&self) -> Result<usize> {
    self.store.queue_len()
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}
