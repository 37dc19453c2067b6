//! Entity sync modules: the optimistic-write template shared by every
//! resource family, plus typed wrappers per resource.
//!
//! The engine core moves opaque JSON; each module decodes at its own
//! boundary so callers get typed records while the store, queue and
//! fetch layers stay resource-agnostic.

mod calendar;
mod groups;
mod labels;
mod settings;
mod tasks;
mod workspaces;

pub use calendar::{CalendarAccount, CalendarAccounts};
pub use groups::{Group, Groups};
pub use labels::{Label, Labels};
pub use settings::Settings;
pub use tasks::{Task, TaskBuckets, Tasks};
pub use workspaces::{Workspace, Workspaces};

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::connectivity::Connectivity;
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::net::{ApiRequest, Method, Transport};
use crate::queue::MutationQueue;
use crate::store::{EntityStore, LocalStore};

/// The shared write template: persist locally first (optimistic),
/// attempt the network call when online, and hand anything unconfirmed
/// to the durable queue so the caller proceeds as if the write
/// succeeded.
#[derive(Clone)]
pub(crate) struct ResourceWriter {
  store: Arc<LocalStore>,
  transport: Arc<dyn Transport>,
  connectivity: Connectivity,
  queue: Arc<MutationQueue>,
  notifier: ChangeNotifier,
}

impl ResourceWriter {
  pub(crate) fn new(
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
    queue: Arc<MutationQueue>,
    notifier: ChangeNotifier,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
      queue,
      notifier,
    }
  }

  /// Create or update a record. Returns the server's body on a
  /// confirmed write (authoritative), otherwise the locally persisted
  /// optimistic value.
  pub(crate) async fn write(
    &self,
    store: EntityStore,
    path: &str,
    method: Method,
    record: Value,
  ) -> Result<Value> {
    let id = self.store.put(store, &record)?;
    self.notifier.emit(ChangeEvent::RecordUpserted(store, id.clone()));

    if self.connectivity.is_online() {
      let request = ApiRequest::new(method, path, Some(record.clone()));
      match self.transport.send(request).await {
        Ok(resp) if resp.is_success() => match resp.body {
          Some(body) => {
            // Keep the local copy in step with the authoritative body
            if body.get("id").and_then(Value::as_str).is_some() {
              self.store.put(store, &body)?;
              self.notifier.emit(ChangeEvent::RecordUpserted(store, id));
            }
            return Ok(body);
          }
          // 204: confirmed, nothing to reconcile
          None => return Ok(record),
        },
        Ok(resp) => {
          warn!(path, status = resp.status, "write not confirmed, buffering");
        }
        Err(e) => {
          warn!(path, error = %e, "write failed, buffering");
        }
      }
    }

    self.queue.add(path, method, Some(record.clone())).await?;
    Ok(record)
  }

  /// Delete a record, with the same local-first and queue-fallback
  /// shape as [`write`](ResourceWriter::write).
  pub(crate) async fn remove(&self, store: EntityStore, path: &str, id: &str) -> Result<()> {
    self.store.delete(store, id)?;
    self
      .notifier
      .emit(ChangeEvent::RecordDeleted(store, id.to_string()));

    if self.connectivity.is_online() {
      match self
        .transport
        .send(ApiRequest::new(Method::Delete, path, None))
        .await
      {
        Ok(resp) if resp.is_success() => return Ok(()),
        Ok(resp) => {
          warn!(path, status = resp.status, "delete not confirmed, buffering");
        }
        Err(e) => {
          warn!(path, error = %e, "delete failed, buffering");
        }
      }
    }

    self.queue.add(path, Method::Delete, None).await
  }
}

/// Decode a collection, dropping records that don't fit the resource's
/// shape rather than failing the whole read.
pub(crate) fn decode_records<T: DeserializeOwned>(records: Vec<Value>) -> Vec<T> {
  records
    .into_iter()
    .filter_map(|record| serde_json::from_value(record).ok())
    .collect()
}
