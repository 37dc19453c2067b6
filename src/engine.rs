//! The engine facade: one explicitly constructed service object that
//! owns the store, transport, queue and notifier, and hands out the
//! per-resource sync modules. Collaborators receive it by reference;
//! there is no module-level shared state.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::net::{ConditionalFetcher, HttpTransport, Transport};
use crate::orchestrator::SyncOrchestrator;
use crate::queue::MutationQueue;
use crate::resources::{
  CalendarAccounts, Groups, Labels, ResourceWriter, Settings, Tasks, Workspaces,
};
use crate::store::LocalStore;

pub struct SyncEngine {
  store: Arc<LocalStore>,
  transport: Arc<dyn Transport>,
  connectivity: Connectivity,
  queue: Arc<MutationQueue>,
  fetcher: ConditionalFetcher,
  notifier: ChangeNotifier,
}

impl SyncEngine {
  /// Construct from configuration: opens (and migrates) the local
  /// database and builds the reqwest transport with the configured
  /// bearer token. The engine starts offline until the host reports
  /// connectivity.
  pub fn from_config(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    let transport = Arc::new(HttpTransport::new(&config.server.url, token)?);
    let store = Arc::new(LocalStore::open(&config.database_path()?)?);

    Ok(Self::new(store, transport, Connectivity::new(false)))
  }

  /// Assemble from parts. This is the seam tests and embedders use to
  /// inject their own transport or store.
  pub fn new(
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
  ) -> Self {
    let notifier = ChangeNotifier::new();
    let queue = Arc::new(MutationQueue::new(
      store.clone(),
      transport.clone(),
      connectivity.clone(),
    ));
    let fetcher = ConditionalFetcher::new(
      store.clone(),
      transport.clone(),
      connectivity.clone(),
      notifier.clone(),
    );

    Self {
      store,
      transport,
      connectivity,
      queue,
      fetcher,
      notifier,
    }
  }

  /// Spawn the orchestrator wiring connectivity transitions to queue
  /// replay.
  pub fn start(&self) -> JoinHandle<()> {
    SyncOrchestrator::spawn(self.connectivity.clone(), self.queue.clone())
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn queue(&self) -> &MutationQueue {
    &self.queue
  }

  pub fn store(&self) -> &LocalStore {
    &self.store
  }

  /// Subscribe to local-state change events.
  pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
    self.notifier.subscribe()
  }

  fn writer(&self) -> ResourceWriter {
    ResourceWriter::new(
      self.store.clone(),
      self.transport.clone(),
      self.connectivity.clone(),
      self.queue.clone(),
      self.notifier.clone(),
    )
  }

  pub fn tasks(&self) -> Tasks {
    Tasks::new(self.fetcher.clone(), self.writer())
  }

  pub fn groups(&self) -> Groups {
    Groups::new(self.fetcher.clone(), self.writer())
  }

  pub fn labels(&self) -> Labels {
    Labels::new(self.fetcher.clone(), self.writer())
  }

  pub fn workspaces(&self) -> Workspaces {
    Workspaces::new(self.fetcher.clone(), self.writer())
  }

  pub fn calendar_accounts(&self) -> CalendarAccounts {
    CalendarAccounts::new(self.fetcher.clone(), self.writer())
  }

  pub fn settings(&self) -> Settings {
    Settings::new(
      self.store.clone(),
      self.transport.clone(),
      self.connectivity.clone(),
      self.queue.clone(),
      self.fetcher.clone(),
      self.notifier.clone(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{FakeTransport, Method};
  use crate::resources::Task;
  use crate::store::EntityStore;
  use serde_json::json;
  use std::time::Duration;

  fn engine(online: bool) -> (SyncEngine, Arc<FakeTransport>) {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let transport = Arc::new(FakeTransport::new());
    let engine = SyncEngine::new(store, transport.clone(), Connectivity::new(online));
    (engine, transport)
  }

  #[tokio::test]
  async fn test_offline_edit_replays_on_reconnect() {
    let (engine, transport) = engine(false);

    // Offline edit: local store updated, one PUT buffered
    let task: Task = serde_json::from_value(json!({"id": "T1", "title": "Buy milk"})).unwrap();
    engine.tasks().update(&task).await.unwrap();

    let stored = engine.store().get(EntityStore::Tasks, "T1").unwrap().unwrap();
    assert_eq!(stored["title"], json!("Buy milk"));
    assert_eq!(engine.queue().len().unwrap(), 1);

    let items = engine.store().queued_items().unwrap();
    assert_eq!(items[0].path, "/tasks/T1");
    assert_eq!(items[0].method, "PUT");

    // Connectivity returns: orchestrator fires, replay confirms
    let _orchestrator = engine.start();
    transport.push_response(200, None, None);
    engine.connectivity().set_online(true);

    for _ in 0..50 {
      if engine.queue().is_empty().unwrap() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(engine.queue().is_empty().unwrap());
    let requests = transport.sent_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Put);
    assert_eq!(requests[0].path, "/tasks/T1");

    // Local copy was already correct and stays untouched
    let stored = engine.store().get(EntityStore::Tasks, "T1").unwrap().unwrap();
    assert_eq!(stored["title"], json!("Buy milk"));
  }

  #[tokio::test]
  async fn test_change_events_reach_subscribers() {
    let (engine, transport) = engine(true);
    let mut events = engine.subscribe();

    transport.push_response(200, None, Some(json!([{"id": "g1"}])));
    engine.groups().list().await.unwrap();

    assert_eq!(
      events.recv().await.unwrap(),
      ChangeEvent::CollectionRefreshed(EntityStore::Groups)
    );
  }
}
