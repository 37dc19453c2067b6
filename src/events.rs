//! Change notifications for embedding UI layers.
//!
//! The engine never depends on a UI framework; instead it broadcasts
//! every local-state mutation so views can re-read the store (or the
//! resource modules) when something they render changes.

use tokio::sync::broadcast;

use crate::store::EntityStore;

/// A mutation of locally persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
  /// A full-collection snapshot replaced the store contents.
  CollectionRefreshed(EntityStore),
  /// A single record was created or overwritten.
  RecordUpserted(EntityStore, String),
  /// A single record was deleted.
  RecordDeleted(EntityStore, String),
  /// A cache-meta blob (e.g. settings) changed.
  MetaUpdated(String),
}

/// Broadcast fan-out for [`ChangeEvent`]s. Slow subscribers may miss
/// events (bounded channel); they should treat a lagged receiver as
/// "re-read everything".
#[derive(Clone)]
pub struct ChangeNotifier {
  tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(64);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
    self.tx.subscribe()
  }

  /// Emit an event. Having no subscribers is fine.
  pub(crate) fn emit(&self, event: ChangeEvent) {
    let _ = self.tx.send(event);
  }
}

impl Default for ChangeNotifier {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_receive_events() {
    let notifier = ChangeNotifier::new();
    let mut rx = notifier.subscribe();

    notifier.emit(ChangeEvent::RecordUpserted(EntityStore::Tasks, "t1".into()));
    assert_eq!(
      rx.recv().await.unwrap(),
      ChangeEvent::RecordUpserted(EntityStore::Tasks, "t1".into())
    );
  }

  #[test]
  fn test_emit_without_subscribers_is_fine() {
    let notifier = ChangeNotifier::new();
    notifier.emit(ChangeEvent::MetaUpdated("settings".into()));
  }
}
