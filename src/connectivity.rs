//! Network reachability signal shared across the engine.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle to the runtime's "is the network reachable" flag.
///
/// The host application (or the CLI's probe loop) feeds transitions in
/// via [`set_online`](Connectivity::set_online); engine components query
/// [`is_online`](Connectivity::is_online) before touching the network
/// and subscribe to transitions for replay wiring.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a transition. Redundant updates (online while already
  /// online) do not wake subscribers.
  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|current| {
      if *current != online {
        *current = online;
        true
      } else {
        false
      }
    });
  }

  /// Subscribe to transitions. The receiver observes the value at
  /// subscription time plus every later change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_transitions_are_observed() {
    let connectivity = Connectivity::new(false);
    assert!(!connectivity.is_online());

    let mut rx = connectivity.subscribe();
    connectivity.set_online(true);

    assert!(rx.changed().await.is_ok());
    assert!(*rx.borrow_and_update());
    assert!(connectivity.is_online());
  }

  #[tokio::test]
  async fn test_redundant_updates_do_not_wake_subscribers() {
    let connectivity = Connectivity::new(true);
    let mut rx = connectivity.subscribe();

    connectivity.set_online(true);
    assert!(!rx.has_changed().unwrap());
  }
}
