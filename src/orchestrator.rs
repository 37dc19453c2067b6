//! Wiring between the connectivity signal and queue replay.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connectivity::Connectivity;
use crate::queue::MutationQueue;

/// Listens for connectivity transitions and process start, and triggers
/// queue replay. Pure wiring; holds no state of its own.
pub struct SyncOrchestrator;

impl SyncOrchestrator {
  /// Spawn the replay loop: one pass immediately when starting online,
  /// then one pass on every offline-to-online transition. The task ends
  /// when the connectivity handle is dropped.
  pub fn spawn(connectivity: Connectivity, queue: Arc<MutationQueue>) -> JoinHandle<()> {
    let mut rx = connectivity.subscribe();

    tokio::spawn(async move {
      let mut was_online = connectivity.is_online();
      if was_online {
        if let Err(e) = queue.process().await {
          warn!(error = %e, "startup replay failed");
        }
      }

      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online && !was_online {
          info!("connectivity restored, replaying buffered writes");
          if let Err(e) = queue.process().await {
            warn!(error = %e, "replay after reconnect failed");
          }
        }
        was_online = online;
      }
    })
  }
}
