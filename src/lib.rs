//! Offline-first data synchronization engine for a task-management
//! client.
//!
//! The engine keeps the application usable across unreliable
//! connectivity: reads are cache-validated against the server (ETag)
//! and degrade to the local copy, writes apply locally first and are
//! buffered in a durable queue until the server confirms them.

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod events;
pub mod net;
pub mod orchestrator;
pub mod queue;
pub mod resources;
pub mod store;

pub use config::Config;
pub use connectivity::Connectivity;
pub use engine::SyncEngine;
pub use events::ChangeEvent;
