//! Continuously reconciled in-memory view of a container daemon's resources.

// Re-export dependencies potentially needed by consumers
pub use bollard;
pub use dockview_common as common;

pub mod actions;
pub mod cache;
pub mod client;
pub mod config;
pub mod convert;
pub mod cross_ref;
pub mod fetcher;
pub mod monitor;
pub mod reconciler;
pub mod supervisor;
pub mod test_utils;

pub use cache::{CacheStore, ResourceCache};
pub use client::{BollardClient, BollardConnector, ClientError};
pub use config::EngineConfig;
pub use fetcher::{FullSnapshot, SnapshotFetcher};
pub use monitor::{EventMonitor, MonitorState};
pub use reconciler::{ChangeSet, Collection};
pub use supervisor::SyncEngine;
