// Re-export dependencies used in public interfaces of common types

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod events;
pub mod notifications;
pub mod records;

pub use events::{DaemonEvent, EventAction, EventFilter, ResourceKind};
pub use notifications::{ChangeKind, ChangeNotification, ConnectionEvent, ConnectionState};
pub use records::{
    ContainerRecord, ContainerState, ImageRecord, ImageRef, NetworkRecord, NetworkRef, Resource,
    SystemInfoRecord, VolumeRecord,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DockviewError {
    #[error("Not connected: call connect() first")]
    NotConnected,

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl DockviewError {
    /// Whether the failure came from the daemon connection rather than from the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, DockviewError::Transport(_))
    }
}

// Define the primary Result type for engine operations
pub type Result<T> = std::result::Result<T, DockviewError>;

/// Live daemon events. Transport failures end the subscription, decode failures do not.
pub type EventStream = BoxStream<'static, Result<DaemonEvent>>;

/// Resource-limit changes for a running container. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub memory_bytes: Option<i64>,
    pub memory_swap_bytes: Option<i64>,
    pub cpu_shares: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub pids_limit: Option<i64>,
}

impl UpdateOptions {
    pub fn is_empty(&self) -> bool {
        self == &UpdateOptions::default()
    }
}

/// Daemon client surface consumed by the engine.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Lists containers. `id_filter` narrows the listing to ids matching the given prefix.
    async fn list_containers(
        &self,
        all: bool,
        id_filter: Option<&str>,
    ) -> Result<Vec<ContainerRecord>>;

    async fn list_images(&self, all: bool) -> Result<Vec<ImageRecord>>;

    async fn list_networks(&self) -> Result<Vec<NetworkRecord>>;

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>>;

    async fn system_info(&self) -> Result<SystemInfoRecord>;

    /// Opens the event subscription. Dropping the stream ends it.
    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<()>;

    async fn update_container(&self, id: &str, options: &UpdateOptions) -> Result<()>;
}

/// Opens client handles for daemon endpoints.
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn DaemonClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_options_empty() {
        assert!(UpdateOptions::default().is_empty());

        let options = UpdateOptions {
            memory_bytes: Some(256 * 1024 * 1024),
            ..Default::default()
        };
        assert!(!options.is_empty());

        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("268435456"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DockviewError::NotConnected.to_string(),
            "Not connected: call connect() first"
        );
        let err = DockviewError::Transport("connection refused".to_string());
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Transport Error: connection refused");
        assert!(!DockviewError::Decode("bad".to_string()).is_transport());
    }
}
