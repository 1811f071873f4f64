use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// Outbound change stream consumed by the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeNotification {
    Collection {
        kind: ResourceKind,
        change: ChangeKind,
        key: String,
    },
    /// The system-info record was replaced.
    SystemInfo,
}

impl ChangeNotification {
    pub fn added(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self::Collection {
            kind,
            change: ChangeKind::Added,
            key: key.into(),
        }
    }

    pub fn updated(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self::Collection {
            kind,
            change: ChangeKind::Updated,
            key: key.into(),
        }
    }

    pub fn removed(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self::Collection {
            kind,
            change: ChangeKind::Removed,
            key: key.into(),
        }
    }
}

impl fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeNotification::Collection { kind, change, key } => {
                write!(f, "{kind} {key} {change:?}")
            }
            ChangeNotification::SystemInfo => f.write_str("system info replaced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Emitted on every connection-state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub state: ConnectionState,
    pub generation: u64,
    /// Failure or fault that caused a transition to `Disconnected`.
    pub reason: Option<String>,
}

impl ConnectionEvent {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_serialization() {
        let n = ChangeNotification::removed(ResourceKind::Volume, "v2");
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"type\":\"collection\""));
        assert!(json.contains("\"change\":\"removed\""));
        assert_eq!(n.to_string(), "volume v2 Removed");

        let json = serde_json::to_string(&ChangeNotification::SystemInfo).unwrap();
        assert_eq!(json, "{\"type\":\"system_info\"}");
    }
}
