use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::ResourceKind;

/// An identity-keyed record held in one of the engine's collections.
///
/// The reconciler is generic over this trait: `key` is the identity-key
/// extractor and `merge_from` the field-copy function.
pub trait Resource: Clone + PartialEq + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn key(&self) -> &str;

    /// Copies the mutable fields of `incoming` into `self`. Identity fields are never touched.
    fn merge_from(&mut self, incoming: Self);
}

/// Converts daemon epoch seconds, falling back to the Unix epoch when out of range.
pub fn timestamp_from_secs(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        };
        Ok(state)
    }
}

/// A container's local copy of its image's canonical fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub created: DateTime<Utc>,
}

impl From<&ImageRecord> for ImageRef {
    fn from(image: &ImageRecord) -> Self {
        Self {
            id: image.id.clone(),
            name: image.name.clone(),
            size: image.size,
            created: image.created,
        }
    }
}

/// A container's local copy of its network's canonical fields. Matched by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    pub id: String,
    pub name: String,
    pub driver: String,
}

impl From<&NetworkRecord> for NetworkRef {
    fn from(network: &NetworkRecord) -> Self {
        Self {
            id: network.id.clone(),
            name: network.name.clone(),
            driver: network.driver.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub created: DateTime<Utc>,
    pub command: String,
    pub status: String,
    pub image: ImageRef,
    pub network: NetworkRef,
    pub labels: BTreeMap<String, String>,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Case-insensitive match against the display name and the image name.
    pub fn matches(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query) || self.image.name.to_lowercase().contains(&query)
    }
}

impl Resource for ContainerRecord {
    const KIND: ResourceKind = ResourceKind::Container;

    fn key(&self) -> &str {
        &self.id
    }

    fn merge_from(&mut self, incoming: Self) {
        self.name = incoming.name;
        self.state = incoming.state;
        self.created = incoming.created;
        self.command = incoming.command;
        self.status = incoming.status;
        self.image = incoming.image;
        self.network = incoming.network;
        self.labels = incoming.labels;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    /// Primary tag, empty for untagged images.
    pub name: String,
    pub size: i64,
    pub created: DateTime<Utc>,
}

impl Resource for ImageRecord {
    const KIND: ResourceKind = ResourceKind::Image;

    fn key(&self) -> &str {
        &self.id
    }

    fn merge_from(&mut self, incoming: Self) {
        self.name = incoming.name;
        self.size = incoming.size;
        self.created = incoming.created;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    pub driver: String,
}

impl Resource for NetworkRecord {
    const KIND: ResourceKind = ResourceKind::Network;

    fn key(&self) -> &str {
        &self.id
    }

    fn merge_from(&mut self, incoming: Self) {
        self.name = incoming.name;
        self.driver = incoming.driver;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub name: String,
    pub driver: String,
}

impl Resource for VolumeRecord {
    const KIND: ResourceKind = ResourceKind::Volume;

    fn key(&self) -> &str {
        &self.name
    }

    fn merge_from(&mut self, incoming: Self) {
        self.driver = incoming.driver;
    }
}

/// Host snapshot. Replaced wholesale on every refresh, never diffed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfoRecord {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub name: String,
    pub containers: u32,
    pub containers_running: u32,
    pub containers_stopped: u32,
    pub containers_paused: u32,
    pub images: u32,
}

impl SystemInfoRecord {
    pub fn memory_gb(&self) -> f64 {
        self.memory_bytes as f64 / 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_parsing() {
        assert_eq!("running".parse::<ContainerState>().unwrap(), ContainerState::Running);
        assert_eq!("Exited".parse::<ContainerState>().unwrap(), ContainerState::Exited);
        assert_eq!(" dead ".parse::<ContainerState>().unwrap(), ContainerState::Dead);
        assert_eq!("zombie".parse::<ContainerState>().unwrap(), ContainerState::Unknown);
        assert_eq!(ContainerState::Restarting.to_string(), "restarting");
    }

    #[test]
    fn test_memory_gb() {
        let info = SystemInfoRecord {
            memory_bytes: 16_000_000_000,
            ..Default::default()
        };
        assert!((info.memory_gb() - 16.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timestamp_fallback() {
        assert_eq!(timestamp_from_secs(0), DateTime::<Utc>::default());
        assert_eq!(timestamp_from_secs(1_700_000_000).timestamp(), 1_700_000_000);
        assert_eq!(timestamp_from_secs(i64::MAX), DateTime::<Utc>::default());
    }

    #[test]
    fn test_volume_merge_keeps_identity() {
        let mut cached = VolumeRecord {
            name: "data".to_string(),
            driver: "local".to_string(),
        };
        cached.merge_from(VolumeRecord {
            name: "data".to_string(),
            driver: "nfs".to_string(),
        });
        assert_eq!(cached.key(), "data");
        assert_eq!(cached.driver, "nfs");
    }

    #[test]
    fn test_container_matches_query() {
        let container = ContainerRecord {
            id: "abc".to_string(),
            name: "web-frontend".to_string(),
            state: ContainerState::Running,
            created: DateTime::<Utc>::default(),
            command: "nginx".to_string(),
            status: "Up 2 hours".to_string(),
            image: ImageRef {
                name: "nginx:latest".to_string(),
                ..Default::default()
            },
            network: NetworkRef::default(),
            labels: BTreeMap::new(),
        };
        assert!(container.matches(""));
        assert!(container.matches("FRONT"));
        assert!(container.matches("nginx"));
        assert!(!container.matches("postgres"));
    }
}
