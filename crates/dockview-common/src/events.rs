use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{DockviewError, Result};

/// Resource kinds the engine tracks as collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Image,
    Network,
    Volume,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Container,
        ResourceKind::Image,
        ResourceKind::Network,
        ResourceKind::Volume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Container => "container",
            ResourceKind::Image => "image",
            ResourceKind::Network => "network",
            ResourceKind::Volume => "volume",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = DockviewError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DockviewError::Decode(format!("unsupported resource kind: {s}")))
    }
}

/// Daemon event actions the monitor subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Start,
    Stop,
    Destroy,
    Die,
    Pull,
    Connect,
    Disconnect,
}

impl EventAction {
    pub const ALL: [EventAction; 8] = [
        EventAction::Create,
        EventAction::Start,
        EventAction::Stop,
        EventAction::Destroy,
        EventAction::Die,
        EventAction::Pull,
        EventAction::Connect,
        EventAction::Disconnect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Start => "start",
            EventAction::Stop => "stop",
            EventAction::Destroy => "destroy",
            EventAction::Die => "die",
            EventAction::Pull => "pull",
            EventAction::Connect => "connect",
            EventAction::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventAction {
    type Err = DockviewError;

    fn from_str(s: &str) -> Result<Self> {
        // Some daemon actions carry a detail suffix, e.g. "exec_start: sh"
        let verb = s.split(':').next().unwrap_or_default().trim();
        EventAction::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(verb))
            .ok_or_else(|| DockviewError::Decode(format!("unsupported event action: {s}")))
    }
}

/// Kinds × actions filter for the event subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub kinds: Vec<ResourceKind>,
    pub actions: Vec<EventAction>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            kinds: ResourceKind::ALL.to_vec(),
            actions: EventAction::ALL.to_vec(),
        }
    }
}

impl EventFilter {
    /// Query filters in the daemon's `{"type": [...], "event": [...]}` form.
    pub fn to_query(&self) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "type".to_string(),
            self.kinds.iter().map(|k| k.as_str().to_string()).collect(),
        );
        filters.insert(
            "event".to_string(),
            self.actions.iter().map(|a| a.as_str().to_string()).collect(),
        );
        filters
    }

    pub fn matches(&self, event: &DaemonEvent) -> bool {
        self.kinds.contains(&event.kind) && self.actions.contains(&event.action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub kind: ResourceKind,
    pub action: EventAction,
    /// Container/image/network id, or the volume name.
    pub resource_id: String,
    /// Container named by a network connect/disconnect event.
    pub related_container: Option<String>,
}

impl DaemonEvent {
    pub fn new(kind: ResourceKind, action: EventAction, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            action,
            resource_id: resource_id.into(),
            related_container: None,
        }
    }

    /// Builds an event from raw payload parts, failing with `Decode` when a part is missing or unknown.
    pub fn decode(
        kind: ResourceKind,
        action: Option<&str>,
        actor_id: Option<&str>,
        attributes: Option<&HashMap<String, String>>,
    ) -> Result<Self> {
        let action: EventAction = action
            .ok_or_else(|| DockviewError::Decode(format!("{kind} event without action")))?
            .parse()?;
        let resource_id = actor_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DockviewError::Decode(format!("{kind} {action} event without actor id")))?;

        let related_container = match kind {
            ResourceKind::Network => attributes
                .and_then(|attrs| attrs.get("container"))
                .filter(|id| !id.is_empty())
                .cloned(),
            ResourceKind::Container | ResourceKind::Image | ResourceKind::Volume => None,
        };

        Ok(Self {
            kind,
            action,
            resource_id: resource_id.to_string(),
            related_container,
        })
    }
}
