//! Mapping from bollard API models to engine records.

use std::collections::BTreeMap;

use bollard::models::{
    ContainerSummary, EventMessage, EventMessageTypeEnum, ImageSummary, Network, SystemInfo,
    Volume,
};
use dockview_common::records::timestamp_from_secs;
use dockview_common::{
    ContainerRecord, ContainerState, DaemonEvent, DockviewError, ImageRecord, ImageRef,
    NetworkRecord, NetworkRef, ResourceKind, Result, SystemInfoRecord, VolumeRecord,
};
use tracing::debug;

/// Rows without an id are dropped.
pub fn container_record(summary: ContainerSummary) -> Option<ContainerRecord> {
    let id = summary.id.filter(|id| !id.is_empty())?;

    let name = summary
        .names
        .as_deref()
        .and_then(|names| names.first())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let state = summary
        .state
        .as_deref()
        .map(|s| s.parse().unwrap_or(ContainerState::Unknown))
        .unwrap_or(ContainerState::Unknown);
    if state == ContainerState::Unknown {
        debug!(container_id = %id, raw_state = ?summary.state, "Unrecognised container state");
    }

    // Network map is unordered; take the alphabetically first name
    let network = summary
        .network_settings
        .and_then(|settings| settings.networks)
        .and_then(|networks| {
            networks
                .into_iter()
                .min_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(name, endpoint)| NetworkRef {
                    id: endpoint.network_id.unwrap_or_default(),
                    name,
                    driver: String::new(),
                })
        })
        .unwrap_or_default();

    Some(ContainerRecord {
        id,
        name,
        state,
        created: timestamp_from_secs(summary.created.unwrap_or_default()),
        command: summary.command.unwrap_or_default(),
        status: summary.status.unwrap_or_default(),
        image: ImageRef {
            id: summary.image_id.unwrap_or_default(),
            name: summary.image.unwrap_or_default(),
            ..Default::default()
        },
        network,
        labels: summary
            .labels
            .map(|labels| labels.into_iter().collect::<BTreeMap<_, _>>())
            .unwrap_or_default(),
    })
}

pub fn image_record(summary: ImageSummary) -> ImageRecord {
    ImageRecord {
        name: summary.repo_tags.into_iter().next().unwrap_or_default(),
        id: summary.id,
        size: summary.size,
        created: timestamp_from_secs(summary.created),
    }
}

/// Rows without an id are dropped.
pub fn network_record(network: Network) -> Option<NetworkRecord> {
    let id = network.id.filter(|id| !id.is_empty())?;
    Some(NetworkRecord {
        id,
        name: network.name.unwrap_or_default(),
        driver: network.driver.unwrap_or_default(),
    })
}

pub fn volume_record(volume: Volume) -> VolumeRecord {
    VolumeRecord {
        name: volume.name,
        driver: volume.driver,
    }
}

pub fn system_info_record(info: SystemInfo) -> SystemInfoRecord {
    fn count(value: Option<i64>) -> u32 {
        value
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or_default()
    }

    SystemInfoRecord {
        os: info.operating_system.unwrap_or_default(),
        architecture: info.architecture.unwrap_or_default(),
        cpu_cores: count(info.ncpu),
        memory_bytes: info
            .mem_total
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or_default(),
        name: info.name.unwrap_or_default(),
        containers: count(info.containers),
        containers_running: count(info.containers_running),
        containers_stopped: count(info.containers_stopped),
        containers_paused: count(info.containers_paused),
        images: count(info.images),
    }
}

pub fn daemon_event(message: EventMessage) -> Result<DaemonEvent> {
    let kind = match message.typ {
        Some(EventMessageTypeEnum::CONTAINER) => ResourceKind::Container,
        Some(EventMessageTypeEnum::IMAGE) => ResourceKind::Image,
        Some(EventMessageTypeEnum::NETWORK) => ResourceKind::Network,
        Some(EventMessageTypeEnum::VOLUME) => ResourceKind::Volume,
        other => {
            return Err(DockviewError::Decode(format!(
                "unsupported event type: {other:?}"
            )))
        }
    };

    let actor = message.actor.unwrap_or_default();
    DaemonEvent::decode(
        kind,
        message.action.as_deref(),
        actor.id.as_deref(),
        actor.attributes.as_ref(),
    )
}
