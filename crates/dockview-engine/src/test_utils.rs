/// Test utilities for conditional test execution and record fixtures
use std::collections::BTreeMap;
use std::process::Command;

use dockview_common::records::timestamp_from_secs;
use dockview_common::{
    ContainerRecord, ContainerState, ImageRecord, ImageRef, NetworkRecord, NetworkRef,
    SystemInfoRecord, VolumeRecord,
};

pub fn has_docker() -> bool {
    // Check if docker command exists and the daemon answers
    Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Macro to skip tests when no daemon is reachable
#[macro_export]
macro_rules! require_docker {
    () => {
        if !$crate::test_utils::has_docker() {
            eprintln!("Test ignored: Docker not available");
            return;
        }
    };
}

/// Container attached to `bridge`, carrying only the image id as the daemon reports it.
pub fn container(id: &str, state: ContainerState, image_id: &str) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        name: id.to_lowercase(),
        state,
        created: timestamp_from_secs(1_700_000_000),
        command: "/bin/sh".to_string(),
        status: state.to_string(),
        image: ImageRef {
            id: image_id.to_string(),
            ..Default::default()
        },
        network: NetworkRef {
            name: "bridge".to_string(),
            ..Default::default()
        },
        labels: BTreeMap::new(),
    }
}

pub fn image(id: &str, name: &str, size: i64) -> ImageRecord {
    ImageRecord {
        id: id.to_string(),
        name: name.to_string(),
        size,
        created: timestamp_from_secs(1_690_000_000),
    }
}

pub fn network(id: &str, name: &str, driver: &str) -> NetworkRecord {
    NetworkRecord {
        id: id.to_string(),
        name: name.to_string(),
        driver: driver.to_string(),
    }
}

pub fn volume(name: &str, driver: &str) -> VolumeRecord {
    VolumeRecord {
        name: name.to_string(),
        driver: driver.to_string(),
    }
}

pub fn system_info(containers: u32, running: u32) -> SystemInfoRecord {
    SystemInfoRecord {
        os: "Linux".to_string(),
        architecture: "x86_64".to_string(),
        cpu_cores: 4,
        memory_bytes: 8_000_000_000,
        name: "test-daemon".to_string(),
        containers,
        containers_running: running,
        containers_stopped: containers.saturating_sub(running),
        containers_paused: 0,
        images: 2,
    }
}
