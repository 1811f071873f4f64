//! Keeps the image and network copies held by containers in step with the
//! canonical image and network collections.

use std::collections::HashSet;
use std::sync::Arc;

use dockview_common::{ContainerRecord, ImageRecord, ImageRef, NetworkRecord, NetworkRef};
use tracing::debug;

use crate::reconciler::Collection;

/// Fills an incoming container's denormalized fields from the cache before it is diffed.
///
/// Unknown images and networks keep the previous record's copy when the
/// reference is unchanged, otherwise whatever the daemon reported.
pub(crate) fn enrich(
    incoming: &mut ContainerRecord,
    previous: Option<&ContainerRecord>,
    images: &Collection<ImageRecord>,
    networks: &Collection<NetworkRecord>,
) {
    if let Some(image) = images.get(&incoming.image.id) {
        incoming.image = ImageRef::from(image.as_ref());
    } else if let Some(previous) = previous.filter(|p| p.image.id == incoming.image.id) {
        incoming.image = previous.image.clone();
    }

    if incoming.network.name.is_empty() {
        return;
    }
    if let Some(network) = find_network(networks, &incoming.network.name) {
        incoming.network = NetworkRef::from(network.as_ref());
    } else if let Some(previous) = previous.filter(|p| p.network.name == incoming.network.name) {
        incoming.network = previous.network.clone();
    }
}

fn find_network<'a>(
    networks: &'a Collection<NetworkRecord>,
    name: &str,
) -> Option<&'a Arc<NetworkRecord>> {
    networks.iter().find(|network| network.name == name)
}

/// Copies the listed images into every container that references them.
/// Returns the keys of containers whose copy changed.
pub(crate) fn propagate_images(
    containers: &mut Collection<ContainerRecord>,
    images: &Collection<ImageRecord>,
    touched: &[&str],
) -> Vec<String> {
    if touched.is_empty() {
        return Vec::new();
    }
    let touched: HashSet<&str> = touched.iter().copied().collect();

    let mut changed = Vec::new();
    for (key, container) in containers.iter_mut() {
        if !touched.contains(container.image.id.as_str()) {
            continue;
        }
        let Some(image) = images.get(&container.image.id) else {
            continue;
        };
        let canonical = ImageRef::from(image.as_ref());
        if container.image != canonical {
            Arc::make_mut(container).image = canonical;
            changed.push(key.clone());
        }
    }

    if !changed.is_empty() {
        debug!(containers = changed.len(), "Propagated image fields");
    }
    changed
}

/// Copies the listed networks (by id) into every container attached to them by name.
/// Returns the keys of containers whose copy changed.
pub(crate) fn propagate_networks(
    containers: &mut Collection<ContainerRecord>,
    networks: &Collection<NetworkRecord>,
    touched: &[&str],
) -> Vec<String> {
    let canonical: Vec<NetworkRef> = touched
        .iter()
        .filter_map(|id| networks.get(id))
        .map(|network| NetworkRef::from(network.as_ref()))
        .collect();
    if canonical.is_empty() {
        return Vec::new();
    }

    let mut changed = Vec::new();
    for (key, container) in containers.iter_mut() {
        let Some(network) = canonical.iter().find(|n| n.name == container.network.name) else {
            continue;
        };
        if &container.network != network {
            Arc::make_mut(container).network = network.clone();
            changed.push(key.clone());
        }
    }

    if !changed.is_empty() {
        debug!(containers = changed.len(), "Propagated network fields");
    }
    changed
}
