use std::sync::Arc;

use dockview_common::{
    ContainerRecord, DaemonClient, ImageRecord, NetworkRecord, Result, SystemInfoRecord,
    VolumeRecord,
};
use tracing::{debug, instrument};

/// Every collection plus system info, fetched in one pass.
#[derive(Debug, Clone, Default)]
pub struct FullSnapshot {
    pub system_info: SystemInfoRecord,
    pub containers: Vec<ContainerRecord>,
    pub images: Vec<ImageRecord>,
    pub networks: Vec<NetworkRecord>,
    pub volumes: Vec<VolumeRecord>,
}

/// Issues the "list all" calls for each resource kind. Every call is all-or-nothing.
#[derive(Clone)]
pub struct SnapshotFetcher {
    client: Arc<dyn DaemonClient>,
}

impl SnapshotFetcher {
    pub fn new(client: Arc<dyn DaemonClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn DaemonClient> {
        &self.client
    }

    #[instrument(skip(self))]
    pub async fn fetch_containers(&self) -> Result<Vec<ContainerRecord>> {
        let containers = self.client.list_containers(true, None).await?;
        debug!(count = containers.len(), "Fetched containers");
        Ok(containers)
    }

    /// Targeted refetch. `None` means the daemon no longer reports the container.
    #[instrument(skip(self))]
    pub async fn fetch_container(&self, container_id: &str) -> Result<Option<ContainerRecord>> {
        // The daemon's id filter is a prefix match
        let found = self
            .client
            .list_containers(true, Some(container_id))
            .await?
            .into_iter()
            .find(|container| container.id == container_id);
        debug!(found = found.is_some(), "Fetched container");
        Ok(found)
    }

    #[instrument(skip(self))]
    pub async fn fetch_images(&self) -> Result<Vec<ImageRecord>> {
        let images = self.client.list_images(true).await?;
        debug!(count = images.len(), "Fetched images");
        Ok(images)
    }

    #[instrument(skip(self))]
    pub async fn fetch_networks(&self) -> Result<Vec<NetworkRecord>> {
        let networks = self.client.list_networks().await?;
        debug!(count = networks.len(), "Fetched networks");
        Ok(networks)
    }

    #[instrument(skip(self))]
    pub async fn fetch_volumes(&self) -> Result<Vec<VolumeRecord>> {
        let volumes = self.client.list_volumes().await?;
        debug!(count = volumes.len(), "Fetched volumes");
        Ok(volumes)
    }

    #[instrument(skip(self))]
    pub async fn fetch_system_info(&self) -> Result<SystemInfoRecord> {
        self.client.system_info().await
    }

    /// Sequential pass: system info, containers, images, networks, volumes.
    pub async fn fetch_all(&self) -> Result<FullSnapshot> {
        Ok(FullSnapshot {
            system_info: self.fetch_system_info().await?,
            containers: self.fetch_containers().await?,
            images: self.fetch_images().await?,
            networks: self.fetch_networks().await?,
            volumes: self.fetch_volumes().await?,
        })
    }
}
