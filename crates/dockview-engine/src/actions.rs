//! Container actions. These only forward to the daemon; the resulting state
//! arrives through the event monitor.

use dockview_common::{Result, UpdateOptions};
use tracing::{info, instrument};

use crate::supervisor::SyncEngine;

impl SyncEngine {
    #[instrument(skip(self))]
    pub async fn start_container(&self, container_id: &str) -> Result<()> {
        let session = self.session().await?;
        session.fetcher.client().start_container(container_id).await?;
        info!(%container_id, "Start requested");
        Ok(())
    }

    /// Stops a container, waiting `grace_secs` (or the configured default) before killing it.
    #[instrument(skip(self))]
    pub async fn stop_container(&self, container_id: &str, grace_secs: Option<i64>) -> Result<()> {
        let grace_secs = grace_secs.unwrap_or(self.config().stop_grace_secs);
        let session = self.session().await?;
        session
            .fetcher
            .client()
            .stop_container(container_id, grace_secs)
            .await?;
        info!(%container_id, grace_secs, "Stop requested");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_container(&self, container_id: &str, options: &UpdateOptions) -> Result<()> {
        let session = self.session().await?;
        session
            .fetcher
            .client()
            .update_container(container_id, options)
            .await?;
        info!(%container_id, "Resource limits updated");
        Ok(())
    }
}
