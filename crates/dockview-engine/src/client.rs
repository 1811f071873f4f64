//! bollard-backed implementation of the daemon client collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    ListContainersOptions, StartContainerOptions, StopContainerOptions, UpdateContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::ListImagesOptions;
use bollard::network::ListNetworksOptions;
use bollard::system::EventsOptions;
use bollard::volume::ListVolumesOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use dockview_common::{
    ContainerRecord, DaemonClient, DaemonConnector, DockviewError, EventFilter, EventStream,
    ImageRecord, NetworkRecord, Result, SystemInfoRecord, UpdateOptions, VolumeRecord,
};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::convert;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to open daemon connection to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: BollardError,
    },
    #[error("Unsupported daemon endpoint: {0}")]
    UnsupportedEndpoint(String),
    #[error("Docker API error: {0}")]
    DockerApi(#[from] BollardError), // Catch-all for request failures
}

impl From<ClientError> for DockviewError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::UnsupportedEndpoint(_) => DockviewError::Config(err.to_string()),
            ClientError::Connect { .. } | ClientError::DockerApi(_) => {
                DockviewError::Transport(err.to_string())
            }
        }
    }
}

fn transport(err: BollardError) -> DockviewError {
    ClientError::DockerApi(err).into()
}

// A payload that fails to parse is a bad event, not a broken connection
fn event_error(err: BollardError) -> DockviewError {
    match err {
        BollardError::JsonDataError { .. } | BollardError::JsonSerdeError { .. } => {
            DockviewError::Decode(err.to_string())
        }
        other => transport(other),
    }
}

/// Opens a bollard handle for the endpoint forms accepted by the engine.
pub fn open_docker(endpoint: &str, timeout_secs: u64) -> std::result::Result<Docker, ClientError> {
    let endpoint = endpoint.trim();
    let docker = if endpoint.is_empty() || endpoint.eq_ignore_ascii_case("default") {
        Docker::connect_with_local_defaults()
    } else if endpoint.starts_with("unix://") {
        return connect_unix(endpoint, timeout_secs);
    } else if endpoint.starts_with("npipe://") {
        return connect_named_pipe(endpoint, timeout_secs);
    } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
        Docker::connect_with_http(endpoint, timeout_secs, API_DEFAULT_VERSION)
    } else {
        return Err(ClientError::UnsupportedEndpoint(endpoint.to_string()));
    };

    docker.map_err(|source| ClientError::Connect {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[cfg(unix)]
fn connect_unix(endpoint: &str, timeout_secs: u64) -> std::result::Result<Docker, ClientError> {
    Docker::connect_with_unix(endpoint, timeout_secs, API_DEFAULT_VERSION).map_err(|source| {
        ClientError::Connect {
            endpoint: endpoint.to_string(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn connect_unix(endpoint: &str, _timeout_secs: u64) -> std::result::Result<Docker, ClientError> {
    Err(ClientError::UnsupportedEndpoint(endpoint.to_string()))
}

#[cfg(windows)]
fn connect_named_pipe(
    endpoint: &str,
    timeout_secs: u64,
) -> std::result::Result<Docker, ClientError> {
    Docker::connect_with_named_pipe(endpoint, timeout_secs, API_DEFAULT_VERSION).map_err(
        |source| ClientError::Connect {
            endpoint: endpoint.to_string(),
            source,
        },
    )
}

#[cfg(not(windows))]
fn connect_named_pipe(
    endpoint: &str,
    _timeout_secs: u64,
) -> std::result::Result<Docker, ClientError> {
    Err(ClientError::UnsupportedEndpoint(endpoint.to_string()))
}

#[derive(Debug, Clone)]
pub struct BollardConnector {
    timeout_secs: u64,
}

impl BollardConnector {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl DaemonConnector for BollardConnector {
    #[instrument(skip(self))]
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn DaemonClient>> {
        let docker = open_docker(endpoint, self.timeout_secs)?;
        // Handle creation is lazy; ping so an unreachable daemon fails here
        docker.ping().await.map_err(|source| ClientError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        info!(%endpoint, "Daemon reachable");
        Ok(Arc::new(BollardClient::new(Arc::new(docker))))
    }
}

#[derive(Clone)]
pub struct BollardClient {
    docker: Arc<Docker>,
}

impl BollardClient {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl DaemonClient for BollardClient {
    async fn list_containers(
        &self,
        all: bool,
        id_filter: Option<&str>,
    ) -> Result<Vec<ContainerRecord>> {
        let mut filters = HashMap::new();
        if let Some(id) = id_filter {
            filters.insert("id".to_string(), vec![id.to_string()]);
        }
        let options = ListContainersOptions::<String> {
            all,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(transport)?;
        Ok(summaries
            .into_iter()
            .filter_map(convert::container_record)
            .collect())
    }

    async fn list_images(&self, all: bool) -> Result<Vec<ImageRecord>> {
        let options = ListImagesOptions::<String> {
            all,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(transport)?;
        Ok(images.into_iter().map(convert::image_record).collect())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkRecord>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(transport)?;
        Ok(networks
            .into_iter()
            .filter_map(convert::network_record)
            .collect())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        let response = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(transport)?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(convert::volume_record)
            .collect())
    }

    async fn system_info(&self) -> Result<SystemInfoRecord> {
        let info = self.docker.info().await.map_err(transport)?;
        Ok(convert::system_info_record(info))
    }

    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream> {
        let options = EventsOptions::<String> {
            filters: filter.to_query(),
            ..Default::default()
        };
        debug!(?filter, "Opening daemon event subscription");

        let stream = self.docker.events(Some(options)).map(|item| match item {
            Ok(message) => convert::daemon_event(message),
            Err(e) => Err(event_error(e)),
        });
        Ok(stream.boxed())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(transport)
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: grace_secs }))
            .await
            .map_err(transport)
    }

    async fn update_container(&self, id: &str, options: &UpdateOptions) -> Result<()> {
        let update = UpdateContainerOptions::<String> {
            memory: options.memory_bytes,
            memory_swap: options.memory_swap_bytes,
            cpu_shares: options
                .cpu_shares
                .and_then(|shares| isize::try_from(shares).ok()),
            nano_cpus: options.nano_cpus,
            pids_limit: options.pids_limit,
            ..Default::default()
        };
        self.docker
            .update_container(id, update)
            .await
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_unsupported_endpoint_is_config_error() {
        let err = open_docker("ftp://example.com", 5).unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedEndpoint(_)));
        assert!(matches!(DockviewError::from(err), DockviewError::Config(_)));
    }

    #[test]
    fn test_http_endpoint_opens_lazily() {
        // No request is issued until the first call
        assert!(open_docker("tcp://127.0.0.1:2375", 5).is_ok());
        assert!(open_docker("http://127.0.0.1:2375", 5).is_ok());
    }

    async fn serve_events(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("tcp://{addr}")
    }

    #[tokio::test]
    async fn test_malformed_event_payload_is_decode_error() {
        let endpoint = serve_events(concat!(
            "{\"Type\": 12, garbage}\n",
            "{\"Type\":\"container\",\"Action\":\"start\",\"Actor\":{\"ID\":\"abc\",\"Attributes\":{}},\"time\":1}\n",
        ))
        .await;
        let client = BollardClient::new(Arc::new(open_docker(&endpoint, 5).unwrap()));

        let mut events = client.subscribe_events(&EventFilter::default()).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("event stream timeout")
            .expect("one item before the stream ends");
        assert!(matches!(first, Err(DockviewError::Decode(_))), "{first:?}");
    }
}
