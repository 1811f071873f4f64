//! Connection lifecycle: owns the client handle, the generation counter and
//! the event monitor of the current generation.

use std::sync::Arc;
use std::time::Duration;

use dockview_common::{
    ChangeNotification, ConnectionEvent, ConnectionState, DaemonConnector, DockviewError,
    EventFilter, ResourceKind, Result,
};
use tokio::sync::{broadcast, watch, Mutex, RwLockReadGuard, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::cache::{CacheStore, CacheUpdate, ResourceCache};
use crate::client::BollardConnector;
use crate::config::EngineConfig;
use crate::fetcher::SnapshotFetcher;
use crate::monitor::{self, EventMonitor, MonitorContext, MonitorState};

/// The open client handle of one generation.
#[derive(Clone)]
pub(crate) struct Session {
    pub generation: u64,
    pub fetcher: SnapshotFetcher,
    pub token: CancellationToken,
}

struct LinkState {
    state: ConnectionState,
    generation: u64,
    session: Option<Session>,
}

/// Connection state machine. Every transition is published on `events`.
pub(crate) struct Link {
    inner: Mutex<LinkState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Link {
    pub fn new(buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Mutex::new(LinkState {
                state: ConnectionState::Disconnected,
                generation: 0,
                session: None,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Starts a new generation and returns it with its cancellation token.
    pub async fn begin(&self) -> (u64, CancellationToken) {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.session.take() {
            previous.token.cancel();
        }
        inner.generation += 1;
        let generation = inner.generation;
        self.transition(&mut inner, ConnectionState::Connecting, None);
        (generation, CancellationToken::new())
    }

    pub async fn established(&self, session: Session) {
        let mut inner = self.inner.lock().await;
        if inner.generation != session.generation {
            session.token.cancel();
            return;
        }
        inner.session = Some(session);
        self.transition(&mut inner, ConnectionState::Connected, None);
    }

    pub async fn failed(&self, generation: u64, reason: String) {
        let mut inner = self.inner.lock().await;
        if inner.generation == generation {
            self.transition(&mut inner, ConnectionState::Disconnected, Some(reason));
        }
    }

    /// Explicit disconnect of whatever generation is current.
    pub async fn closed(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.session.take() {
            session.token.cancel();
        }
        self.transition(&mut inner, ConnectionState::Disconnected, None);
    }

    /// Fault reported by a generation's monitor. Ignored once that generation is superseded.
    pub async fn lost(&self, generation: u64, reason: String) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != ConnectionState::Connected {
            return;
        }
        if let Some(session) = inner.session.take() {
            session.token.cancel();
        }
        self.transition(&mut inner, ConnectionState::Disconnected, Some(reason));
    }

    pub async fn session(&self) -> Result<Session> {
        self.inner
            .lock()
            .await
            .session
            .clone()
            .ok_or(DockviewError::NotConnected)
    }

    fn transition(&self, inner: &mut LinkState, state: ConnectionState, reason: Option<String>) {
        if inner.state == state {
            return;
        }
        inner.state = state;
        info!(generation = inner.generation, ?state, reason = ?reason, "Connection state changed");
        let _ = self.events.send(ConnectionEvent {
            state,
            generation: inner.generation,
            reason,
        });
    }
}

/// The synchronization engine. Owns the cache, the connection and the
/// current generation's event monitor.
pub struct SyncEngine {
    config: EngineConfig,
    connector: Arc<dyn DaemonConnector>,
    store: CacheStore,
    link: Arc<Link>,
    // Also serializes connect and disconnect
    monitor: Mutex<Option<EventMonitor>>,
    limiter: Arc<Semaphore>,
    filter: EventFilter,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, connector: Arc<dyn DaemonConnector>) -> Self {
        let store = CacheStore::new(config.notification_buffer);
        let link = Arc::new(Link::new(config.notification_buffer));
        let limiter = Arc::new(Semaphore::new(config.max_inflight_refreshes.max(1)));
        Self {
            config,
            connector,
            store,
            link,
            monitor: Mutex::new(None),
            limiter,
            filter: EventFilter::default(),
        }
    }

    /// Engine backed by the bollard daemon client.
    pub fn with_bollard(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let connector = Arc::new(BollardConnector::new(config.timeout_secs));
        Ok(Self::new(config, connector))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connects (or reconnects) to `endpoint` and returns the new generation.
    ///
    /// The previous generation is cancelled and its monitor joined first. The
    /// initial pass is fetched in full before anything is applied, so a failed
    /// connect leaves the cache as it was.
    #[instrument(skip(self), fields(generation = tracing::field::Empty))]
    pub async fn connect(&self, endpoint: &str) -> Result<u64> {
        let mut monitor = self.monitor.lock().await;
        if let Some(previous) = monitor.take() {
            info!(previous = previous.generation(), "Stopping previous event monitor");
            previous.shutdown().await;
        }

        let (generation, token) = self.link.begin().await;
        tracing::Span::current().record("generation", generation);

        match self.initial_pass(endpoint, &token).await {
            Ok(fetcher) => {
                let session = Session {
                    generation,
                    fetcher: fetcher.clone(),
                    token: token.clone(),
                };
                self.link.established(session).await;
                *monitor = Some(EventMonitor::spawn(MonitorContext {
                    generation,
                    fetcher,
                    store: self.store.clone(),
                    link: Arc::clone(&self.link),
                    limiter: Arc::clone(&self.limiter),
                    token,
                    filter: self.filter.clone(),
                    poll_interval: self.config.poll_interval_secs.map(Duration::from_secs),
                }));
                info!(%endpoint, "Connected");
                Ok(generation)
            }
            Err(e) => {
                token.cancel();
                error!(%endpoint, error = %e, "Connect failed");
                self.link.failed(generation, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn initial_pass(
        &self,
        endpoint: &str,
        token: &CancellationToken,
    ) -> Result<SnapshotFetcher> {
        let client = self.connector.connect(endpoint).await?;
        let fetcher = SnapshotFetcher::new(client);

        let stamp = self.store.stamp();
        let snapshot = fetcher.fetch_all().await?;
        let seq = stamp.seq();
        self.store
            .apply(CacheUpdate::Full { seq, snapshot }, Some(token))
            .await;
        Ok(fetcher)
    }

    /// Stops the event monitor and drops the client handle. The cache keeps its last-known state.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let mut monitor = self.monitor.lock().await;
        if let Some(current) = monitor.take() {
            current.shutdown().await;
        }
        self.link.closed().await;
    }

    /// Forces a full reconciliation of one collection.
    pub async fn refresh(&self, kind: ResourceKind) -> Result<()> {
        let session = self.session().await?;
        if !monitor::refresh_collection(&session.fetcher, &self.store, kind, Some(&session.token))
            .await?
        {
            warn!(%kind, "Refresh result discarded");
        }
        Ok(())
    }

    /// Forces a full pass over system info and every collection.
    pub async fn refresh_all(&self) -> Result<()> {
        let session = self.session().await?;
        if !monitor::refresh_all(&session.fetcher, &self.store, Some(&session.token)).await? {
            warn!("Refresh result discarded");
        }
        Ok(())
    }

    pub(crate) async fn session(&self) -> Result<Session> {
        self.link.session().await
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeNotification> {
        self.store.subscribe()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.link.subscribe()
    }

    /// Read access to the cache. Writers wait while the guard is held.
    pub async fn cache(&self) -> RwLockReadGuard<'_, ResourceCache> {
        self.store.read().await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.link.state().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_state().await == ConnectionState::Connected
    }

    /// Latest generation number; 0 before the first connect.
    pub async fn generation(&self) -> u64 {
        self.link.generation().await
    }

    pub async fn monitor_state(&self) -> Option<MonitorState> {
        self.monitor.lock().await.as_ref().map(EventMonitor::state)
    }

    pub async fn watch_monitor(&self) -> Option<watch::Receiver<MonitorState>> {
        self.monitor.lock().await.as_ref().map(EventMonitor::watch)
    }
}
