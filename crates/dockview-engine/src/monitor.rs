//! Event subscription loop for one connection generation.

use std::sync::Arc;
use std::time::Duration;

use dockview_common::{
    DaemonEvent, DockviewError, EventFilter, EventStream, ResourceKind, Result,
};
use futures::StreamExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::cache::{CacheStore, CacheUpdate};
use crate::fetcher::SnapshotFetcher;
use crate::supervisor::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Subscribed,
    Cancelled,
    Faulted,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Cancelled | MonitorState::Faulted)
    }
}

/// Everything a generation's background tasks share.
#[derive(Clone)]
pub(crate) struct MonitorContext {
    pub(crate) generation: u64,
    pub(crate) fetcher: SnapshotFetcher,
    pub(crate) store: CacheStore,
    pub(crate) link: Arc<Link>,
    pub(crate) limiter: Arc<Semaphore>,
    pub(crate) token: CancellationToken,
    pub(crate) filter: EventFilter,
    pub(crate) poll_interval: Option<Duration>,
}

/// Handle to a running subscription loop (and its poller, when polling is enabled).
pub struct EventMonitor {
    generation: u64,
    token: CancellationToken,
    state: watch::Receiver<MonitorState>,
    task: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
}

impl EventMonitor {
    pub(crate) fn spawn(ctx: MonitorContext) -> Self {
        let (state_tx, state) = watch::channel(MonitorState::Idle);
        let generation = ctx.generation;
        let token = ctx.token.clone();

        let poller = ctx
            .poll_interval
            .map(|every| tokio::spawn(run_poller(ctx.clone(), every)));
        let span = tracing::info_span!("event_monitor", generation);
        let task = tokio::spawn(run(ctx, state_tx).instrument(span));

        Self {
            generation,
            token,
            state,
            task,
            poller,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<MonitorState> {
        self.state.clone()
    }

    /// Cancels the generation and waits for its loop to exit.
    pub(crate) async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(generation = self.generation, error = %e, "Event monitor task ended abnormally");
        }
        if let Some(poller) = self.poller {
            if let Err(e) = poller.await {
                warn!(generation = self.generation, error = %e, "Poller task ended abnormally");
            }
        }
        debug!(generation = self.generation, "Event monitor stopped");
    }
}

// Reopens allowed after a malformed event ends the stream, reset by any good event
const MAX_RESUBSCRIBES: u32 = 3;

async fn subscribe(ctx: &MonitorContext) -> Option<Result<EventStream>> {
    tokio::select! {
        biased;
        _ = ctx.token.cancelled() => None,
        result = ctx.fetcher.client().subscribe_events(&ctx.filter) => Some(result),
    }
}

async fn run(ctx: MonitorContext, state: watch::Sender<MonitorState>) {
    let mut stream = match subscribe(&ctx).await {
        None => {
            state.send_replace(MonitorState::Cancelled);
            return;
        }
        Some(Ok(stream)) => stream,
        Some(Err(e)) => {
            fault(&ctx, &state, format!("subscription failed: {e}")).await;
            return;
        }
    };

    state.send_replace(MonitorState::Subscribed);
    info!("Subscribed to daemon events");

    let mut after_decode_error = false;
    let mut resubscribes = 0;
    loop {
        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                state.send_replace(MonitorState::Cancelled);
                info!("Event monitor cancelled");
                break;
            }
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    after_decode_error = false;
                    resubscribes = 0;
                    dispatch(&ctx, event);
                }
                Some(Err(DockviewError::Decode(reason))) => {
                    warn!(%reason, "Dropping malformed daemon event");
                    after_decode_error = true;
                }
                Some(Err(e)) => {
                    fault(&ctx, &state, e.to_string()).await;
                    break;
                }
                None if after_decode_error && resubscribes < MAX_RESUBSCRIBES => {
                    resubscribes += 1;
                    after_decode_error = false;
                    warn!(resubscribes, "Event stream ended after a malformed event, resubscribing");
                    stream = match subscribe(&ctx).await {
                        None => {
                            state.send_replace(MonitorState::Cancelled);
                            break;
                        }
                        Some(Ok(stream)) => stream,
                        Some(Err(e)) => {
                            fault(&ctx, &state, format!("resubscription failed: {e}")).await;
                            break;
                        }
                    };
                    // Events between the two subscriptions are lost
                    spawn_catch_up(&ctx);
                }
                None => {
                    fault(&ctx, &state, "event stream closed by daemon".to_string()).await;
                    break;
                }
            }
        }
    }
}

async fn fault(ctx: &MonitorContext, state: &watch::Sender<MonitorState>, reason: String) {
    error!(%reason, "Event monitor faulted");
    state.send_replace(MonitorState::Faulted);
    ctx.token.cancel();
    ctx.link.lost(ctx.generation, reason).await;
}

fn dispatch(ctx: &MonitorContext, event: DaemonEvent) {
    if !ctx.filter.matches(&event) {
        debug!(kind = %event.kind, action = %event.action, "Ignoring unfiltered event");
        return;
    }
    debug!(kind = %event.kind, action = %event.action, id = %event.resource_id, "Daemon event");

    match event.kind {
        ResourceKind::Container => spawn_container_refresh(ctx, event.resource_id),
        ResourceKind::Image | ResourceKind::Volume => spawn_collection_refresh(ctx, event.kind),
        ResourceKind::Network => {
            spawn_collection_refresh(ctx, ResourceKind::Network);
            if let Some(container_id) = event.related_container {
                spawn_container_refresh(ctx, container_id);
            }
        }
    }
}

fn spawn_container_refresh(ctx: &MonitorContext, container_id: String) {
    // Stamped at receipt so results from earlier events cannot overwrite later ones
    let stamp = ctx.store.stamp();
    let ctx = ctx.clone();

    tokio::spawn(async move {
        let Ok(_permit) = ctx.limiter.clone().acquire_owned().await else {
            return;
        };
        let fetched = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return,
            fetched = ctx.fetcher.fetch_container(&container_id) => fetched,
        };

        match fetched {
            Ok(record) => {
                let update = CacheUpdate::Container {
                    id: container_id,
                    seq: stamp.seq(),
                    record,
                };
                ctx.store.apply(update, Some(&ctx.token)).await;
            }
            Err(e) => {
                warn!(%container_id, error = %e, "Container refresh failed, keeping last-known state");
            }
        }
    });
}

fn spawn_collection_refresh(ctx: &MonitorContext, kind: ResourceKind) {
    let ctx = ctx.clone();

    tokio::spawn(async move {
        let Ok(_permit) = ctx.limiter.clone().acquire_owned().await else {
            return;
        };
        let refreshed = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return,
            refreshed = refresh_collection(&ctx.fetcher, &ctx.store, kind, Some(&ctx.token)) => refreshed,
        };
        if let Err(e) = refreshed {
            warn!(%kind, error = %e, "Collection refresh failed, keeping last-known state");
        }
    });
}

fn spawn_catch_up(ctx: &MonitorContext) {
    let ctx = ctx.clone();

    tokio::spawn(async move {
        let Ok(_permit) = ctx.limiter.clone().acquire_owned().await else {
            return;
        };
        let refreshed = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return,
            refreshed = refresh_all(&ctx.fetcher, &ctx.store, Some(&ctx.token)) => refreshed,
        };
        if let Err(e) = refreshed {
            warn!(generation = ctx.generation, error = %e, "Catch-up refresh failed");
        }
    });
}

async fn run_poller(ctx: MonitorContext, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately and the initial pass has just run
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let refreshed = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break,
            refreshed = refresh_all(&ctx.fetcher, &ctx.store, Some(&ctx.token)) => refreshed,
        };
        if let Err(e) = refreshed {
            warn!(generation = ctx.generation, error = %e, "Periodic refresh failed");
        }
    }
    debug!(generation = ctx.generation, "Poller stopped");
}

/// Full fetch and reconcile of one collection.
#[instrument(skip(fetcher, store, token))]
pub(crate) async fn refresh_collection(
    fetcher: &SnapshotFetcher,
    store: &CacheStore,
    kind: ResourceKind,
    token: Option<&CancellationToken>,
) -> Result<bool> {
    let stamp = store.stamp();
    let seq = stamp.seq();
    let update = match kind {
        ResourceKind::Container => CacheUpdate::Containers {
            seq,
            records: fetcher.fetch_containers().await?,
        },
        ResourceKind::Image => CacheUpdate::Images {
            seq,
            records: fetcher.fetch_images().await?,
        },
        ResourceKind::Network => CacheUpdate::Networks {
            seq,
            records: fetcher.fetch_networks().await?,
        },
        ResourceKind::Volume => CacheUpdate::Volumes {
            seq,
            records: fetcher.fetch_volumes().await?,
        },
    };
    Ok(store.apply(update, token).await)
}

/// Full pass over system info and every collection, applied in one step.
pub(crate) async fn refresh_all(
    fetcher: &SnapshotFetcher,
    store: &CacheStore,
    token: Option<&CancellationToken>,
) -> Result<bool> {
    let stamp = store.stamp();
    let snapshot = fetcher.fetch_all().await?;
    let seq = stamp.seq();
    Ok(store.apply(CacheUpdate::Full { seq, snapshot }, token).await)
}
