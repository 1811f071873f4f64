//! The engine-owned resource cache and its single-writer store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dockview_common::{
    ChangeNotification, ContainerRecord, ContainerState, ImageRecord, NetworkRecord, Resource,
    ResourceKind, SystemInfoRecord, VolumeRecord,
};
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cross_ref;
use crate::fetcher::FullSnapshot;
use crate::reconciler::{ChangeSet, Collection};

/// One unit of cache mutation. `seq` is taken before the fetch that produced the data.
#[derive(Debug, Clone)]
pub(crate) enum CacheUpdate {
    Containers {
        seq: u64,
        records: Vec<ContainerRecord>,
    },
    Container {
        id: String,
        seq: u64,
        record: Option<ContainerRecord>,
    },
    Images {
        seq: u64,
        records: Vec<ImageRecord>,
    },
    Networks {
        seq: u64,
        records: Vec<NetworkRecord>,
    },
    Volumes {
        seq: u64,
        records: Vec<VolumeRecord>,
    },
    Full {
        seq: u64,
        snapshot: FullSnapshot,
    },
}

/// Read-only view over every collection the engine tracks.
#[derive(Debug, Default)]
pub struct ResourceCache {
    containers: Collection<ContainerRecord>,
    images: Collection<ImageRecord>,
    networks: Collection<NetworkRecord>,
    volumes: Collection<VolumeRecord>,
    system_info: Option<Arc<SystemInfoRecord>>,
    // Last applied full-collection refresh per kind
    collection_seq: HashMap<ResourceKind, u64>,
    // Targeted refreshes newer than the last full container refresh
    container_seq: HashMap<String, u64>,
}

impl ResourceCache {
    pub fn containers(&self) -> &Collection<ContainerRecord> {
        &self.containers
    }

    pub fn images(&self) -> &Collection<ImageRecord> {
        &self.images
    }

    pub fn networks(&self) -> &Collection<NetworkRecord> {
        &self.networks
    }

    pub fn volumes(&self) -> &Collection<VolumeRecord> {
        &self.volumes
    }

    pub fn system_info(&self) -> Option<Arc<SystemInfoRecord>> {
        self.system_info.clone()
    }

    /// Containers whose name or image name contains `query` (case-insensitive).
    pub fn filter_containers(&self, query: &str, only_running: bool) -> Vec<Arc<ContainerRecord>> {
        self.containers
            .iter()
            .filter(|c| !only_running || c.is_running())
            .filter(|c| c.matches(query))
            .cloned()
            .collect()
    }

    pub fn containers_by_state(&self) -> BTreeMap<ContainerState, Vec<Arc<ContainerRecord>>> {
        let mut groups: BTreeMap<ContainerState, Vec<Arc<ContainerRecord>>> = BTreeMap::new();
        for container in self.containers.iter() {
            groups
                .entry(container.state)
                .or_default()
                .push(Arc::clone(container));
        }
        groups
    }

    /// Applies one update, returning its notifications, or `None` when the data is stale.
    pub(crate) fn apply(&mut self, update: CacheUpdate) -> Option<Vec<ChangeNotification>> {
        match update {
            CacheUpdate::Containers { seq, records } => self.apply_containers(seq, records),
            CacheUpdate::Container { id, seq, record } => self.apply_container(&id, seq, record),
            CacheUpdate::Images { seq, records } => self.apply_images(seq, records),
            CacheUpdate::Networks { seq, records } => self.apply_networks(seq, records),
            CacheUpdate::Volumes { seq, records } => self.apply_volumes(seq, records),
            CacheUpdate::Full { seq, snapshot } => {
                // Containers are enriched against the new images and networks, so one pass
                // yields at most one update per container
                let mut notifications = self.apply_system_info(snapshot.system_info);
                let images = self.reconcile_images(seq, snapshot.images);
                let networks = self.reconcile_networks(seq, snapshot.networks);
                for part in [
                    images.map(|changes| changes.notifications()),
                    networks.map(|changes| changes.notifications()),
                    self.apply_containers(seq, snapshot.containers),
                    self.apply_volumes(seq, snapshot.volumes),
                ]
                .into_iter()
                .flatten()
                {
                    notifications.extend(part);
                }
                Some(notifications)
            }
        }
    }

    fn claim(&mut self, kind: ResourceKind, seq: u64) -> bool {
        let last = self.collection_seq.entry(kind).or_default();
        if seq < *last {
            debug!(%kind, seq, last = *last, "Skipping stale collection refresh");
            return false;
        }
        *last = seq;
        true
    }

    fn apply_system_info(&mut self, record: SystemInfoRecord) -> Vec<ChangeNotification> {
        self.system_info = Some(Arc::new(record));
        vec![ChangeNotification::SystemInfo]
    }

    fn reconcile_images(&mut self, seq: u64, records: Vec<ImageRecord>) -> Option<ChangeSet> {
        if !self.claim(ResourceKind::Image, seq) {
            return None;
        }
        Some(self.images.reconcile(records))
    }

    fn reconcile_networks(&mut self, seq: u64, records: Vec<NetworkRecord>) -> Option<ChangeSet> {
        if !self.claim(ResourceKind::Network, seq) {
            return None;
        }
        Some(self.networks.reconcile(records))
    }

    fn apply_images(&mut self, seq: u64, records: Vec<ImageRecord>) -> Option<Vec<ChangeNotification>> {
        let changes = self.reconcile_images(seq, records)?;
        let mut notifications = changes.notifications();
        let propagated =
            cross_ref::propagate_images(&mut self.containers, &self.images, &changes.touched());
        notifications.extend(propagated.into_iter().map(container_updated));
        Some(notifications)
    }

    fn apply_networks(
        &mut self,
        seq: u64,
        records: Vec<NetworkRecord>,
    ) -> Option<Vec<ChangeNotification>> {
        let changes = self.reconcile_networks(seq, records)?;
        let mut notifications = changes.notifications();
        let propagated =
            cross_ref::propagate_networks(&mut self.containers, &self.networks, &changes.touched());
        notifications.extend(propagated.into_iter().map(container_updated));
        Some(notifications)
    }

    fn apply_volumes(&mut self, seq: u64, records: Vec<VolumeRecord>) -> Option<Vec<ChangeNotification>> {
        if !self.claim(ResourceKind::Volume, seq) {
            return None;
        }
        Some(self.volumes.reconcile(records).notifications())
    }

    fn apply_containers(
        &mut self,
        seq: u64,
        records: Vec<ContainerRecord>,
    ) -> Option<Vec<ChangeNotification>> {
        if !self.claim(ResourceKind::Container, seq) {
            return None;
        }

        // Ids refreshed individually after this snapshot was requested keep their newer state
        let newer: Vec<String> = self
            .container_seq
            .iter()
            .filter(|(_, applied)| **applied > seq)
            .map(|(id, _)| id.clone())
            .collect();
        let mut snapshot: Vec<ContainerRecord> = records
            .into_iter()
            .filter(|record| !newer.iter().any(|id| id == record.key()))
            .collect();
        snapshot.extend(
            newer
                .iter()
                .filter_map(|id| self.containers.get(id))
                .map(|record| record.as_ref().clone()),
        );

        for record in snapshot.iter_mut() {
            let previous = self.containers.get(&record.id).map(Arc::as_ref);
            cross_ref::enrich(record, previous, &self.images, &self.networks);
        }
        let notifications = self.containers.reconcile(snapshot).notifications();
        self.container_seq.retain(|_, applied| *applied > seq);
        Some(notifications)
    }

    fn apply_container(
        &mut self,
        id: &str,
        seq: u64,
        fetched: Option<ContainerRecord>,
    ) -> Option<Vec<ChangeNotification>> {
        let floor = self
            .collection_seq
            .get(&ResourceKind::Container)
            .copied()
            .unwrap_or_default()
            .max(self.container_seq.get(id).copied().unwrap_or_default());
        if seq < floor {
            debug!(container_id = %id, seq, floor, "Skipping stale container refresh");
            return None;
        }
        self.container_seq.insert(id.to_string(), seq);

        let fetched = fetched.map(|mut record| {
            let previous = self.containers.get(id).map(Arc::as_ref);
            cross_ref::enrich(&mut record, previous, &self.images, &self.networks);
            record
        });
        Some(self.containers.reconcile_one(id, fetched).notifications())
    }

    /// Drops per-container stamps older than every fetch still in flight.
    fn forget_settled(&mut self, watermark: u64) {
        self.container_seq.retain(|_, applied| *applied >= watermark);
    }
}

fn container_updated(key: String) -> ChangeNotification {
    ChangeNotification::updated(ResourceKind::Container, key)
}

#[derive(Debug, Default)]
struct Stamps {
    issued: u64,
    pending: BTreeSet<u64>,
}

fn lock_stamps(stamps: &Mutex<Stamps>) -> MutexGuard<'_, Stamps> {
    stamps.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordering stamp for one fetch, taken before the request is issued.
/// The stamp counts as in flight until it is dropped.
#[derive(Debug)]
pub(crate) struct Stamp {
    seq: u64,
    stamps: Arc<Mutex<Stamps>>,
}

impl Stamp {
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for Stamp {
    fn drop(&mut self) {
        lock_stamps(&self.stamps).pending.remove(&self.seq);
    }
}

/// Shared handle to the cache. All mutation goes through [`CacheStore::apply`],
/// which holds the write lock while mutating and publishing notifications.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<RwLock<ResourceCache>>,
    changes: broadcast::Sender<ChangeNotification>,
    stamps: Arc<Mutex<Stamps>>,
}

impl CacheStore {
    pub fn new(buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Arc::new(RwLock::new(ResourceCache::default())),
            changes,
            stamps: Arc::new(Mutex::new(Stamps::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.changes.subscribe()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ResourceCache> {
        self.inner.read().await
    }

    /// Issues the ordering stamp for a fetch that is about to start.
    pub(crate) fn stamp(&self) -> Stamp {
        let mut stamps = lock_stamps(&self.stamps);
        stamps.issued += 1;
        let seq = stamps.issued;
        stamps.pending.insert(seq);
        Stamp {
            seq,
            stamps: Arc::clone(&self.stamps),
        }
    }

    // Oldest stamp still in flight, or the next one to be issued
    fn watermark(&self) -> u64 {
        let stamps = lock_stamps(&self.stamps);
        stamps
            .pending
            .first()
            .copied()
            .unwrap_or(stamps.issued + 1)
    }

    /// Applies `update` unless `token` has been cancelled. Returns whether it was applied.
    pub(crate) async fn apply(&self, update: CacheUpdate, token: Option<&CancellationToken>) -> bool {
        let mut cache = self.inner.write().await;
        cache.forget_settled(self.watermark());
        // Checked under the lock so a superseded generation cannot interleave with its successor
        if token.is_some_and(CancellationToken::is_cancelled) {
            debug!("Discarding update from a cancelled generation");
            return false;
        }

        let Some(notifications) = cache.apply(update) else {
            return false;
        };
        for notification in notifications {
            debug!(%notification, "Cache change");
            // No receivers is fine
            let _ = self.changes.send(notification);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{container, image, network, system_info, volume};
    use dockview_common::ChangeKind;

    fn full(seq: u64) -> CacheUpdate {
        CacheUpdate::Full {
            seq,
            snapshot: FullSnapshot {
                system_info: system_info(2, 1),
                containers: vec![
                    container("A", ContainerState::Running, "img1"),
                    container("B", ContainerState::Exited, "img2"),
                ],
                images: vec![image("img1", "nginx:latest", 100), image("img2", "redis:7", 200)],
                networks: vec![network("n1", "bridge", "bridge")],
                volumes: vec![volume("v1", "local")],
            },
        }
    }

    fn changes_of(notifications: &[ChangeNotification]) -> Vec<(ResourceKind, ChangeKind, &str)> {
        notifications
            .iter()
            .filter_map(|n| match n {
                ChangeNotification::Collection { kind, change, key } => {
                    Some((*kind, *change, key.as_str()))
                }
                ChangeNotification::SystemInfo => None,
            })
            .collect()
    }

    #[test]
    fn test_full_apply_populates_and_denormalizes() {
        let mut cache = ResourceCache::default();
        let notifications = cache.apply(full(1)).unwrap();

        assert_eq!(notifications[0], ChangeNotification::SystemInfo);
        assert_eq!(cache.containers().len(), 2);
        assert_eq!(cache.images().len(), 2);
        assert_eq!(cache.volumes().len(), 1);
        assert_eq!(cache.system_info().unwrap().containers, 2);

        let a = cache.containers().get("A").unwrap();
        assert_eq!(a.image.name, "nginx:latest");
        assert_eq!(a.network.id, "n1");

        // Second identical pass only replaces system info
        let again = cache.apply(full(2)).unwrap();
        assert_eq!(again, vec![ChangeNotification::SystemInfo]);
    }

    #[test]
    fn test_image_refresh_propagates_to_containers() {
        let mut cache = ResourceCache::default();
        cache.apply(full(1));

        let notifications = cache
            .apply(CacheUpdate::Images {
                seq: 2,
                records: vec![image("img1", "nginx:1.27", 150), image("img2", "redis:7", 200)],
            })
            .unwrap();

        assert_eq!(
            changes_of(&notifications),
            vec![
                (ResourceKind::Image, ChangeKind::Updated, "img1"),
                (ResourceKind::Container, ChangeKind::Updated, "A"),
            ]
        );
        for container in cache.containers().iter() {
            let canonical = cache.images().get(&container.image.id).unwrap();
            assert_eq!(container.image.name, canonical.name);
            assert_eq!(container.image.size, canonical.size);
        }
    }

    #[test]
    fn test_targeted_refresh_reads_cached_image() {
        let mut cache = ResourceCache::default();
        cache.apply(full(1));

        let notifications = cache
            .apply(CacheUpdate::Container {
                id: "C".to_string(),
                seq: 2,
                record: Some(container("C", ContainerState::Created, "img2")),
            })
            .unwrap();

        assert_eq!(
            changes_of(&notifications),
            vec![(ResourceKind::Container, ChangeKind::Added, "C")]
        );
        assert_eq!(cache.containers().get("C").unwrap().image.name, "redis:7");
    }

    #[test]
    fn test_empty_targeted_fetch_removes_container() {
        let mut cache = ResourceCache::default();
        cache.apply(full(1));

        let notifications = cache
            .apply(CacheUpdate::Container {
                id: "A".to_string(),
                seq: 2,
                record: None,
            })
            .unwrap();

        assert_eq!(
            changes_of(&notifications),
            vec![(ResourceKind::Container, ChangeKind::Removed, "A")]
        );
        assert!(!cache.containers().contains_key("A"));
    }

    #[test]
    fn test_stale_results_are_skipped() {
        let mut cache = ResourceCache::default();
        cache.apply(full(1));

        // seq 3 lands before seq 2 for the same container
        cache.apply(CacheUpdate::Container {
            id: "A".to_string(),
            seq: 3,
            record: Some(container("A", ContainerState::Exited, "img1")),
        });
        let stale = cache.apply(CacheUpdate::Container {
            id: "A".to_string(),
            seq: 2,
            record: None,
        });
        assert!(stale.is_none());
        assert_eq!(cache.containers().get("A").unwrap().state, ContainerState::Exited);

        // A full refresh requested before seq 3 does not regress A
        cache.apply(CacheUpdate::Containers {
            seq: 2,
            records: vec![container("B", ContainerState::Exited, "img2")],
        });
        assert_eq!(cache.containers().get("A").unwrap().state, ContainerState::Exited);
        assert!(cache.containers().contains_key("B"));

        // Nor does an older full refresh of any collection
        assert!(cache
            .apply(CacheUpdate::Volumes {
                seq: 1,
                records: Vec::new(),
            })
            .is_some());
        assert!(cache
            .apply(CacheUpdate::Volumes {
                seq: 0,
                records: Vec::new(),
            })
            .is_none());
    }

    #[test]
    fn test_filter_and_group() {
        let mut cache = ResourceCache::default();
        cache.apply(full(1));

        let running = cache.filter_containers("", true);
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "A");

        let redis = cache.filter_containers("REDIS", false);
        assert_eq!(redis.len(), 1);
        assert_eq!(redis[0].id, "B");

        let groups = cache.containers_by_state();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&ContainerState::Exited][0].id, "B");
    }

    #[tokio::test]
    async fn test_store_publishes_and_honours_cancellation() {
        let store = CacheStore::new(16);
        let mut changes = store.subscribe();

        let stamp = store.stamp();
        assert!(store.apply(full(stamp.seq()), None).await);
        assert_eq!(changes.recv().await.unwrap(), ChangeNotification::SystemInfo);

        let token = CancellationToken::new();
        token.cancel();
        let applied = store
            .apply(
                CacheUpdate::Volumes {
                    seq: store.stamp().seq(),
                    records: Vec::new(),
                },
                Some(&token),
            )
            .await;
        assert!(!applied);
        assert_eq!(store.read().await.volumes().len(), 1);
    }

    #[test]
    fn test_full_pass_updates_each_container_once() {
        let mut cache = ResourceCache::default();
        cache.apply(full(1));

        let CacheUpdate::Full { mut snapshot, .. } = full(2) else {
            unreachable!()
        };
        snapshot.images[0].name = "nginx:1.27".to_string();
        snapshot.containers[0].state = ContainerState::Paused;
        let notifications = cache.apply(CacheUpdate::Full { seq: 2, snapshot }).unwrap();

        assert_eq!(
            changes_of(&notifications),
            vec![
                (ResourceKind::Image, ChangeKind::Updated, "img1"),
                (ResourceKind::Container, ChangeKind::Updated, "A"),
            ]
        );
        let a = cache.containers().get("A").unwrap();
        assert_eq!(a.state, ContainerState::Paused);
        assert_eq!(a.image.name, "nginx:1.27");
    }

    #[tokio::test]
    async fn test_settled_container_stamps_are_forgotten() {
        let store = CacheStore::new(16);
        let stamp = store.stamp();
        store.apply(full(stamp.seq()), None).await;
        drop(stamp);

        // An older targeted fetch is still in flight while containers churn
        let early = store.stamp();
        for i in 0..1000 {
            let id = format!("churn-{i}");
            for record in [Some(container(&id, ContainerState::Created, "img1")), None] {
                let stamp = store.stamp();
                let update = CacheUpdate::Container {
                    id: id.clone(),
                    seq: stamp.seq(),
                    record,
                };
                assert!(store.apply(update, None).await);
            }
        }
        assert_eq!(store.read().await.container_seq.len(), 1000);

        // Its result predates the removal and must not resurrect the container
        let late = CacheUpdate::Container {
            id: "churn-0".to_string(),
            seq: early.seq(),
            record: Some(container("churn-0", ContainerState::Running, "img1")),
        };
        assert!(!store.apply(late, None).await);
        drop(early);

        let stamp = store.stamp();
        let update = CacheUpdate::Container {
            id: "A".to_string(),
            seq: stamp.seq(),
            record: Some(container("A", ContainerState::Exited, "img1")),
        };
        assert!(store.apply(update, None).await);

        let cache = store.read().await;
        assert!(cache.container_seq.len() <= 1);
        assert_eq!(cache.containers().len(), 2);
        assert!(!cache.containers().contains_key("churn-0"));
    }
}
