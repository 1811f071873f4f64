//! Generic snapshot-against-cache diff used by every resource collection.

use std::sync::Arc;

use dockview_common::{ChangeKind, ChangeNotification, Resource, ResourceKind};
use indexmap::IndexMap;

/// Changes produced by one reconciliation, in the order they were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    kind: ResourceKind,
    changes: Vec<(ChangeKind, String)>,
}

impl ChangeSet {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            changes: Vec::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChangeKind, &str)> {
        self.changes.iter().map(|(change, key)| (*change, key.as_str()))
    }

    pub fn added(&self) -> Vec<&str> {
        self.keys_of(ChangeKind::Added)
    }

    pub fn updated(&self) -> Vec<&str> {
        self.keys_of(ChangeKind::Updated)
    }

    pub fn removed(&self) -> Vec<&str> {
        self.keys_of(ChangeKind::Removed)
    }

    /// Keys that were added or updated, i.e. whose current record is new.
    pub fn touched(&self) -> Vec<&str> {
        self.iter()
            .filter(|(change, _)| *change != ChangeKind::Removed)
            .map(|(_, key)| key)
            .collect()
    }

    pub(crate) fn push(&mut self, change: ChangeKind, key: impl Into<String>) {
        self.changes.push((change, key.into()));
    }

    pub fn notifications(&self) -> Vec<ChangeNotification> {
        self.changes
            .iter()
            .map(|(change, key)| ChangeNotification::Collection {
                kind: self.kind,
                change: *change,
                key: key.clone(),
            })
            .collect()
    }

    fn keys_of(&self, wanted: ChangeKind) -> Vec<&str> {
        self.iter()
            .filter(|(change, _)| *change == wanted)
            .map(|(_, key)| key)
            .collect()
    }
}

/// Identity-keyed collection of shared records, kept in insertion order.
///
/// Readers hold `Arc` clones; an update copies the record on write so a
/// reader's clone never changes underneath it.
#[derive(Debug, Clone)]
pub struct Collection<R: Resource> {
    records: IndexMap<String, Arc<R>>,
}

impl<R: Resource> Default for Collection<R> {
    fn default() -> Self {
        Self {
            records: IndexMap::new(),
        }
    }
}

impl<R: Resource> Collection<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Arc<R>> {
        self.records.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<R>> {
        self.records.values()
    }

    pub fn to_vec(&self) -> Vec<Arc<R>> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Arc<R>)> {
        self.records.iter_mut()
    }

    /// Makes the collection equal to `snapshot`.
    ///
    /// Updates and inserts follow snapshot order; removals are computed
    /// against the cache as it was before the pass and applied last.
    /// Duplicate keys in the snapshot resolve last-write-wins.
    pub fn reconcile(&mut self, snapshot: Vec<R>) -> ChangeSet {
        let mut incoming: IndexMap<String, R> = IndexMap::with_capacity(snapshot.len());
        for record in snapshot {
            incoming.insert(record.key().to_string(), record);
        }

        let stale: Vec<String> = self
            .records
            .keys()
            .filter(|key| !incoming.contains_key(key.as_str()))
            .cloned()
            .collect();

        let mut changes = ChangeSet::new(R::KIND);
        for (key, record) in incoming {
            if let Some(change) = self.upsert(&key, record) {
                changes.push(change, key);
            }
        }
        for key in stale {
            if self.records.shift_remove(&key).is_some() {
                changes.push(ChangeKind::Removed, key);
            }
        }
        changes
    }

    /// Reconciles a single identity. `None` means the daemon no longer reports it.
    pub fn reconcile_one(&mut self, key: &str, fetched: Option<R>) -> ChangeSet {
        let mut changes = ChangeSet::new(R::KIND);
        match fetched {
            Some(record) => {
                if let Some(change) = self.upsert(key, record) {
                    changes.push(change, key);
                }
            }
            None => {
                if self.records.shift_remove(key).is_some() {
                    changes.push(ChangeKind::Removed, key);
                }
            }
        }
        changes
    }

    fn upsert(&mut self, key: &str, record: R) -> Option<ChangeKind> {
        match self.records.get_mut(key) {
            Some(existing) if existing.as_ref() == &record => None,
            Some(existing) => {
                Arc::make_mut(existing).merge_from(record);
                Some(ChangeKind::Updated)
            }
            None => {
                self.records.insert(key.to_string(), Arc::new(record));
                Some(ChangeKind::Added)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{container, volume};
    use dockview_common::{ContainerRecord, ContainerState, VolumeRecord};

    fn seeded_containers() -> Collection<ContainerRecord> {
        let mut containers = Collection::new();
        containers.reconcile(vec![container("A", ContainerState::Running, "img1")]);
        containers
    }

    #[test]
    fn test_update_and_add_without_removal() {
        let mut containers = seeded_containers();

        let changes = containers.reconcile(vec![
            container("A", ContainerState::Exited, "img1"),
            container("B", ContainerState::Running, "img2"),
        ]);

        assert_eq!(changes.updated(), vec!["A"]);
        assert_eq!(changes.added(), vec!["B"]);
        assert!(changes.removed().is_empty());
        assert_eq!(containers.get("A").unwrap().state, ContainerState::Exited);
        assert_eq!(containers.len(), 2);
    }

    #[test]
    fn test_absent_volume_is_removed() {
        let mut volumes: Collection<VolumeRecord> = Collection::new();
        volumes.reconcile(vec![volume("v1", "local"), volume("v2", "local")]);

        let changes = volumes.reconcile(vec![volume("v1", "local")]);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes.removed(), vec!["v2"]);
        assert_eq!(volumes.keys().collect::<Vec<_>>(), vec!["v1"]);
    }

    #[test]
    fn test_same_snapshot_twice_is_silent() {
        let snapshot = vec![
            container("A", ContainerState::Running, "img1"),
            container("B", ContainerState::Paused, "img2"),
        ];
        let mut containers = Collection::new();

        let first = containers.reconcile(snapshot.clone());
        assert_eq!(first.added(), vec!["A", "B"]);

        let second = containers.reconcile(snapshot);
        assert!(second.is_empty());
    }

    #[test]
    fn test_key_set_matches_snapshot() {
        let mut volumes: Collection<VolumeRecord> = Collection::new();
        volumes.reconcile(vec![volume("a", "local"), volume("b", "local"), volume("c", "local")]);

        volumes.reconcile(vec![volume("c", "nfs"), volume("d", "local"), volume("a", "local")]);

        let mut keys: Vec<_> = volumes.keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["a", "c", "d"]);

        volumes.reconcile(Vec::new());
        assert!(volumes.is_empty());
    }

    #[test]
    fn test_duplicates_resolve_last_write_wins() {
        let mut volumes: Collection<VolumeRecord> = Collection::new();

        let changes = volumes.reconcile(vec![
            volume("v1", "local"),
            volume("v1", "nfs"),
            volume("v2", "local"),
        ]);

        assert_eq!(changes.added(), vec!["v1", "v2"]);
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes.get("v1").unwrap().driver, "nfs");
    }

    #[test]
    fn test_changes_follow_snapshot_order_with_removals_last() {
        let mut volumes: Collection<VolumeRecord> = Collection::new();
        volumes.reconcile(vec![volume("old", "local"), volume("kept", "local")]);

        let changes = volumes.reconcile(vec![volume("new", "local"), volume("kept", "nfs")]);

        let order: Vec<_> = changes.iter().collect();
        assert_eq!(
            order,
            vec![
                (ChangeKind::Added, "new"),
                (ChangeKind::Updated, "kept"),
                (ChangeKind::Removed, "old"),
            ]
        );
        assert_eq!(changes.touched(), vec!["new", "kept"]);
    }

    #[test]
    fn test_reconcile_one() {
        let mut containers = seeded_containers();

        let unchanged =
            containers.reconcile_one("A", Some(container("A", ContainerState::Running, "img1")));
        assert!(unchanged.is_empty());

        let added =
            containers.reconcile_one("C", Some(container("C", ContainerState::Created, "img1")));
        assert_eq!(added.added(), vec!["C"]);

        let removed = containers.reconcile_one("A", None);
        assert_eq!(removed.removed(), vec!["A"]);

        assert!(containers.reconcile_one("missing", None).is_empty());
        assert_eq!(containers.keys().collect::<Vec<_>>(), vec!["C"]);
    }

    #[test]
    fn test_readers_keep_their_copy() {
        let mut containers = seeded_containers();
        let held = Arc::clone(containers.get("A").unwrap());

        containers.reconcile(vec![container("A", ContainerState::Dead, "img1")]);

        assert_eq!(held.state, ContainerState::Running);
        assert_eq!(containers.get("A").unwrap().state, ContainerState::Dead);
    }

    #[test]
    fn test_notifications_carry_kind() {
        let mut volumes: Collection<VolumeRecord> = Collection::new();
        let changes = volumes.reconcile(vec![volume("v1", "local")]);
        assert_eq!(
            changes.notifications(),
            vec![ChangeNotification::added(ResourceKind::Volume, "v1")]
        );
    }
}
