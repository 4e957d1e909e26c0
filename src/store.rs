//! Shared state store abstraction and in-memory implementation

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;

use crate::{
    errors::VesselWatchError,
    models::{TacticalLogEntry, VesselFilter, VesselState, VesselUpdate},
};

/// Remote key-value/document store holding vessel records and fleet logs.
///
/// Each vessel record has exactly one writer (its emitter); any number of
/// monitors observe it.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch a single vessel record
    async fn get(&self, id: &str) -> Result<Option<VesselState>, VesselWatchError>;

    /// Merge a partial update into the record, stamping `last_active_at`
    async fn merge(&self, id: &str, update: VesselUpdate)
        -> Result<VesselState, VesselWatchError>;

    /// Delete the record so it disappears from observers
    async fn remove(&self, id: &str) -> Result<(), VesselWatchError>;

    /// Current records matching the filter
    async fn query(&self, filter: &VesselFilter) -> Result<Vec<VesselState>, VesselWatchError>;

    /// Observe a filtered collection. The receiver holds the latest snapshot.
    fn observe(&self, filter: VesselFilter) -> watch::Receiver<Vec<VesselState>>;

    async fn append_log(&self, entry: TacticalLogEntry) -> Result<(), VesselWatchError>;

    async fn fleet_log(&self, fleet_id: &str) -> Result<Vec<TacticalLogEntry>, VesselWatchError>;
}

/// Local replica of vessel records with change notification.
///
/// Shared by the store implementations. The lock is never held across an
/// await point.
#[derive(Clone)]
pub struct VesselCache {
    vessels: Arc<RwLock<HashMap<String, VesselState>>>,
    logs: Arc<RwLock<HashMap<String, Vec<TacticalLogEntry>>>>,
    version: watch::Sender<u64>,
}

impl Default for VesselCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VesselCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            vessels: Arc::new(RwLock::new(HashMap::new())),
            logs: Arc::new(RwLock::new(HashMap::new())),
            version,
        }
    }

    pub fn get(&self, id: &str) -> Option<VesselState> {
        self.vessels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn upsert(&self, state: VesselState) {
        self.vessels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.id.clone(), state);
        self.bump();
    }

    pub fn delete(&self, id: &str) {
        let removed = self
            .vessels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if removed.is_some() {
            self.bump();
        }
    }

    pub fn snapshot(&self, filter: &VesselFilter) -> Vec<VesselState> {
        let vessels = self.vessels.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<VesselState> = vessels
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }

    /// Append a log entry, ignoring duplicates by id
    pub fn push_log(&self, entry: TacticalLogEntry) {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        let log = logs.entry(entry.fleet_id.clone()).or_default();
        if !log.iter().any(|e| e.id == entry.id) {
            log.push(entry);
            log.sort_by_key(|e| e.timestamp);
        }
    }

    pub fn log(&self, fleet_id: &str) -> Vec<TacticalLogEntry> {
        self.logs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(fleet_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Spawn a forwarding task that republishes the filtered snapshot on
    /// every change. The task ends once the receiver is dropped.
    pub fn observe(&self, filter: VesselFilter) -> watch::Receiver<Vec<VesselState>> {
        let mut changes = self.version.subscribe();
        let (tx, rx) = watch::channel(self.snapshot(&filter));
        let cache = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = cache.snapshot(&filter);
                        tx.send_if_modified(|current| {
                            if *current != snapshot {
                                *current = snapshot;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    _ = tx.closed() => {
                        debug!("Observer for {:?} dropped", filter);
                        break;
                    }
                }
            }
        });

        rx
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// In-process store, used in tests and single-process deployments
#[derive(Clone, Default)]
pub struct MemoryStore {
    cache: VesselCache,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<VesselState>, VesselWatchError> {
        Ok(self.cache.get(id))
    }

    async fn merge(
        &self,
        id: &str,
        update: VesselUpdate,
    ) -> Result<VesselState, VesselWatchError> {
        let merged = update.apply(id, self.cache.get(id), Utc::now());
        self.cache.upsert(merged.clone());
        Ok(merged)
    }

    async fn remove(&self, id: &str) -> Result<(), VesselWatchError> {
        self.cache.delete(id);
        Ok(())
    }

    async fn query(&self, filter: &VesselFilter) -> Result<Vec<VesselState>, VesselWatchError> {
        Ok(self.cache.snapshot(filter))
    }

    fn observe(&self, filter: VesselFilter) -> watch::Receiver<Vec<VesselState>> {
        self.cache.observe(filter)
    }

    async fn append_log(&self, entry: TacticalLogEntry) -> Result<(), VesselWatchError> {
        self.cache.push_log(entry);
        Ok(())
    }

    async fn fleet_log(&self, fleet_id: &str) -> Result<Vec<TacticalLogEntry>, VesselWatchError> {
        Ok(self.cache.log(fleet_id))
    }
}
