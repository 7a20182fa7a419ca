use crate::state::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug)]
pub struct CacheEntry {
    pub snapshot: Snapshot,
    pub exposition: Vec<u8>,
    pub written_at: Instant,
}

/// Writes replace the whole entry, so a reader sees either the previous
/// entry or the new one, never a mix.
#[derive(Debug)]
pub struct SnapshotCache {
    current: RwLock<Arc<CacheEntry>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(CacheEntry {
                snapshot: Snapshot::default(),
                exposition: Vec::new(),
                written_at: Instant::now(),
            })),
        }
    }

    pub async fn write(&self, mut snapshot: Snapshot, exposition: Vec<u8>) {
        let mut guard = self.current.write().await;
        // Wall clock can step backwards; published timestamps must not.
        if snapshot.timestamp < guard.snapshot.timestamp {
            snapshot.timestamp = guard.snapshot.timestamp;
        }
        *guard = Arc::new(CacheEntry {
            snapshot,
            exposition,
            written_at: Instant::now(),
        });
    }

    pub async fn read(&self) -> (Arc<CacheEntry>, Duration) {
        let entry = self.current.read().await.clone();
        let age = entry.written_at.elapsed();
        (entry, age)
    }

    pub async fn read_exposition(&self) -> Vec<u8> {
        self.current.read().await.exposition.clone()
    }

    pub async fn age(&self) -> Duration {
        self.current.read().await.written_at.elapsed()
    }
}
