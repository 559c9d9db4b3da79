// src/core/location/db.rs

//! `LocationDB`: the persistent, sharded key-value store keyed by
//! `ShortHash`, fronted by a bounded in-memory write cache. Implements
//! every operation named in spec §4.1.

use crate::core::LocusError;
use crate::core::cluster::state::ClusterState;
use crate::core::hash::ShortHash;
use crate::core::location::cache::FlushTrigger;
use crate::core::location::entry::{ContentLocationEntry, UNKNOWN_SIZE};
use crate::core::location::shard::LocationShard;
use crate::core::machine::MachineId;
use chrono::{DateTime, Utc};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Number of shards a `LocationDB` is split into, bounding lock contention
/// between concurrent `locationAdded`/`GetBulk` calls.
pub const NUM_SHARDS: usize = 16;

/// Result of a `garbageCollect` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Entries inspected during the pass.
    pub inspected: usize,
    /// Entries removed because their bitset was empty or fully inactive.
    pub removed: usize,
}

pub struct LocationDB {
    shards: Vec<Arc<LocationShard>>,
    base_dir: PathBuf,
}

impl LocationDB {
    pub async fn open(base_dir: impl AsRef<Path>, cache_size_threshold: usize) -> Result<Self, LocusError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let mut shards = Vec::with_capacity(NUM_SHARDS);
        for i in 0..NUM_SHARDS {
            let dir = base_dir.join(format!("shard-{i:02}"));
            shards.push(Arc::new(LocationShard::open(dir, cache_size_threshold).await?));
        }
        Ok(Self { shards, base_dir })
    }

    fn shard_for(&self, key: &ShortHash) -> &Arc<LocationShard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// `tryGet(hash) -> entry?`
    pub async fn try_get(&self, hash: ShortHash) -> Option<ContentLocationEntry> {
        self.shard_for(&hash).get(&hash).await
    }

    /// `locationAdded(hash, machineId, size)`.
    pub async fn location_added(
        &self,
        hash: ShortHash,
        machine: MachineId,
        size: i64,
        now: DateTime<Utc>,
    ) -> ContentLocationEntry {
        self.shard_for(&hash)
            .merge(hash, |current| match current {
                Some(mut entry) => {
                    entry.merge_add(machine, size, now);
                    entry
                }
                None => ContentLocationEntry::new_with_machine(machine, size, now),
            })
            .await
    }

    /// `locationRemoved(hash, machineId)`. If the bitset becomes empty the
    /// entry is left in place (with an empty bitset) for the next GC pass
    /// to collect, per spec §4.1.
    pub async fn location_removed(&self, hash: ShortHash, machine: MachineId) -> Option<ContentLocationEntry> {
        let shard = self.shard_for(&hash);
        if shard.get(&hash).await.is_none() {
            return None;
        }
        Some(
            shard
                .merge(hash, |current| {
                    let mut entry = current.unwrap_or_else(|| {
                        ContentLocationEntry::new_with_machine(machine, UNKNOWN_SIZE, Utc::now())
                    });
                    entry.remove_machine(machine);
                    entry
                })
                .await,
        )
    }

    /// `touch(hash)`: updates `lastAccessTimeUtc` only.
    pub async fn touch(&self, hash: ShortHash, now: DateTime<Utc>) -> Option<ContentLocationEntry> {
        let shard = self.shard_for(&hash);
        if shard.get(&hash).await.is_none() {
            return None;
        }
        Some(
            shard
                .merge(hash, |current| {
                    let mut entry = current.expect("checked present above");
                    entry.touch(now);
                    entry
                })
                .await,
        )
    }

    /// `garbageCollect(context)`: removes entries whose bitset is empty or
    /// whose every set machine is inactive.
    pub async fn garbage_collect(&self, is_active: impl Fn(MachineId) -> bool + Copy) -> Result<GcStats, LocusError> {
        // GC inspects the persisted view; flush first so a pass never
        // misses entries still sitting in the write cache.
        self.force_cache_flush(FlushTrigger::Explicit).await?;
        let mut stats = GcStats::default();
        for shard in &self.shards {
            let all = shard.scan_all();
            let mut to_delete = Vec::new();
            for (key, entry) in &all {
                stats.inspected += 1;
                if entry.is_collectible(is_active) {
                    to_delete.push(*key);
                }
            }
            stats.removed += to_delete.len();
            shard.delete_keys(to_delete).await?;
        }
        crate::core::metrics::GC_ENTRIES_CLEANED.inc_by(stats.removed as f64);
        crate::core::metrics::GC_ENTRIES_COLLECTED.inc_by(stats.inspected as f64);
        Ok(stats)
    }

    /// `forceCacheFlush(context)`: drains every shard's in-memory cache into
    /// the persistent layer.
    pub async fn force_cache_flush(&self, trigger: FlushTrigger) -> Result<usize, LocusError> {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.flush(trigger).await?;
        }
        Ok(total)
    }

    /// Compacts every shard's persistent segment (snapshot + WAL truncate).
    /// Called by the checkpoint producer before taking a snapshot.
    pub async fn compact_all(&self) -> Result<(), LocusError> {
        for shard in &self.shards {
            shard.compact().await?;
        }
        Ok(())
    }

    /// Total number of keys currently tracked, across all shards.
    pub fn key_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.key_count.load(std::sync::atomic::Ordering::Relaxed))
            .sum()
    }

    /// Enumerates every persisted entry across all shards (used by
    /// reconciliation and checkpoint snapshotting). Callers should flush
    /// first if they need a fully up-to-date view.
    pub fn scan_all(&self) -> Vec<(ShortHash, ContentLocationEntry)> {
        self.shards.iter().flat_map(|s| s.scan_all()).collect()
    }

    fn cluster_state_path(&self) -> PathBuf {
        self.base_dir.join("cluster_state.json")
    }

    /// `updateClusterState(clusterState, write)`: reads (and optionally
    /// writes) the cluster-state record mirrored under a reserved key.
    pub async fn update_cluster_state(
        &self,
        new_state: Option<&ClusterState>,
        write: bool,
    ) -> Result<Option<ClusterState>, LocusError> {
        let path = self.cluster_state_path();
        if write {
            if let Some(state) = new_state {
                let bytes = serde_json::to_vec_pretty(state)
                    .map_err(|e| LocusError::Serialization(e.to_string()))?;
                let tmp = self.cluster_state_path().with_extension("json.tmp");
                fs::write(&tmp, &bytes).await?;
                fs::rename(&tmp, &path).await?;
                return Ok(Some(state.clone()));
            }
        }
        match fs::read(&path).await {
            Ok(bytes) => {
                let state: ClusterState = serde_json::from_slice(&bytes)
                    .map_err(|e| LocusError::Corrupt(format!("cluster state mirror: {e}")))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::HashType;

    fn short(byte: u8) -> ShortHash {
        crate::core::hash::ContentHash::new(HashType::Vso0, [byte; 32]).to_short()
    }

    #[tokio::test]
    async fn invariant_location_added_is_visible_locally() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocationDB::open(dir.path(), 1024).await.unwrap();
        let h = short(1);
        db.location_added(h, MachineId(1), 10, Utc::now()).await;
        let entry = db.try_get(h).await.unwrap();
        assert!(entry.machines.contains(MachineId(1)));
    }

    #[tokio::test]
    async fn size_conflict_keeps_the_larger_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocationDB::open(dir.path(), 1024).await.unwrap();
        let h = short(2);
        db.location_added(h, MachineId(1), 100, Utc::now()).await;
        db.location_added(h, MachineId(2), 50, Utc::now()).await;
        let entry = db.try_get(h).await.unwrap();
        assert_eq!(entry.size, 100);
    }

    #[tokio::test]
    async fn gc_collects_empty_and_fully_inactive_entries() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocationDB::open(dir.path(), 1024).await.unwrap();
        let h1 = short(3);
        let h2 = short(4);
        db.location_added(h1, MachineId(1), 10, Utc::now()).await;
        db.location_added(h2, MachineId(2), 10, Utc::now()).await;
        db.location_removed(h1, MachineId(1)).await;
        db.force_cache_flush(FlushTrigger::Explicit).await.unwrap();

        // h1 empty bitset -> collectible; h2 active -> survives.
        let stats = db.garbage_collect(|m| m == MachineId(2)).await.unwrap();
        assert_eq!(stats.removed, 1);
        assert!(db.try_get(h1).await.is_none());
        assert!(db.try_get(h2).await.is_some());
    }

    #[tokio::test]
    async fn gc_collects_entries_whose_only_machines_are_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocationDB::open(dir.path(), 1024).await.unwrap();
        let h = short(5);
        db.location_added(h, MachineId(9), 10, Utc::now()).await;
        db.force_cache_flush(FlushTrigger::Explicit).await.unwrap();
        let stats = db.garbage_collect(|_| false).await.unwrap();
        assert_eq!(stats.removed, 1);
    }

    #[tokio::test]
    async fn update_cluster_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocationDB::open(dir.path(), 1024).await.unwrap();
        assert!(db.update_cluster_state(None, false).await.unwrap().is_none());

        let state = ClusterState::new("epoch-1");
        db.update_cluster_state(Some(&state), true).await.unwrap();
        let read_back = db.update_cluster_state(None, false).await.unwrap().unwrap();
        assert_eq!(read_back.epoch, state.epoch);
    }
}
