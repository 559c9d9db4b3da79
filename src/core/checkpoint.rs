// src/core/checkpoint.rs

//! Checkpoint store producer/consumer (spec §4.4): the master periodically
//! snapshots `LocationDB` into content-addressed chunks uploaded to the
//! `CentralStore`, and every machine restores from the latest manifest when
//! its local copy is stale. Incremental checkpointing skips re-uploading or
//! re-downloading a chunk whose content hash is already known, grounded on
//! the teacher's `core::persistence::rdb` snapshot writer, which also
//! diffs against the previous snapshot rather than always writing whole.
//! Chunks are zstd-compressed before the content hash is taken, the same
//! crate the teacher reaches for to compress cache bodies before they're
//! stored (`core::commands::cache::cache_get::CacheBody::CompressedInMemory`).

use crate::core::LocusError;
use crate::core::hash::{ContentHash, HashType};
use crate::core::location::db::LocationDB;
use crate::core::location::entry::ContentLocationEntry;
use crate::core::machine::MachineLocation;
use crate::core::transport::{CentralStore, FileTransport};
use bincode::config::standard;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Entries per uploaded chunk. Keeping chunks smallish bounds both the
/// in-memory cost of a single (de)serialize and the blast radius of
/// re-uploading one chunk after a small local delta.
const CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub blob_name: String,
    pub hash: ContentHash,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub checkpoint_id: String,
    pub epoch: String,
    pub sequence_number: u64,
    pub created_at_utc: DateTime<Utc>,
    pub files: Vec<ManifestFile>,
}

impl CheckpointManifest {
    fn manifest_key(epoch: &str) -> String {
        format!("manifest/{epoch}/latest")
    }
}

fn chunk_blob_name(epoch: &str, hash: ContentHash) -> String {
    format!("chkpt/{epoch}/{}", hash.to_hex())
}

pub struct CheckpointProducer {
    central_store: Arc<dyn CentralStore>,
    epoch: String,
    /// Content hashes of chunks already known to be present in the
    /// `CentralStore`, avoiding a re-upload on every cycle when most of the
    /// keyspace is unchanged.
    known_chunk_hashes: Mutex<HashSet<String>>,
}

impl CheckpointProducer {
    pub fn new(central_store: Arc<dyn CentralStore>, epoch: impl Into<String>) -> Self {
        Self { central_store, epoch: epoch.into(), known_chunk_hashes: Mutex::new(HashSet::new()) }
    }

    /// Produces and uploads a fresh checkpoint of `location_db`'s entire
    /// keyspace, publishing the resulting manifest as the epoch's latest.
    pub async fn produce(&self, location_db: &LocationDB, sequence_number: u64, now: DateTime<Utc>) -> Result<CheckpointManifest, LocusError> {
        location_db.force_cache_flush(crate::core::location::cache::FlushTrigger::Explicit).await?;
        location_db.compact_all().await?;

        let all_entries = location_db.scan_all();
        let mut files = Vec::new();
        for chunk in all_entries.chunks(CHUNK_SIZE) {
            let owned: Vec<(crate::core::hash::ShortHash, ContentLocationEntry)> = chunk.to_vec();
            let encoded = bincode::serde::encode_to_vec(&owned, standard())
                .map_err(|e| LocusError::Serialization(e.to_string()))?;
            let bytes = zstd::encode_all(encoded.as_slice(), 0)?;
            let hash = ContentHash::of(HashType::Sha256, &bytes);
            let blob_name = chunk_blob_name(&self.epoch, hash);

            let already_known = self.known_chunk_hashes.lock().unwrap().contains(&blob_name);
            if already_known {
                crate::core::metrics::INCREMENTAL_CHECKPOINT_FILES_UPLOAD_SKIPPED.inc();
            } else {
                self.central_store.put_file(&blob_name, bytes::Bytes::from(bytes.clone())).await?;
                self.known_chunk_hashes.lock().unwrap().insert(blob_name.clone());
            }
            files.push(ManifestFile { blob_name, hash, size: bytes.len() });
        }

        let manifest = CheckpointManifest {
            checkpoint_id: format!("{}-{sequence_number}", self.epoch),
            epoch: self.epoch.clone(),
            sequence_number,
            created_at_utc: now,
            files,
        };
        let manifest_bytes = serde_json::to_vec(&manifest).map_err(|e| LocusError::Serialization(e.to_string()))?;
        self.central_store
            .put_file(&CheckpointManifest::manifest_key(&self.epoch), bytes::Bytes::from(manifest_bytes))
            .await?;
        Ok(manifest)
    }
}

pub struct CheckpointConsumer {
    central_store: Arc<dyn CentralStore>,
    file_transport: Arc<dyn FileTransport>,
    epoch: String,
    /// Chunk hashes already applied locally, so a restore cycle that only
    /// needs a handful of new chunks doesn't re-download the rest.
    applied_chunk_hashes: Mutex<HashSet<String>>,
}

impl CheckpointConsumer {
    pub fn new(central_store: Arc<dyn CentralStore>, file_transport: Arc<dyn FileTransport>, epoch: impl Into<String>) -> Self {
        Self {
            central_store,
            file_transport,
            epoch: epoch.into(),
            applied_chunk_hashes: Mutex::new(HashSet::new()),
        }
    }

    /// Restores into `location_db` from the latest manifest, unless
    /// `last_restored_at` is still within `restore_age_threshold` of `now`
    /// (spec §9(c): comparison is strict `>`, so equality does not trigger
    /// a restore). Returns `None` when the cycle was skipped.
    pub async fn restore(
        &self,
        location_db: &LocationDB,
        peers: &[MachineLocation],
        restore_age_threshold: Duration,
        last_restored_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckpointManifest>, LocusError> {
        if let Some(last) = last_restored_at {
            if now - last <= restore_age_threshold {
                crate::core::metrics::RESTORE_CHECKPOINTS_SKIPPED.inc();
                return Ok(None);
            }
        }

        let manifest_bytes = self.central_store.try_get_file(&CheckpointManifest::manifest_key(&self.epoch)).await?;
        let manifest: CheckpointManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| LocusError::Corrupt(format!("checkpoint manifest: {e}")))?;

        for file in &manifest.files {
            let already_applied = self.applied_chunk_hashes.lock().unwrap().contains(&file.blob_name);
            if already_applied {
                crate::core::metrics::INCREMENTAL_CHECKPOINT_FILES_DOWNLOAD_SKIPPED.inc();
                continue;
            }

            let compressed = self.fetch_chunk(peers, file).await?;
            let decompressed = zstd::decode_all(compressed.as_ref())
                .map_err(|e| LocusError::Corrupt(format!("checkpoint chunk {}: {e}", file.blob_name)))?;
            let (entries, _): (Vec<(crate::core::hash::ShortHash, ContentLocationEntry)>, _) =
                bincode::serde::decode_from_slice(&decompressed, standard())
                    .map_err(|e| LocusError::Corrupt(format!("checkpoint chunk {}: {e}", file.blob_name)))?;
            for (hash, entry) in entries {
                for machine in entry.machines.iter() {
                    location_db.location_added(hash, machine, entry.size, entry.last_access_time_utc).await;
                }
            }
            self.applied_chunk_hashes.lock().unwrap().insert(file.blob_name.clone());
        }

        Ok(Some(manifest))
    }

    /// Tries every peer before falling back to the `CentralStore`
    /// (`TryGetFileFromPeerSucceeded` / `TryGetFileFromFallback`, spec §4.4).
    async fn fetch_chunk(&self, peers: &[MachineLocation], file: &ManifestFile) -> Result<bytes::Bytes, LocusError> {
        for peer in peers {
            if let Ok(bytes) = self.file_transport.fetch(peer, file.hash).await {
                crate::core::metrics::TRY_GET_FILE_FROM_PEER_SUCCEEDED.inc();
                return Ok(bytes);
            }
        }
        crate::core::metrics::TRY_GET_FILE_FROM_FALLBACK.inc();
        self.central_store.try_get_file(&file.blob_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::MachineId;
    use crate::core::transport::{InMemoryCentralStore, InMemoryFileTransport};

    fn short(byte: u8) -> crate::core::hash::ShortHash {
        ContentHash::new(HashType::Vso0, [byte; 32]).to_short()
    }

    async fn populated_db() -> (tempfile::TempDir, LocationDB) {
        let dir = tempfile::tempdir().unwrap();
        let db = LocationDB::open(dir.path(), 1024).await.unwrap();
        db.location_added(short(1), MachineId(1), 10, Utc::now()).await;
        db.location_added(short(2), MachineId(2), 20, Utc::now()).await;
        (dir, db)
    }

    #[tokio::test]
    async fn produce_then_restore_round_trips_entries() {
        let (_dir, producer_db) = populated_db().await;
        let central = InMemoryCentralStore::new();
        let transport = InMemoryFileTransport::new();

        let producer = CheckpointProducer::new(central.clone(), "e1");
        producer.produce(&producer_db, 1, Utc::now()).await.unwrap();

        let restore_dir = tempfile::tempdir().unwrap();
        let restore_db = LocationDB::open(restore_dir.path(), 1024).await.unwrap();
        let consumer = CheckpointConsumer::new(central, transport, "e1");
        let manifest = consumer
            .restore(&restore_db, &[], Duration::seconds(0), None, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manifest.sequence_number, 1);

        assert!(restore_db.try_get(short(1)).await.unwrap().machines.contains(MachineId(1)));
        assert!(restore_db.try_get(short(2)).await.unwrap().machines.contains(MachineId(2)));
    }

    #[tokio::test]
    async fn restore_skips_when_within_age_threshold() {
        let (_dir, db) = populated_db().await;
        let central = InMemoryCentralStore::new();
        let transport = InMemoryFileTransport::new();
        CheckpointProducer::new(central.clone(), "e1").produce(&db, 1, Utc::now()).await.unwrap();

        let consumer = CheckpointConsumer::new(central, transport, "e1");
        let now = Utc::now();
        let result = consumer.restore(&db, &[], Duration::minutes(5), Some(now), now).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn restore_triggers_when_age_strictly_exceeds_threshold() {
        let (_dir, db) = populated_db().await;
        let central = InMemoryCentralStore::new();
        let transport = InMemoryFileTransport::new();
        CheckpointProducer::new(central.clone(), "e1").produce(&db, 1, Utc::now()).await.unwrap();

        let consumer = CheckpointConsumer::new(central, transport, "e1");
        let last = Utc::now() - Duration::minutes(5);
        let now = last + Duration::minutes(5) + Duration::seconds(1);
        let result = consumer.restore(&db, &[], Duration::minutes(5), Some(last), now).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn restore_prefers_peer_over_central_store_fallback() {
        let (_dir, producer_db) = populated_db().await;
        let central = InMemoryCentralStore::new();
        let transport = InMemoryFileTransport::new();

        let producer = CheckpointProducer::new(central.clone(), "e1");
        let manifest = producer.produce(&producer_db, 1, Utc::now()).await.unwrap();

        // Mirror every chunk onto a peer so restore prefers it over the
        // CentralStore fallback.
        let peer = MachineLocation::from("peer-1");
        transport.register_peer(peer.clone(), None);
        for file in &manifest.files {
            let bytes = central.try_get_file(&file.blob_name).await.unwrap();
            transport.push(&peer, file.hash, bytes).await.unwrap();
        }

        let restore_dir = tempfile::tempdir().unwrap();
        let restore_db = LocationDB::open(restore_dir.path(), 1024).await.unwrap();
        let consumer = CheckpointConsumer::new(central, transport, "e1");
        consumer.restore(&restore_db, &[peer], Duration::seconds(0), None, Utc::now()).await.unwrap();
        assert!(restore_db.try_get(short(1)).await.unwrap().machines.contains(MachineId(1)));
    }
}
