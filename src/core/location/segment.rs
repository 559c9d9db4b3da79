// src/core/location/segment.rs

//! On-disk persistence format for a single `LocationDB` shard: a snapshot
//! file (`SEGDB`, grounded on the teacher's `SPLDB` framing) plus an
//! append-only write-ahead log of batches applied since the last snapshot.
//! Supports the three capabilities spec §4.1 requires of the persistence
//! format: range scan, atomic multi-key batch write, and snapshotting.

use crate::core::LocusError;
use crate::core::hash::ShortHash;
use crate::core::location::entry::ContentLocationEntry;
use bincode::config::standard;
use crc::{CRC_64_REDIS, Crc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const SEGDB_MAGIC: &[u8] = b"LOCUSEG1";
const CHECKSUM_ALGO: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

/// A single write batch: upserts and removals to apply atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub upserts: Vec<(ShortHash, ContentLocationEntry)>,
    pub removals: Vec<ShortHash>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// A persistent, append-friendly store for one shard's key space. Holds an
/// in-memory mirror of the on-disk state; every mutation is first appended
/// to the WAL file (durable), then applied in memory.
pub struct PersistentSegment {
    dir: PathBuf,
    snapshot_path: PathBuf,
    wal_path: PathBuf,
    wal_file: tokio::sync::Mutex<Option<fs::File>>,
    entries: std::sync::RwLock<BTreeMap<ShortHash, ContentLocationEntry>>,
}

impl PersistentSegment {
    /// Opens (creating if necessary) a segment rooted at `dir`, replaying
    /// any snapshot and WAL records found there.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, LocusError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        let snapshot_path = dir.join("snapshot.segdb");
        let wal_path = dir.join("wal.log");

        let mut entries = BTreeMap::new();
        if let Ok(bytes) = fs::read(&snapshot_path).await {
            Self::load_snapshot_into(&bytes, &mut entries)?;
        }
        if let Ok(bytes) = fs::read(&wal_path).await {
            Self::replay_wal_into(&bytes, &mut entries)?;
        }

        let wal_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .await?;

        Ok(Self {
            dir,
            snapshot_path,
            wal_path,
            wal_file: tokio::sync::Mutex::new(Some(wal_file)),
            entries: std::sync::RwLock::new(entries),
        })
    }

    pub fn get(&self, key: &ShortHash) -> Option<ContentLocationEntry> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// Range scan over every entry, for GC and checkpointing.
    pub fn scan_all(&self) -> Vec<(ShortHash, ContentLocationEntry)> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Applies a batch atomically: appended to the WAL as one record, then
    /// applied in memory under the same lock.
    pub async fn apply_batch(&self, batch: WriteBatch) -> Result<(), LocusError> {
        if batch.is_empty() {
            return Ok(());
        }
        let record = Self::encode_record(&batch)?;
        {
            let mut guard = self.wal_file.lock().await;
            let file = guard.as_mut().expect("wal file always open");
            file.write_all(&(record.len() as u64).to_le_bytes()).await?;
            file.write_all(&record).await?;
            file.flush().await?;
        }
        let mut entries = self.entries.write().unwrap();
        for (key, entry) in batch.upserts {
            entries.insert(key, entry);
        }
        for key in batch.removals {
            entries.remove(&key);
        }
        Ok(())
    }

    /// Produces a consistent snapshot of the current in-memory state,
    /// encoded and checksum-footed, suitable for checkpoint shipping.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, LocusError> {
        let entries = self.entries.read().unwrap().clone();
        let body = bincode::serde::encode_to_vec(&entries, standard())?;
        let mut out = Vec::with_capacity(SEGDB_MAGIC.len() + body.len() + 8);
        out.extend_from_slice(SEGDB_MAGIC);
        out.extend_from_slice(&body);
        let checksum = CHECKSUM_ALGO.checksum(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    /// Atomically rewrites the snapshot file with the current state and
    /// truncates the WAL, called after a checkpoint has been taken.
    pub async fn compact(&self) -> Result<(), LocusError> {
        let bytes = self.snapshot_bytes()?;
        let tmp_path = self.dir.join("snapshot.segdb.tmp");
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.snapshot_path).await?;

        let mut guard = self.wal_file.lock().await;
        let new_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .await?;
        *guard = Some(new_file);
        Ok(())
    }

    fn encode_record(batch: &WriteBatch) -> Result<Vec<u8>, LocusError> {
        Ok(bincode::serde::encode_to_vec(
            (&batch.upserts, &batch.removals),
            standard(),
        )?)
    }

    fn load_snapshot_into(
        bytes: &[u8],
        out: &mut BTreeMap<ShortHash, ContentLocationEntry>,
    ) -> Result<(), LocusError> {
        if bytes.len() < SEGDB_MAGIC.len() + 8 {
            return Err(LocusError::Corrupt("segment snapshot too short".into()));
        }
        let (header, rest) = bytes.split_at(SEGDB_MAGIC.len());
        if header != SEGDB_MAGIC {
            return Err(LocusError::Corrupt("bad segment snapshot magic".into()));
        }
        let (body, checksum_bytes) = rest.split_at(rest.len() - 8);
        let expected = u64::from_le_bytes(checksum_bytes.try_into().unwrap());
        let actual = CHECKSUM_ALGO.checksum(&bytes[..bytes.len() - 8]);
        if expected != actual {
            return Err(LocusError::Corrupt("segment snapshot checksum mismatch".into()));
        }
        let (decoded, _): (BTreeMap<ShortHash, ContentLocationEntry>, usize) =
            bincode::serde::decode_from_slice(body, standard())?;
        *out = decoded;
        Ok(())
    }

    fn replay_wal_into(
        bytes: &[u8],
        out: &mut BTreeMap<ShortHash, ContentLocationEntry>,
    ) -> Result<(), LocusError> {
        let mut offset = 0usize;
        while offset + 8 <= bytes.len() {
            let len = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()) as usize;
            offset += 8;
            if offset + len > bytes.len() {
                // Truncated trailing record from a crash mid-write; ignore it.
                break;
            }
            let record = &bytes[offset..offset + len];
            offset += len;
            let (decoded, _): (
                (Vec<(ShortHash, ContentLocationEntry)>, Vec<ShortHash>),
                usize,
            ) = bincode::serde::decode_from_slice(record, standard())?;
            let (upserts, removals) = decoded;
            for (key, entry) in upserts {
                out.insert(key, entry);
            }
            for key in removals {
                out.remove(&key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::HashType;
    use chrono::Utc;

    fn short(byte: u8) -> ShortHash {
        crate::core::hash::ContentHash::new(HashType::Vso0, [byte; 32]).to_short()
    }

    fn entry(machine: u32) -> ContentLocationEntry {
        ContentLocationEntry::new_with_machine(
            crate::core::machine::MachineId(machine),
            100,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn batch_write_then_reopen_recovers_via_wal() {
        let dir = tempfile::tempdir().unwrap();
        let seg = PersistentSegment::open(dir.path()).await.unwrap();
        seg.apply_batch(WriteBatch {
            upserts: vec![(short(1), entry(1)), (short(2), entry(2))],
            removals: vec![],
        })
        .await
        .unwrap();

        assert!(seg.get(&short(1)).is_some());
        drop(seg);

        let reopened = PersistentSegment::open(dir.path()).await.unwrap();
        assert!(reopened.get(&short(1)).is_some());
        assert!(reopened.get(&short(2)).is_some());
        assert_eq!(reopened.scan_all().len(), 2);
    }

    #[tokio::test]
    async fn compact_truncates_wal_but_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let seg = PersistentSegment::open(dir.path()).await.unwrap();
        seg.apply_batch(WriteBatch {
            upserts: vec![(short(1), entry(1))],
            removals: vec![],
        })
        .await
        .unwrap();
        seg.compact().await.unwrap();

        let wal_len = fs::metadata(dir.path().join("wal.log")).await.unwrap().len();
        assert_eq!(wal_len, 0);

        let reopened = PersistentSegment::open(dir.path()).await.unwrap();
        assert!(reopened.get(&short(1)).is_some());
    }

    #[tokio::test]
    async fn removal_batch_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let seg = PersistentSegment::open(dir.path()).await.unwrap();
        seg.apply_batch(WriteBatch {
            upserts: vec![(short(1), entry(1))],
            removals: vec![],
        })
        .await
        .unwrap();
        seg.apply_batch(WriteBatch {
            upserts: vec![],
            removals: vec![short(1)],
        })
        .await
        .unwrap();
        assert!(seg.get(&short(1)).is_none());
    }
}
