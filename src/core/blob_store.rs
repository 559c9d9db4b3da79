// src/core/blob_store.rs

//! `BlobStore`: the out-of-scope on-disk blob store collaborator named in
//! spec §6 (`putStream`, `putFile`, `openStream`, `placeFile`, `pin`,
//! `delete`, `enumerateLocalHashes`, `lastAccessTime`, `size`). An
//! in-memory reference implementation stands in for the real disk-backed
//! store for tests and the demo binary, grounded on the teacher's pattern
//! of a narrow trait per external collaborator (e.g. `core::replication`'s
//! transport abstractions) rather than a monolithic "storage" god-trait.

use crate::core::LocusError;
use crate::core::hash::ContentHash;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Bytes,
    last_access_time_utc: DateTime<Utc>,
    pinned: bool,
}

/// The local on-disk content store. `putFile`/`placeFile`/`openStream` are
/// collapsed to whole-buffer operations here since streaming is an
/// implementation detail the location coordination plane never observes.
#[async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    async fn put_file(&self, hash: ContentHash, bytes: Bytes, now: DateTime<Utc>) -> Result<(), LocusError>;
    async fn open_stream(&self, hash: ContentHash) -> Result<Bytes, LocusError>;
    async fn pin(&self, hash: ContentHash) -> Result<(), LocusError>;
    async fn delete(&self, hash: ContentHash) -> Result<(), LocusError>;
    async fn enumerate_local_hashes(&self) -> Result<Vec<ContentHash>, LocusError>;
    async fn last_access_time(&self, hash: ContentHash) -> Result<DateTime<Utc>, LocusError>;
    async fn size(&self, hash: ContentHash) -> Result<i64, LocusError>;
    async fn touch(&self, hash: ContentHash, now: DateTime<Utc>) -> Result<(), LocusError>;
    async fn contains(&self, hash: ContentHash) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    data: DashMap<ContentHash, StoredBlob>,
}

impl InMemoryBlobStore {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put_file(&self, hash: ContentHash, bytes: Bytes, now: DateTime<Utc>) -> Result<(), LocusError> {
        self.data.insert(
            hash,
            StoredBlob { bytes, last_access_time_utc: now, pinned: false },
        );
        Ok(())
    }

    async fn open_stream(&self, hash: ContentHash) -> Result<Bytes, LocusError> {
        self.data
            .get(&hash)
            .map(|b| b.bytes.clone())
            .ok_or(LocusError::ContentNotFound)
    }

    async fn pin(&self, hash: ContentHash) -> Result<(), LocusError> {
        let mut entry = self.data.get_mut(&hash).ok_or(LocusError::ContentNotFound)?;
        entry.pinned = true;
        Ok(())
    }

    async fn delete(&self, hash: ContentHash) -> Result<(), LocusError> {
        self.data.remove(&hash);
        Ok(())
    }

    async fn enumerate_local_hashes(&self) -> Result<Vec<ContentHash>, LocusError> {
        Ok(self.data.iter().map(|e| *e.key()).collect())
    }

    async fn last_access_time(&self, hash: ContentHash) -> Result<DateTime<Utc>, LocusError> {
        self.data
            .get(&hash)
            .map(|b| b.last_access_time_utc)
            .ok_or(LocusError::ContentNotFound)
    }

    async fn size(&self, hash: ContentHash) -> Result<i64, LocusError> {
        self.data
            .get(&hash)
            .map(|b| b.bytes.len() as i64)
            .ok_or(LocusError::ContentNotFound)
    }

    async fn touch(&self, hash: ContentHash, now: DateTime<Utc>) -> Result<(), LocusError> {
        let mut entry = self.data.get_mut(&hash).ok_or(LocusError::ContentNotFound)?;
        entry.last_access_time_utc = now;
        Ok(())
    }

    async fn contains(&self, hash: ContentHash) -> bool {
        self.data.contains_key(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::HashType;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::new(HashType::Vso0, [byte; 32])
    }

    #[tokio::test]
    async fn put_then_open_round_trips() {
        let store = InMemoryBlobStore::new();
        store.put_file(hash(1), Bytes::from_static(b"hello"), Utc::now()).await.unwrap();
        assert_eq!(store.open_stream(hash(1)).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn missing_hash_is_content_not_found() {
        let store = InMemoryBlobStore::new();
        assert!(matches!(store.open_stream(hash(9)).await, Err(LocusError::ContentNotFound)));
    }

    #[tokio::test]
    async fn delete_removes_from_enumeration() {
        let store = InMemoryBlobStore::new();
        store.put_file(hash(1), Bytes::from_static(b"a"), Utc::now()).await.unwrap();
        store.delete(hash(1)).await.unwrap();
        assert!(store.enumerate_local_hashes().await.unwrap().is_empty());
    }
}
