// src/core/location/shard.rs

//! `LocationShard`: one concurrent slice of the `LocationDB`, pairing a
//! `WriteCache` with its backing `PersistentSegment` behind a single lock,
//! matching spec §4.1's "single writer discipline" for the write cache and
//! §5's "per-hash critical sections are taken only inside LocationDB
//! write-batches".

use crate::core::LocusError;
use crate::core::hash::ShortHash;
use crate::core::location::cache::{FlushTrigger, WriteCache};
use crate::core::location::entry::ContentLocationEntry;
use crate::core::location::segment::{PersistentSegment, WriteBatch};
use crate::core::metrics;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub struct LocationShard {
    inner: Mutex<Inner>,
    segment: PersistentSegment,
    pub key_count: AtomicUsize,
}

struct Inner {
    cache: WriteCache,
}

impl LocationShard {
    pub async fn open(dir: impl AsRef<Path>, cache_size_threshold: usize) -> Result<Self, LocusError> {
        let segment = PersistentSegment::open(dir).await?;
        let key_count = AtomicUsize::new(segment.scan_all().len());
        Ok(Self {
            inner: Mutex::new(Inner {
                cache: WriteCache::new(cache_size_threshold),
            }),
            segment,
            key_count,
        })
    }

    /// Read path: cache first, then the persistent layer. A persistent-layer
    /// hit does NOT populate the cache (spec §4.1).
    pub async fn get(&self, key: &ShortHash) -> Option<ContentLocationEntry> {
        let inner = self.inner.lock().await;
        if let Some(entry) = inner.cache.get(key) {
            return Some(entry.clone());
        }
        self.segment.get(key)
    }

    /// Merges an update into the cache, coalescing with any pending write
    /// for the same key. `mutate` receives the current value (cache, then
    /// persistent, then `None`) and returns the new value to cache.
    pub async fn merge<F>(&self, key: ShortHash, mutate: F) -> ContentLocationEntry
    where
        F: FnOnce(Option<ContentLocationEntry>) -> ContentLocationEntry,
    {
        let mut inner = self.inner.lock().await;
        let current = inner
            .cache
            .get(&key)
            .cloned()
            .or_else(|| self.segment.get(&key));
        let was_present = current.is_some();
        let next = mutate(current);
        inner.cache.put(key, next.clone());
        if !was_present {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        next
    }

    /// Permanently deletes a batch of keys from the persistent segment.
    /// Used only by garbage collection, which operates on the flushed,
    /// persisted view of the shard (spec §4.1's `garbageCollect`).
    pub async fn delete_keys(&self, keys: Vec<ShortHash>) -> Result<(), LocusError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        for key in &keys {
            inner.cache.remove(key);
        }
        let n = keys.len();
        self.segment
            .apply_batch(WriteBatch {
                upserts: vec![],
                removals: keys,
            })
            .await?;
        self.key_count.fetch_sub(n, Ordering::Relaxed);
        Ok(())
    }

    pub async fn should_flush(&self) -> bool {
        self.inner.lock().await.cache.should_flush()
    }

    /// Drains the write cache into the persistent segment, as one atomic
    /// batch.
    pub async fn flush(&self, trigger: FlushTrigger) -> Result<usize, LocusError> {
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.cache.drain()
        };
        let n = pending.len();
        if n > 0 {
            self.segment
                .apply_batch(WriteBatch {
                    upserts: pending,
                    removals: vec![],
                })
                .await?;
            metrics::CACHE_FLUSH_TOTAL.with_label_values(&[trigger.label()]).inc();
        }
        Ok(n)
    }

    /// Enumerates every persisted entry (the cache is expected to be
    /// flushed first by the caller for a consistent view, per spec §4.4).
    pub fn scan_all(&self) -> Vec<(ShortHash, ContentLocationEntry)> {
        self.segment.scan_all()
    }

    pub async fn compact(&self) -> Result<(), LocusError> {
        self.segment.compact().await
    }

    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, LocusError> {
        self.segment.snapshot_bytes()
    }
}
