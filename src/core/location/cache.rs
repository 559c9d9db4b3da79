// src/core/location/cache.rs

//! The bounded in-memory write cache fronting a shard's persistent segment.
//!
//! Per spec §4.1: updates coalesce by `ShortHash` (the cache stores only the
//! latest merged entry), reads consult the cache first and fall back to the
//! persistent layer, and a cache miss does NOT populate the cache unless the
//! read is immediately followed by a write.

use crate::core::hash::ShortHash;
use crate::core::location::entry::ContentLocationEntry;
use std::collections::HashMap;

/// Why a flush was triggered; used only for the `locusd_write_cache_flush_total`
/// metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Timer,
    SizeThreshold,
    BeforeCheckpoint,
    EndOfReconciliation,
    Explicit,
}

impl FlushTrigger {
    pub fn label(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::SizeThreshold => "size_threshold",
            Self::BeforeCheckpoint => "before_checkpoint",
            Self::EndOfReconciliation => "end_of_reconciliation",
            Self::Explicit => "explicit",
        }
    }
}

/// An unsynchronized coalescing write cache. Callers are responsible for
/// serializing access (the owning `DbShard` holds this behind its single
/// per-shard lock, matching the spec's "single writer discipline").
#[derive(Debug, Default)]
pub struct WriteCache {
    pending: HashMap<ShortHash, ContentLocationEntry>,
    /// Soft threshold; once `pending.len()` exceeds this, `should_flush`
    /// reports true so the owning task can trigger a flush.
    size_threshold: usize,
}

impl WriteCache {
    pub fn new(size_threshold: usize) -> Self {
        Self {
            pending: HashMap::new(),
            size_threshold,
        }
    }

    pub fn get(&self, key: &ShortHash) -> Option<&ContentLocationEntry> {
        self.pending.get(key)
    }

    /// Inserts or merges the latest value for `key`. Coalescing means the
    /// cache only ever holds one (already-merged) entry per key.
    pub fn put(&mut self, key: ShortHash, entry: ContentLocationEntry) {
        self.pending.insert(key, entry);
    }

    pub fn remove(&mut self, key: &ShortHash) {
        self.pending.remove(key);
    }

    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.size_threshold
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drains the cache, returning every pending entry for persistence.
    pub fn drain(&mut self) -> Vec<(ShortHash, ContentLocationEntry)> {
        self.pending.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::HashType;
    use crate::core::machine::MachineId;
    use chrono::Utc;

    fn short(byte: u8) -> ShortHash {
        crate::core::hash::ContentHash::new(HashType::Vso0, [byte; 32]).to_short()
    }

    #[test]
    fn coalesces_repeated_writes_to_the_same_key() {
        let mut cache = WriteCache::new(100);
        let e1 = ContentLocationEntry::new_with_machine(MachineId(1), 10, Utc::now());
        let mut e2 = e1.clone();
        e2.merge_add(MachineId(2), 10, Utc::now());
        cache.put(short(1), e1);
        cache.put(short(1), e2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&short(1)).unwrap().machines.len(), 2);
    }

    #[test]
    fn size_threshold_triggers_flush_signal() {
        let mut cache = WriteCache::new(2);
        assert!(!cache.should_flush());
        cache.put(short(1), ContentLocationEntry::new_with_machine(MachineId(1), 1, Utc::now()));
        cache.put(short(2), ContentLocationEntry::new_with_machine(MachineId(1), 1, Utc::now()));
        assert!(cache.should_flush());
    }
}
