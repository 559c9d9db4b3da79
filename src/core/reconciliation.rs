// src/core/reconciliation.rs

//! Reconciliation (spec §4.7): converges a worker's on-disk content with
//! the master's view of what that worker holds. Driven by a narrow
//! `LocalContentEnumerator` capability (wrapping the out-of-scope blob
//! store's `enumerateLocalHashes`) rather than the whole `ServerState`,
//! grounded on the teacher's habit of handing background workers only the
//! capability trait they need (e.g. `core::tasks::cache_gc` takes a cache
//! directory handle, not the full state) — this also lets tests drive the
//! reconciler with a deterministic fake set of on-disk hashes.

use crate::core::LocusError;
use crate::core::hash::ShortHash;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

#[async_trait]
pub trait LocalContentEnumerator: Send + Sync + std::fmt::Debug {
    async fn enumerate_local_hashes(&self) -> Result<Vec<ShortHash>, LocusError>;
}

/// Wraps a `BlobStore` so the reconciler can enumerate local content
/// without depending on the whole storage trait surface.
#[derive(Debug)]
pub struct BlobStoreContentEnumerator {
    blob_store: std::sync::Arc<dyn crate::core::blob_store::BlobStore>,
}

impl BlobStoreContentEnumerator {
    pub fn new(blob_store: std::sync::Arc<dyn crate::core::blob_store::BlobStore>) -> Self {
        Self { blob_store }
    }
}

#[async_trait]
impl LocalContentEnumerator for BlobStoreContentEnumerator {
    async fn enumerate_local_hashes(&self) -> Result<Vec<ShortHash>, LocusError> {
        Ok(self
            .blob_store
            .enumerate_local_hashes()
            .await?
            .into_iter()
            .map(|h| h.to_short())
            .collect())
    }
}

/// The result of one reconciliation cycle: the slice of the overall delta
/// emitted this cycle (bounded by `ReconciliationMaxCycleSize`) plus how
/// many items remain for the next cycle.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub adds: Vec<ShortHash>,
    pub removes: Vec<ShortHash>,
    /// Number of cycles run to fully drain the delta computed when this
    /// round started (`ReconciliationCycles` in spec §4.7).
    pub cycles_so_far: usize,
    pub remaining: usize,
}

struct Pending {
    adds: VecDeque<ShortHash>,
    removes: VecDeque<ShortHash>,
    cycles_so_far: usize,
}

pub struct ReconciliationEngine {
    max_cycle_size: usize,
    location_entry_expiry: Duration,
    last_reconciled: Mutex<Option<DateTime<Utc>>>,
    pending: Mutex<Option<Pending>>,
}

impl ReconciliationEngine {
    pub fn new(max_cycle_size: usize, location_entry_expiry: Duration) -> Self {
        Self {
            max_cycle_size,
            location_entry_expiry,
            last_reconciled: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    /// `MarkReconciled(id, reconciled?)`.
    pub fn mark_reconciled(&self, at: Option<DateTime<Utc>>) {
        *self.last_reconciled.lock().unwrap() = at;
    }

    /// `IsReconcileUpToDate(id)`: true iff the cursor's timestamp is within
    /// `LocationEntryExpiry` of `now`.
    pub fn is_up_to_date(&self, now: DateTime<Utc>) -> bool {
        match *self.last_reconciled.lock().unwrap() {
            Some(ts) => now - ts <= self.location_entry_expiry,
            None => false,
        }
    }

    fn has_pending_work(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    /// Runs a single reconciliation cycle. Returns `None` when the cycle
    /// is skipped because the machine is already up-to-date and `force`
    /// was not requested (spec §4.7, last paragraph).
    pub async fn run_cycle(
        &self,
        enumerator: &dyn LocalContentEnumerator,
        indexed: &[ShortHash],
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Option<ReconcileOutcome>, LocusError> {
        if !force && self.is_up_to_date(now) && !self.has_pending_work() {
            return Ok(None);
        }

        {
            let mut pending_guard = self.pending.lock().unwrap();
            if pending_guard.is_none() {
                let on_disk: HashSet<ShortHash> = enumerator.enumerate_local_hashes().await?.into_iter().collect();
                let indexed_set: HashSet<ShortHash> = indexed.iter().copied().collect();

                let mut to_add: Vec<ShortHash> = on_disk.difference(&indexed_set).copied().collect();
                let mut to_remove: Vec<ShortHash> = indexed_set.difference(&on_disk).copied().collect();
                to_add.sort_by_key(|h| h.to_hex());
                to_remove.sort_by_key(|h| h.to_hex());

                *pending_guard = Some(Pending {
                    adds: to_add.into(),
                    removes: to_remove.into(),
                    cycles_so_far: 0,
                });
            }
        }

        let mut pending_guard = self.pending.lock().unwrap();
        let pending = pending_guard.as_mut().expect("populated above");

        let mut budget = self.max_cycle_size;
        let mut adds = Vec::new();
        while budget > 0 {
            match pending.adds.pop_front() {
                Some(h) => {
                    adds.push(h);
                    budget -= 1;
                }
                None => break,
            }
        }
        let mut removes = Vec::new();
        while budget > 0 {
            match pending.removes.pop_front() {
                Some(h) => {
                    removes.push(h);
                    budget -= 1;
                }
                None => break,
            }
        }

        pending.cycles_so_far += 1;
        let remaining = pending.adds.len() + pending.removes.len();
        let cycles_so_far = pending.cycles_so_far;
        if remaining == 0 {
            *pending_guard = None;
        }
        drop(pending_guard);

        self.mark_reconciled(Some(now));
        Ok(Some(ReconcileOutcome { adds, removes, cycles_so_far, remaining }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::{ContentHash, HashType};

    fn short(byte: u8) -> ShortHash {
        ContentHash::new(HashType::Vso0, [byte; 32]).to_short()
    }

    #[derive(Debug)]
    struct FakeEnumerator(Vec<ShortHash>);

    #[async_trait::async_trait]
    impl LocalContentEnumerator for FakeEnumerator {
        async fn enumerate_local_hashes(&self) -> Result<Vec<ShortHash>, LocusError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn computes_symmetric_difference() {
        let engine = ReconciliationEngine::new(100, Duration::hours(1));
        let enumerator = FakeEnumerator(vec![short(1), short(2)]);
        let indexed = vec![short(2), short(3)];
        let outcome = engine.run_cycle(&enumerator, &indexed, Utc::now(), true).await.unwrap().unwrap();
        assert_eq!(outcome.adds, vec![short(1)]);
        assert_eq!(outcome.removes, vec![short(3)]);
        assert_eq!(outcome.remaining, 0);
    }

    #[tokio::test]
    async fn splits_large_delta_across_cycles_scenario_s5() {
        let on_disk: Vec<ShortHash> = (10..20).map(short).collect();
        let indexed: Vec<ShortHash> = (100..200).map(short).collect();
        let engine = ReconciliationEngine::new(15, Duration::hours(1));
        let enumerator = FakeEnumerator(on_disk.clone());

        let first = engine.run_cycle(&enumerator, &indexed, Utc::now(), true).await.unwrap().unwrap();
        assert_eq!(first.adds.len() + first.removes.len(), 15);
        assert!(first.remaining > 0);

        let mut total_adds = first.adds.len();
        let mut total_removes = first.removes.len();
        let mut cycles = 1;
        loop {
            let outcome = engine.run_cycle(&enumerator, &indexed, Utc::now(), true).await.unwrap().unwrap();
            total_adds += outcome.adds.len();
            total_removes += outcome.removes.len();
            cycles += 1;
            if outcome.remaining == 0 {
                break;
            }
        }
        assert_eq!(total_adds, 10);
        assert_eq!(total_removes, 100);
        assert!(cycles > 1);
    }

    #[tokio::test]
    async fn skips_when_up_to_date_and_not_forced() {
        let engine = ReconciliationEngine::new(100, Duration::hours(1));
        let enumerator = FakeEnumerator(vec![]);
        let now = Utc::now();
        engine.run_cycle(&enumerator, &[], now, true).await.unwrap();
        assert!(engine.run_cycle(&enumerator, &[], now, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn force_overrides_up_to_date_skip() {
        let engine = ReconciliationEngine::new(100, Duration::hours(1));
        let enumerator = FakeEnumerator(vec![short(1)]);
        let now = Utc::now();
        engine.run_cycle(&enumerator, &[], now, true).await.unwrap();
        assert!(engine.run_cycle(&enumerator, &[], now, true).await.unwrap().is_some());
    }
}
