// src/core/proactive_copy.rs

//! Proactive copy engine (spec §4.9): pushes a freshly-added or newly-pinned
//! hash out to additional machines ahead of demand, instead of waiting for
//! a cache miss to trigger replication. Bounded concurrency is modeled with
//! a `tokio::sync::Semaphore` "gate", grounded on the teacher's
//! `core::replication::streaming`, which gates concurrent full-sync streams
//! behind a semaphore rather than letting every replica fan out unbounded.

use crate::core::LocusError;
use crate::core::hash::ContentHash;
use crate::core::location::entry::MachineBitset;
use crate::core::machine::{MachineId, MachineLocation};
use crate::core::transport::FileTransport;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Why a proactive copy was triggered; carried through only for logging,
/// the copy logic itself is trigger-agnostic (spec §4.9: "on put, on pin,
/// or on a background sweep").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyTrigger {
    OnPut,
    OnPin,
    Background,
}

#[derive(Debug, Clone)]
pub struct CopyTarget {
    pub machine: MachineId,
    pub location: MachineLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Succeeded,
    RejectedOlderThanEvicted,
}

pub struct ProactiveCopyEngine {
    transport: Arc<dyn FileTransport>,
    /// Bounds the number of concurrent in-flight copies, spec §4.9's
    /// `ProactiveCopyConcurrency` (previously "the gate" in the teacher's
    /// replication streamer).
    gate: Semaphore,
    use_preferred_locations: bool,
    reject_old_content: bool,
    /// Spec §4.9: "If `PushProactiveCopies`, the local machine streams the
    /// content to the target; else it requests the target to pull."
    push_proactive_copies: bool,
    local_machine: MachineId,
    local_location: MachineLocation,
}

impl ProactiveCopyEngine {
    pub fn new(
        transport: Arc<dyn FileTransport>,
        concurrency: usize,
        use_preferred_locations: bool,
        reject_old_content: bool,
        push_proactive_copies: bool,
        local_machine: MachineId,
        local_location: MachineLocation,
    ) -> Self {
        Self {
            transport,
            gate: Semaphore::new(concurrency.max(1)),
            use_preferred_locations,
            reject_old_content,
            push_proactive_copies,
            local_machine,
            local_location,
        }
    }

    /// Chooses up to `count` additional targets for a proactive copy,
    /// excluding the local machine, any machine already holding the
    /// content, and any machine spec §9(b) marks inactive.
    ///
    /// When `use_preferred_locations` is set, candidates are sorted by
    /// least-recently-touched-first and lowest-replica-count-first, i.e.
    /// the peers least likely to evict their own copy soon (the same
    /// "prefer the freshest, least-replicated holder" intuition behind
    /// `EvictionRanker`, applied to machines instead of hashes); otherwise
    /// candidates are shuffled uniformly at random, implementing the
    /// "random peer" policy.
    pub fn select_targets(
        &self,
        mut candidates: Vec<(MachineId, MachineLocation, DateTime<Utc>, usize)>,
        existing_holders: &MachineBitset,
        is_active: impl Fn(MachineId) -> bool,
        count: usize,
        _now: DateTime<Utc>,
    ) -> Vec<CopyTarget> {
        candidates.retain(|(id, _, _, _)| *id != self.local_machine);
        candidates.retain(|(id, _, _, _)| !existing_holders.contains(*id));
        candidates.retain(|(id, _, _, _)| is_active(*id));

        if self.use_preferred_locations {
            candidates.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.3.cmp(&b.3)));
        } else {
            candidates.shuffle(&mut rand::thread_rng());
        }

        candidates.into_iter().take(count).map(|(machine, location, _, _)| CopyTarget { machine, location }).collect()
    }

    /// Delivers `bytes` for `hash` to `target`, either by streaming it
    /// directly (`PushProactiveCopies`) or by asking the target to pull it
    /// from this machine instead (spec §4.9's push-vs-pull choice).
    /// `target_most_recently_evicted` models the receiver-side admission
    /// check (`RejectedPushCopy_OlderThanEvicted`): when `reject_old_content`
    /// is on and the content is older than the target's last eviction, the
    /// copy is skipped and counted as a rejection rather than an error.
    pub async fn push_copy(
        &self,
        target: &CopyTarget,
        hash: ContentHash,
        bytes: Bytes,
        content_last_access: DateTime<Utc>,
        target_most_recently_evicted: Option<DateTime<Utc>>,
    ) -> Result<CopyOutcome, LocusError> {
        if self.reject_old_content {
            if let Some(evicted_at) = target_most_recently_evicted {
                if content_last_access < evicted_at {
                    crate::core::metrics::PROACTIVE_COPY_REJECTED_OLDER_THAN_EVICTED.inc();
                    return Ok(CopyOutcome::RejectedOlderThanEvicted);
                }
            }
        }

        let _permit = self.gate.acquire().await.map_err(|_| LocusError::Cancelled)?;
        let result = if self.push_proactive_copies {
            self.transport.push(&target.location, hash, bytes).await
        } else {
            self.transport.request_pull(&self.local_location, &target.location, hash).await
        };
        match result {
            Ok(()) => {
                crate::core::metrics::PROACTIVE_COPIES_SUCCEEDED.inc();
                Ok(CopyOutcome::Succeeded)
            }
            Err(LocusError::Rejected(_)) => {
                crate::core::metrics::PROACTIVE_COPY_REJECTED_OLDER_THAN_EVICTED.inc();
                Ok(CopyOutcome::RejectedOlderThanEvicted)
            }
            Err(other) => Err(other),
        }
    }

    /// Runs a batch of pushes concurrently, bounded by the gate's permits.
    pub async fn push_batch(
        &self,
        jobs: Vec<(CopyTarget, ContentHash, Bytes, DateTime<Utc>, Option<DateTime<Utc>>)>,
    ) -> Vec<Result<CopyOutcome, LocusError>> {
        let futures = jobs.into_iter().map(|(target, hash, bytes, last_access, evicted_at)| {
            self.push_copy(&target, hash, bytes, last_access, evicted_at)
        });
        futures::future::join_all(futures).await
    }
}
