// src/core/eviction.rs

//! Eviction ranking (spec §4.8): a locally-ranked, eviction-preference
//! ordering over candidate hashes, driven by age and replica count.
//! Implemented as a page-at-a-time ranker rather than a global sort,
//! grounded on the teacher's `EvictionManager::perform_eviction_cycle`
//! (`core/tasks/eviction.rs`), which also works in small time-boxed passes
//! instead of materializing and sorting the whole keyspace at once.

use crate::core::hash::ShortHash;
use crate::core::machine::MachineId;
use chrono::{DateTime, Duration, Utc};

/// One ranked candidate: its raw age and the age used for ordering after
/// the replica-count credit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedHash {
    pub hash: ShortHash,
    pub age: Duration,
    pub effective_age: Duration,
}

pub struct EvictionRanker {
    /// Time added to a hash's age per extra replica beyond the first, when
    /// computing `effective_age` — more replicas make content look older so
    /// it is preferred for eviction sooner (spec §4.8/S2).
    replica_credit: Duration,
    /// Candidates younger than this are ineligible for eviction outright.
    eviction_min_age: Duration,
    reverse: bool,
}

impl EvictionRanker {
    pub fn new(replica_credit: Duration, eviction_min_age: Duration) -> Self {
        Self { replica_credit, eviction_min_age, reverse: false }
    }

    /// Inverts ordering for policy experiments (spec §4.8's `reverse` flag);
    /// also used by the proactive copy engine to find peers *least* likely
    /// to evict a copy soon (spec §4.9).
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Ranks one page of candidates: `(hash, last_access_time, replica_count)`.
    /// Ineligible candidates (`age < eviction_min_age`) are dropped and
    /// counted; survivors are sorted by `effective_age` descending (oldest
    /// first, i.e. "prefer to evict first"), ties broken by raw `age`, then
    /// reversed if `reverse` was requested.
    pub fn rank_page(
        &self,
        candidates: Vec<(ShortHash, DateTime<Utc>, usize)>,
        now: DateTime<Utc>,
    ) -> Vec<RankedHash> {
        let mut ranked: Vec<RankedHash> = candidates
            .into_iter()
            .filter_map(|(hash, last_access, replica_count)| {
                let age = now - last_access;
                if age < self.eviction_min_age {
                    crate::core::metrics::EVICTION_MIN_AGE.inc();
                    return None;
                }
                let credited_replicas = replica_count.max(1).saturating_sub(1) as i32;
                let credit = self.replica_credit * credited_replicas;
                let effective_age = age + credit;
                Some(RankedHash { hash, age, effective_age })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.effective_age.cmp(&a.effective_age).then_with(|| b.age.cmp(&a.age))
        });
        if self.reverse {
            ranked.reverse();
        }
        ranked
    }
}

/// Looks up a candidate's replica count from a `LocationDB`-backed
/// snapshot, defaulting to 1 when the hash has no tracked entry (spec
/// §4.8: "default 1 if unknown").
pub fn replica_count_from_bitset(machines: Option<&crate::core::location::entry::MachineBitset>) -> usize {
    machines.map(|m| m.len()).filter(|n| *n > 0).unwrap_or(1)
}

/// Filters candidates advertised by a peer down to those owned by active
/// machines, matching spec §9(b): proactive replication target selection
/// must not silently include inactive machines.
pub fn only_active(machines: &crate::core::location::entry::MachineBitset, is_active: impl Fn(MachineId) -> bool) -> Vec<MachineId> {
    machines.iter().filter(|m| is_active(*m)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::{ContentHash, HashType};

    fn short(byte: u8) -> ShortHash {
        ContentHash::new(HashType::Vso0, [byte; 32]).to_short()
    }

    #[test]
    fn orders_oldest_effective_age_first() {
        let ranker = EvictionRanker::new(Duration::zero(), Duration::zero());
        let now = Utc::now();
        let candidates = vec![
            (short(1), now - Duration::hours(1), 1),
            (short(2), now - Duration::hours(5), 1),
            (short(3), now - Duration::hours(2), 1),
        ];
        let ranked = ranker.rank_page(candidates, now);
        assert_eq!(ranked[0].hash, short(2));
        assert_eq!(ranked[1].hash, short(3));
        assert_eq!(ranked[2].hash, short(1));
    }

    #[test]
    fn min_age_excludes_young_candidates() {
        let ranker = EvictionRanker::new(Duration::zero(), Duration::minutes(30));
        let now = Utc::now();
        let candidates = vec![(short(1), now - Duration::minutes(5), 1)];
        assert!(ranker.rank_page(candidates, now).is_empty());
    }

    #[test]
    fn replica_credit_makes_highly_replicated_content_look_older() {
        // Scenario S2: a heavily replicated hash should rank as older
        // (evict-first) than a less-replicated, slightly older hash once
        // credited.
        let ranker = EvictionRanker::new(Duration::minutes(15), Duration::zero());
        let now = Utc::now();
        let candidates = vec![
            (short(1), now - Duration::minutes(20), 1), // age 20m, effective 20m
            (short(2), now - Duration::minutes(16), 5), // age 16m, effective 16m + 4*15m = 76m
        ];
        let ranked = ranker.rank_page(candidates, now);
        assert_eq!(ranked[0].hash, short(2));
    }

    #[test]
    fn reverse_inverts_order() {
        let ranker = EvictionRanker::new(Duration::zero(), Duration::zero()).reversed();
        let now = Utc::now();
        let candidates = vec![
            (short(1), now - Duration::hours(1), 1),
            (short(2), now - Duration::hours(5), 1),
        ];
        let ranked = ranker.rank_page(candidates, now);
        assert_eq!(ranked[0].hash, short(1));
    }
}
