// src/core/location/entry.rs

//! `ContentLocationEntry`: the value type stored in `LocationDB`, and the
//! `MachineBitset` that tracks which machines hold a given hash.

use crate::core::machine::MachineId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sentinel used for "size not yet known" (the spec's `-1` marker).
pub const UNKNOWN_SIZE: i64 = -1;

/// The set of machines known to hold a hash. Backed by a `BTreeSet` rather
/// than a raw bit-vector: `MachineId` allocation is sparse and unbounded,
/// and the set is rarely larger than the replication factor, so a sorted
/// set is both simpler and cheaper than bit-packing here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineBitset(BTreeSet<MachineId>);

impl MachineBitset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: MachineId) -> bool {
        self.0.insert(id)
    }

    pub fn clear(&mut self, id: MachineId) -> bool {
        self.0.remove(&id)
    }

    pub fn contains(&self, id: MachineId) -> bool {
        self.0.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.0.iter().copied()
    }

    /// Returns a copy of this bitset with every inactive machine masked
    /// out, per spec §4.6: "Inactive machines' bits are logically masked
    /// out of all GetBulk results".
    pub fn masking_inactive(&self, is_active: impl Fn(MachineId) -> bool) -> Self {
        Self(self.0.iter().copied().filter(|id| is_active(*id)).collect())
    }
}

impl FromIterator<MachineId> for MachineBitset {
    fn from_iter<T: IntoIterator<Item = MachineId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The value stored under a `ShortHash` key: replica set, size, and access
/// timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentLocationEntry {
    /// Size in bytes, or `UNKNOWN_SIZE` if not yet observed.
    pub size: i64,
    pub machines: MachineBitset,
    pub creation_time_utc: DateTime<Utc>,
    pub last_access_time_utc: DateTime<Utc>,
}

impl ContentLocationEntry {
    pub fn new_with_machine(machine: MachineId, size: i64, now: DateTime<Utc>) -> Self {
        let mut machines = MachineBitset::new();
        machines.set(machine);
        Self {
            size,
            machines,
            creation_time_utc: now,
            last_access_time_utc: now,
        }
    }

    /// Merges a location add into this entry: sets the machine bit, bumps
    /// `last_access_time_utc`, and resolves a size disagreement by keeping
    /// the larger value (spec §9, open question (a): "larger wins").
    pub fn merge_add(&mut self, machine: MachineId, size: i64, now: DateTime<Utc>) {
        self.machines.set(machine);
        self.last_access_time_utc = now;
        if size != UNKNOWN_SIZE {
            if self.size == UNKNOWN_SIZE {
                self.size = size;
            } else if size != self.size {
                tracing::warn!(
                    known_size = self.size,
                    reported_size = size,
                    "size conflict on location add; keeping the larger value"
                );
                self.size = self.size.max(size);
            }
        }
    }

    pub fn remove_machine(&mut self, machine: MachineId) {
        self.machines.clear(machine);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_time_utc = now;
    }

    pub fn is_collectible(&self, is_active: impl Fn(MachineId) -> bool) -> bool {
        self.machines.is_empty() || self.machines.iter().all(|m| !is_active(m))
    }
}
