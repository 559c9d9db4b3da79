// src/core/cluster/state.rs

//! `ClusterState`: the machine-id ↔ location registry, the inactive-machine
//! set, and the epoch string. See spec §3 and §4.6.

use crate::core::machine::{MachineId, MachineLocation};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    /// Configuration-versioning string. Events and checkpoints from
    /// different epochs are incompatible.
    pub epoch: String,
    /// Monotonically increasing within an epoch.
    pub max_machine_id: u32,
    pub machines: HashMap<MachineId, MachineLocation>,
    pub last_heartbeat: HashMap<MachineId, DateTime<Utc>>,
    pub inactive: HashSet<MachineId>,
}

impl ClusterState {
    pub fn new(epoch: impl Into<String>) -> Self {
        Self {
            epoch: epoch.into(),
            max_machine_id: 0,
            machines: HashMap::new(),
            last_heartbeat: HashMap::new(),
            inactive: HashSet::new(),
        }
    }

    /// Idempotent machine registration: returns the existing id if
    /// `location` is already bound, otherwise allocates `max_machine_id + 1`.
    pub fn register_machine(&mut self, location: &MachineLocation) -> MachineId {
        if let Some((id, _)) = self.machines.iter().find(|(_, loc)| *loc == location) {
            return *id;
        }
        self.max_machine_id += 1;
        let id = MachineId(self.max_machine_id);
        self.machines.insert(id, location.clone());
        id
    }

    pub fn record_heartbeat(&mut self, machine: MachineId, now: DateTime<Utc>) {
        self.last_heartbeat.insert(machine, now);
        self.inactive.remove(&machine);
    }

    /// Recomputes the inactive set: a machine is inactive if
    /// `now - lastHeartbeat > machineExpiry` (spec §4.6).
    pub fn recompute_inactive(&mut self, now: DateTime<Utc>, machine_expiry: Duration) {
        self.inactive = self
            .machines
            .keys()
            .copied()
            .filter(|id| match self.last_heartbeat.get(id) {
                Some(last) => now - *last > machine_expiry,
                None => true,
            })
            .collect();
    }

    pub fn is_active(&self, machine: MachineId) -> bool {
        self.machines.contains_key(&machine) && !self.inactive.contains(&machine)
    }

    /// Marks a machine inactive or active without waiting for the next
    /// `recompute_inactive` pass; used to simulate a "removed from
    /// tracker" test transition (scenario S6).
    pub fn force_inactive(&mut self, machine: MachineId) {
        self.inactive.insert(machine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_machine_is_idempotent() {
        let mut state = ClusterState::new("e1");
        let loc = MachineLocation::from("host-a:1234");
        let id1 = state.register_machine(&loc);
        let id2 = state.register_machine(&loc);
        assert_eq!(id1, id2);
        assert_eq!(state.max_machine_id, 1);
    }

    #[test]
    fn machine_id_allocation_is_monotonic_and_distinct() {
        let mut state = ClusterState::new("e1");
        let a = state.register_machine(&MachineLocation::from("a"));
        let b = state.register_machine(&MachineLocation::from("b"));
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn inactivity_recompute_marks_stale_heartbeats() {
        let mut state = ClusterState::new("e1");
        let id = state.register_machine(&MachineLocation::from("a"));
        let t0 = Utc::now();
        state.record_heartbeat(id, t0);
        assert!(state.is_active(id));

        state.recompute_inactive(t0 + Duration::seconds(100), Duration::seconds(30));
        assert!(!state.is_active(id));
    }
}
