// src/core/global_kv/store.rs

//! `GlobalLocationStore` (GLS): the domain-level API over a `RaidedGlobalKv`,
//! implementing the shared-state operations named in spec §4.2 —
//! `registerMachine`, `registerLocation`, `getBulk`, `trimBulk`, and cluster
//! state mirroring. Key layout follows spec §6.

use crate::core::LocusError;
use crate::core::cluster::state::ClusterState;
use crate::core::global_kv::traits::GlobalKv;
use crate::core::hash::ShortHash;
use crate::core::location::entry::{ContentLocationEntry, UNKNOWN_SIZE};
use crate::core::machine::{MachineId, MachineLocation};
use bincode::config::standard;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Bounded retry count for the optimistic compare-and-set loops below. A
/// real deployment contends on these keys rarely enough that hitting the
/// limit indicates a stuck peer rather than ordinary contention.
const MAX_CAS_ATTEMPTS: usize = 16;

pub struct GlobalLocationStore {
    kv: Arc<dyn GlobalKv>,
    epoch: String,
}

impl GlobalLocationStore {
    pub fn new(kv: Arc<dyn GlobalKv>, epoch: impl Into<String>) -> Self {
        Self { kv, epoch: epoch.into() }
    }

    fn location_key(&self, hash: ShortHash) -> String {
        format!("loc/{}/{}", self.epoch, hash.to_hex())
    }

    fn machine_location_key(&self, location: &MachineLocation) -> String {
        format!("machineLoc/{}/{}", self.epoch, location)
    }

    fn max_machine_id_key(&self) -> String {
        format!("maxMachineId/{}", self.epoch)
    }

    fn cluster_state_key(&self) -> String {
        format!("clusterState/v{}", self.epoch)
    }

    fn encode_entry(entry: &ContentLocationEntry) -> Result<Vec<u8>, LocusError> {
        bincode::serde::encode_to_vec(entry, standard())
            .map_err(|e| LocusError::Serialization(e.to_string()))
    }

    fn decode_entry(bytes: &[u8]) -> Result<ContentLocationEntry, LocusError> {
        let (entry, _) = bincode::serde::decode_from_slice(bytes, standard())
            .map_err(|e| LocusError::Corrupt(format!("location entry: {e}")))?;
        Ok(entry)
    }

    /// `registerMachine(location) -> machineId`. Idempotent: a location that
    /// already has an id gets that id back without consuming a fresh one.
    /// New ids are allocated via a CAS loop against a shared counter key,
    /// racing any other machine registering concurrently.
    pub async fn register_machine(&self, location: &MachineLocation) -> Result<MachineId, LocusError> {
        let loc_key = self.machine_location_key(location);
        if let Some(bytes) = self.kv.get(&loc_key).await? {
            return Ok(MachineId(u32::from_le_bytes(
                bytes.try_into().map_err(|_| LocusError::Corrupt("machine id record".into()))?,
            )));
        }

        let counter_key = self.max_machine_id_key();
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.kv.get(&counter_key).await?;
            let current_id = match &current {
                Some(bytes) => u32::from_le_bytes(
                    bytes.as_slice().try_into().map_err(|_| LocusError::Corrupt("max machine id".into()))?,
                ),
                None => 0,
            };
            let next_id = current_id + 1;
            let swapped = self
                .kv
                .compare_and_set(&counter_key, current.as_deref(), next_id.to_le_bytes().to_vec())
                .await?;
            if !swapped {
                continue;
            }

            // We own `next_id` now. Bind it to the location; if someone else
            // raced us to the binding, adopt their id instead of ours.
            let bound = self
                .kv
                .set_if_not_exists(&loc_key, next_id.to_le_bytes().to_vec())
                .await?;
            if bound {
                return Ok(MachineId(next_id));
            }
            if let Some(bytes) = self.kv.get(&loc_key).await? {
                return Ok(MachineId(u32::from_le_bytes(
                    bytes.try_into().map_err(|_| LocusError::Corrupt("machine id record".into()))?,
                )));
            }
        }
        Err(LocusError::Transient("register_machine: CAS retry budget exhausted".into()))
    }

    /// `registerLocation(machineId, hash, size)`: merges a location add into
    /// the Global KV's copy of the entry, under the same larger-size-wins
    /// discipline as `LocationDB::locationAdded`.
    pub async fn register_location(
        &self,
        machine: MachineId,
        hash: ShortHash,
        size: i64,
        now: DateTime<Utc>,
    ) -> Result<ContentLocationEntry, LocusError> {
        let key = self.location_key(hash);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.kv.get(&key).await?;
            let mut entry = match &current {
                Some(bytes) => Self::decode_entry(bytes)?,
                None => ContentLocationEntry::new_with_machine(machine, UNKNOWN_SIZE, now),
            };
            if current.is_some() {
                entry.merge_add(machine, size, now);
            }
            let encoded = Self::encode_entry(&entry)?;
            let swapped = self.kv.compare_and_set(&key, current.as_deref(), encoded).await?;
            if swapped {
                return Ok(entry);
            }
        }
        Err(LocusError::Transient("register_location: CAS retry budget exhausted".into()))
    }

    /// `getBulk([hash]) -> [entry?]`. Inactive-machine masking is deliberately
    /// NOT applied here; it's a concern of the composing location service,
    /// which knows the current `ClusterState` (spec §4.6).
    pub async fn get_bulk(&self, hashes: &[ShortHash]) -> Result<Vec<Option<ContentLocationEntry>>, LocusError> {
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let bytes = self.kv.get(&self.location_key(*hash)).await?;
            out.push(bytes.map(|b| Self::decode_entry(&b)).transpose()?);
        }
        Ok(out)
    }

    /// `trimBulk(machineId, [hash])`: clears this machine's bit from each
    /// entry. The entry is left in place (possibly with an empty bitset) for
    /// `LocationDB`'s own GC pass to reconcile; the Global KV never runs GC
    /// itself.
    pub async fn trim_bulk(&self, machine: MachineId, hashes: &[ShortHash]) -> Result<(), LocusError> {
        for hash in hashes {
            let key = self.location_key(*hash);
            for _ in 0..MAX_CAS_ATTEMPTS {
                let current = match self.kv.get(&key).await? {
                    Some(bytes) => bytes,
                    None => break,
                };
                let mut entry = Self::decode_entry(&current)?;
                entry.remove_machine(machine);
                let encoded = Self::encode_entry(&entry)?;
                if self.kv.compare_and_set(&key, Some(&current), encoded).await? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Mirrors the authoritative cluster state into the Global KV so a
    /// newly-elected master, or a machine recovering from a restart, can
    /// recover it without waiting on a checkpoint restore.
    pub async fn update_cluster_state(&self, state: &ClusterState) -> Result<(), LocusError> {
        let bytes = bincode::serde::encode_to_vec(state, standard())
            .map_err(|e| LocusError::Serialization(e.to_string()))?;
        self.kv.set(&self.cluster_state_key(), bytes).await
    }

    pub async fn read_cluster_state(&self) -> Result<Option<ClusterState>, LocusError> {
        match self.kv.get(&self.cluster_state_key()).await? {
            Some(bytes) => {
                let (state, _) = bincode::serde::decode_from_slice(&bytes, standard())
                    .map_err(|e| LocusError::Corrupt(format!("cluster state: {e}")))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::global_kv::memory::InMemoryKv;
    use crate::core::hash::{ContentHash, HashType};

    fn short(byte: u8) -> ShortHash {
        ContentHash::new(HashType::Vso0, [byte; 32]).to_short()
    }

    fn store() -> GlobalLocationStore {
        GlobalLocationStore::new(InMemoryKv::new(), "e1")
    }

    #[tokio::test]
    async fn register_machine_allocates_monotonic_ids() {
        let gls = store();
        let a = gls.register_machine(&MachineLocation::from("host-a")).await.unwrap();
        let b = gls.register_machine(&MachineLocation::from("host-b")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn register_machine_is_idempotent() {
        let gls = store();
        let loc = MachineLocation::from("host-a");
        let a = gls.register_machine(&loc).await.unwrap();
        let b = gls.register_machine(&loc).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn register_location_merges_and_keeps_larger_size() {
        let gls = store();
        let h = short(1);
        gls.register_location(MachineId(1), h, 100, Utc::now()).await.unwrap();
        let entry = gls.register_location(MachineId(2), h, 40, Utc::now()).await.unwrap();
        assert_eq!(entry.size, 100);
        assert!(entry.machines.contains(MachineId(1)));
        assert!(entry.machines.contains(MachineId(2)));
    }

    #[tokio::test]
    async fn trim_bulk_clears_the_requested_machine_only() {
        let gls = store();
        let h = short(2);
        gls.register_location(MachineId(1), h, 10, Utc::now()).await.unwrap();
        gls.register_location(MachineId(2), h, 10, Utc::now()).await.unwrap();
        gls.trim_bulk(MachineId(1), &[h]).await.unwrap();
        let entries = gls.get_bulk(&[h]).await.unwrap();
        let entry = entries[0].as_ref().unwrap();
        assert!(!entry.machines.contains(MachineId(1)));
        assert!(entry.machines.contains(MachineId(2)));
    }

    #[tokio::test]
    async fn get_bulk_returns_none_for_unknown_hash() {
        let gls = store();
        let entries = gls.get_bulk(&[short(9)]).await.unwrap();
        assert!(entries[0].is_none());
    }

    #[tokio::test]
    async fn cluster_state_round_trips() {
        let gls = store();
        let mut state = ClusterState::new("e1");
        state.register_machine(&MachineLocation::from("a"));
        gls.update_cluster_state(&state).await.unwrap();
        let read_back = gls.read_cluster_state().await.unwrap().unwrap();
        assert_eq!(read_back.max_machine_id, 1);
    }
}
