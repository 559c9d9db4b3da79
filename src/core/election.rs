// src/core/election.rs

//! Master election (spec §4.5): a single CAS-guarded lease key in the
//! Global KV. Grounded on `spineldb::core::warden`'s lease-and-monitor
//! shape, simplified to the single authoritative `GlobalKv` CAS lease the
//! spec describes rather than Warden's quorum-of-sentinels gossip — the
//! cluster already has one authoritative GLS, so a second independent
//! quorum system is scope this crate does not need.

use crate::core::LocusError;
use crate::core::global_kv::traits::GlobalKv;
use crate::core::machine::MachineId;
use bincode::config::standard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// This machine's current role. At most one `Master` exists per
/// (epoch, master-lease-interval) cluster-wide, enforced by the lease's
/// CAS discipline (spec invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unassigned,
    Master,
    Worker,
}

impl Role {
    fn to_u8(self) -> u8 {
        match self {
            Role::Unassigned => 0,
            Role::Master => 1,
            Role::Worker => 2,
        }
    }

    fn from_u8(v: u8) -> Role {
        match v {
            1 => Role::Master,
            2 => Role::Worker,
            _ => Role::Unassigned,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lease {
    machine_id: MachineId,
    lease_expiry_utc: DateTime<Utc>,
}

/// Holds the current role as an atomic so readers (e.g. the metrics
/// gauge, the admin API) don't need to await a lock.
#[derive(Debug)]
pub struct RoleElector {
    kv: Arc<dyn GlobalKv>,
    lease_key: String,
    machine_id: MachineId,
    lease_duration: Duration,
    renewal_threshold: Duration,
    current: AtomicU8,
}

impl RoleElector {
    pub fn new(
        kv: Arc<dyn GlobalKv>,
        key_space_prefix: &str,
        epoch: &str,
        machine_id: MachineId,
        lease_duration: Duration,
        renewal_threshold: Duration,
    ) -> Self {
        Self {
            kv,
            lease_key: format!("{key_space_prefix}/masterLease/{epoch}"),
            machine_id,
            lease_duration,
            renewal_threshold,
            current: AtomicU8::new(Role::Unassigned.to_u8()),
        }
    }

    pub fn role(&self) -> Role {
        Role::from_u8(self.current.load(Ordering::SeqCst))
    }

    fn set_role(&self, role: Role) {
        self.current.store(role.to_u8(), Ordering::SeqCst);
        crate::core::metrics::MASTER_ROLE.set(if role == Role::Master { 1.0 } else { 0.0 });
    }

    fn encode(lease: &Lease) -> Result<Vec<u8>, LocusError> {
        bincode::serde::encode_to_vec(lease, standard()).map_err(|e| LocusError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Lease, LocusError> {
        let (lease, _) = bincode::serde::decode_from_slice(bytes, standard())
            .map_err(|e| LocusError::Corrupt(format!("master lease: {e}")))?;
        Ok(lease)
    }

    /// Runs one election step on a heartbeat tick of a master-eligible
    /// machine (spec §4.5, steps 1-4). Every path re-reads the lease after
    /// a CAS attempt rather than assuming success, per §9's election note.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Role, LocusError> {
        let current_bytes = self.kv.get(&self.lease_key).await?;
        let current_lease = current_bytes.as_deref().map(Self::decode).transpose()?;

        match current_lease {
            None => self.try_claim(None, now).await,
            Some(lease) if lease.lease_expiry_utc <= now => {
                self.try_claim(current_bytes.as_deref(), now).await
            }
            Some(lease) if lease.machine_id == self.machine_id => {
                if lease.lease_expiry_utc - now < self.renewal_threshold_chrono() {
                    self.try_renew(current_bytes.as_deref(), now).await
                } else {
                    self.set_role(Role::Master);
                    Ok(Role::Master)
                }
            }
            Some(_owned_by_other) => {
                self.set_role(Role::Worker);
                Ok(Role::Worker)
            }
        }
    }

    fn renewal_threshold_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.renewal_threshold).unwrap_or(chrono::Duration::zero())
    }

    async fn try_claim(&self, expected: Option<&[u8]>, now: DateTime<Utc>) -> Result<Role, LocusError> {
        let new_lease = Lease {
            machine_id: self.machine_id,
            lease_expiry_utc: now + chrono::Duration::from_std(self.lease_duration).unwrap_or(chrono::Duration::zero()),
        };
        let encoded = Self::encode(&new_lease)?;
        let swapped = self.kv.compare_and_set(&self.lease_key, expected, encoded).await?;
        if swapped {
            self.set_role(Role::Master);
            Ok(Role::Master)
        } else {
            // Someone else won the race; every path re-checks rather than
            // assuming its own claim succeeded (spec §9).
            self.set_role(Role::Worker);
            Ok(Role::Worker)
        }
    }

    async fn try_renew(&self, expected: Option<&[u8]>, now: DateTime<Utc>) -> Result<Role, LocusError> {
        let renewed = self.try_claim(expected, now).await?;
        if renewed != Role::Master {
            return Err(LocusError::RoleConflict);
        }
        Ok(Role::Master)
    }

    /// Best-effort release of a self-owned lease on shutdown.
    pub async fn release_role_if_necessary(&self) -> Result<(), LocusError> {
        if self.role() != Role::Master {
            return Ok(());
        }
        if let Some(bytes) = self.kv.get(&self.lease_key).await? {
            let lease = Self::decode(&bytes)?;
            if lease.machine_id == self.machine_id {
                self.kv.delete(&self.lease_key).await?;
            }
        }
        self.set_role(Role::Unassigned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::global_kv::memory::InMemoryKv;

    fn elector(kv: Arc<InMemoryKv>, id: u32) -> RoleElector {
        RoleElector::new(
            kv,
            "locusd",
            "e1",
            MachineId(id),
            Duration::from_secs(30),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn first_claimant_becomes_master() {
        let kv = InMemoryKv::new();
        let a = elector(kv.clone(), 1);
        assert_eq!(a.tick(Utc::now()).await.unwrap(), Role::Master);
    }

    #[tokio::test]
    async fn second_machine_becomes_worker() {
        let kv = InMemoryKv::new();
        let a = elector(kv.clone(), 1);
        let b = elector(kv.clone(), 2);
        assert_eq!(a.tick(Utc::now()).await.unwrap(), Role::Master);
        assert_eq!(b.tick(Utc::now()).await.unwrap(), Role::Worker);
    }

    #[tokio::test]
    async fn lease_handoff_after_expiry_scenario_s4() {
        let kv = InMemoryKv::new();
        let a = elector(kv.clone(), 1);
        let b = elector(kv.clone(), 2);
        let t0 = Utc::now();
        assert_eq!(a.tick(t0).await.unwrap(), Role::Master);
        assert_eq!(b.tick(t0).await.unwrap(), Role::Worker);

        let past_expiry = t0 + chrono::Duration::seconds(31);
        assert_eq!(b.tick(past_expiry).await.unwrap(), Role::Master);
        assert_eq!(a.tick(past_expiry).await.unwrap(), Role::Worker);
    }

    #[tokio::test]
    async fn master_renews_before_expiry() {
        let kv = InMemoryKv::new();
        let a = elector(kv.clone(), 1);
        let t0 = Utc::now();
        assert_eq!(a.tick(t0).await.unwrap(), Role::Master);
        let near_expiry = t0 + chrono::Duration::seconds(21);
        assert_eq!(a.tick(near_expiry).await.unwrap(), Role::Master);
    }

    #[tokio::test]
    async fn release_clears_self_owned_lease() {
        let kv = InMemoryKv::new();
        let a = elector(kv.clone(), 1);
        a.tick(Utc::now()).await.unwrap();
        a.release_role_if_necessary().await.unwrap();
        assert!(kv.get("locusd/masterLease/e1").await.unwrap().is_none());
    }
}
