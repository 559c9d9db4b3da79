// src/core/state.rs

//! `ServerState`: the composition root tying every engine together into
//! the operations a running machine actually performs — local put/remove,
//! bulk lookup, pin, and the periodic heartbeat. Grounded on
//! `spineldb::core::state::ServerState`, which plays the same role for the
//! teacher: one struct holding every shared collaborator, constructed once
//! at startup and handed to both the connection loop and the background
//! tasks.

use crate::config::Config;
use crate::core::LocusError;
use crate::core::blob_store::{BlobStore, InMemoryBlobStore};
use crate::core::checkpoint::{CheckpointConsumer, CheckpointManifest, CheckpointProducer};
use crate::core::clock::{Clock, SystemClock};
use crate::core::cluster::state::ClusterState;
use crate::core::election::{Role, RoleElector};
use crate::core::event_store::hub::{EventHub, InMemoryEventHub};
use crate::core::event_store::types::{EventBatch, EventKind};
use crate::core::global_kv::memory::InMemoryKv;
use crate::core::global_kv::raided::RaidedGlobalKv;
use crate::core::global_kv::store::GlobalLocationStore;
use crate::core::global_kv::traits::GlobalKv;
use crate::core::hash::{ContentHash, ShortHash};
use crate::core::location::db::LocationDB;
use crate::core::location::entry::ContentLocationEntry;
use crate::core::machine::{MachineId, MachineLocation};
use crate::core::proactive_copy::{CopyTrigger, ProactiveCopyEngine};
use crate::core::reconciliation::{BlobStoreContentEnumerator, LocalContentEnumerator, ReconciliationEngine};
use crate::core::transport::{CentralStore, FileTransport, InMemoryCentralStore, InMemoryFileTransport};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

fn chrono_duration(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::zero())
}

/// Which backing view a `get_bulk` call should answer from (spec §5's
/// ordering guarantees: local reflects every applied event; global
/// reflects the Global KV at observation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOrigin {
    Local,
    Global,
}

pub struct ServerState {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub machine_id: MachineId,
    pub machine_location: MachineLocation,

    pub location_db: Arc<LocationDB>,
    pub blob_store: Arc<dyn BlobStore>,
    pub global_kv: Arc<dyn GlobalKv>,
    pub gls: GlobalLocationStore,
    pub event_hub: Arc<dyn EventHub>,
    pub central_store: Arc<dyn CentralStore>,
    pub file_transport: Arc<dyn FileTransport>,

    pub cluster_state: RwLock<ClusterState>,
    pub elector: RoleElector,
    pub reconciliation: ReconciliationEngine,
    pub content_enumerator: Arc<dyn LocalContentEnumerator>,
    pub checkpoint_producer: CheckpointProducer,
    pub checkpoint_consumer: CheckpointConsumer,
    pub proactive_copy: ProactiveCopyEngine,

    /// Positive-answer cache for `pin`, keyed by when it was populated;
    /// entries older than `content_hash_bump_time` are treated as a miss
    /// and force a fresh Global KV lookup.
    pin_cache: DashMap<ShortHash, DateTime<Utc>>,
    last_local_add: DashMap<ShortHash, DateTime<Utc>>,
    last_local_remove: DashMap<ShortHash, DateTime<Utc>>,
    last_local_touch: DashMap<ShortHash, DateTime<Utc>>,
    last_marked_inactive_self: Mutex<Option<DateTime<Utc>>>,
    sequence_counter: AtomicU64,
    checkpoint_sequence: AtomicU64,
    last_checkpoint_created: Mutex<Option<DateTime<Utc>>>,
    last_checkpoint_restored: Mutex<Option<DateTime<Utc>>>,
    last_cluster_state_mirror: Mutex<Option<DateTime<Utc>>>,
    last_inactive_recompute: Mutex<Option<DateTime<Utc>>>,
    last_reconciliation_run: Mutex<Option<DateTime<Utc>>>,
}

impl ServerState {
    /// Builds a fully-wired `ServerState` using the in-memory reference
    /// implementations for every out-of-scope collaborator (spec §1 names
    /// them external; this crate's demo binary and tests run single-process
    /// against these rather than a real disk/Redis/RPC stack).
    pub async fn initialize(config: Config) -> Result<Arc<Self>, LocusError> {
        Self::initialize_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn initialize_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Arc<Self>, LocusError> {
        let config = Arc::new(config);
        let now = clock.now_utc();

        let location_db = Arc::new(LocationDB::open(&config.data_dir, config.write_cache_size_threshold).await?);
        let blob_store: Arc<dyn BlobStore> = InMemoryBlobStore::new();
        let global_kv: Arc<dyn GlobalKv> = Arc::new(RaidedGlobalKv::single(InMemoryKv::new()));
        let gls = GlobalLocationStore::new(global_kv.clone(), config.event_hub_epoch.clone());
        let event_hub: Arc<dyn EventHub> = Arc::new(InMemoryEventHub::new(config.event_hub_epoch.clone()));
        let central_store: Arc<dyn CentralStore> = InMemoryCentralStore::new();
        let file_transport: Arc<dyn FileTransport> = InMemoryFileTransport::new();

        let machine_location = MachineLocation::from(config.machine_location.clone());
        let machine_id = gls.register_machine(&machine_location).await?;

        let mut cluster_state = ClusterState::new(config.event_hub_epoch.clone());
        cluster_state.register_machine(&machine_location);
        cluster_state.record_heartbeat(machine_id, now);

        let elector = RoleElector::new(
            global_kv.clone(),
            &config.key_space_prefix,
            &config.event_hub_epoch,
            machine_id,
            config.master_lease_expiry_time,
            config.master_lease_renewal_threshold,
        );
        let reconciliation = ReconciliationEngine::new(
            config.reconciliation_max_cycle_size,
            chrono_duration(config.location_entry_expiry),
        );
        let content_enumerator: Arc<dyn LocalContentEnumerator> = Arc::new(BlobStoreContentEnumerator::new(blob_store.clone()));
        let checkpoint_producer = CheckpointProducer::new(central_store.clone(), config.event_hub_epoch.clone());
        let checkpoint_consumer = CheckpointConsumer::new(central_store.clone(), file_transport.clone(), config.event_hub_epoch.clone());
        let proactive_copy = ProactiveCopyEngine::new(
            file_transport.clone(),
            config.proactive_copy_concurrency,
            config.proactive_copy_use_preferred_locations,
            config.proactive_copy_reject_old_content,
            config.push_proactive_copies,
            machine_id,
            machine_location.clone(),
        );

        Ok(Arc::new(Self {
            config,
            clock,
            machine_id,
            machine_location,
            location_db,
            blob_store,
            global_kv,
            gls,
            event_hub,
            central_store,
            file_transport,
            cluster_state: RwLock::new(cluster_state),
            elector,
            reconciliation,
            content_enumerator,
            checkpoint_producer,
            checkpoint_consumer,
            proactive_copy,
            pin_cache: DashMap::new(),
            last_local_add: DashMap::new(),
            last_local_remove: DashMap::new(),
            last_local_touch: DashMap::new(),
            last_marked_inactive_self: Mutex::new(None),
            sequence_counter: AtomicU64::new(0),
            checkpoint_sequence: AtomicU64::new(0),
            last_checkpoint_created: Mutex::new(None),
            last_checkpoint_restored: Mutex::new(None),
            last_cluster_state_mirror: Mutex::new(None),
            last_inactive_recompute: Mutex::new(None),
            last_reconciliation_run: Mutex::new(None),
        }))
    }

    fn next_sequence(&self) -> u64 {
        self.sequence_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publishes `kind`, splitting it into several batches first if its
    /// `approximate_len()` exceeds the configured `hub_max_message_size`
    /// (spec §3's "serialized <= hub max-message-size" invariant). Each
    /// split batch gets its own sequence number but the same epoch and
    /// machine, so a consumer simply sees more, smaller batches in order.
    async fn publish_event(&self, kind: EventKind) -> Result<(), LocusError> {
        for part in kind.split(self.config.hub_max_message_size) {
            let batch = EventBatch {
                epoch: self.config.event_hub_epoch.clone(),
                machine: self.machine_id,
                sequence_number: self.next_sequence(),
                kind: part,
            };
            self.event_hub.publish(&self.config.event_hub_epoch, batch).await?;
        }
        Ok(())
    }

    /// Writes the content locally and runs it through the publish
    /// discipline. `hash` is a full `ContentHash`; the location plane keys
    /// everything downstream by its `ShortHash` projection.
    pub async fn put_local(&self, hash: ContentHash, bytes: Bytes) -> Result<(), LocusError> {
        let now = self.clock.now_utc();
        self.blob_store.put_file(hash, bytes.clone(), now).await?;
        self.record_local_add(hash.to_short(), bytes.len() as i64, now).await?;
        if self.config.enable_proactive_copy && self.config.proactive_copy_on_put {
            self.trigger_proactive_copy(hash, bytes, CopyTrigger::OnPut).await?;
        }
        Ok(())
    }

    /// Implements the five-rule publish discipline of spec §4.3 for a
    /// local add of `hash`.
    pub async fn record_local_add(&self, hash: ShortHash, size: i64, now: DateTime<Utc>) -> Result<(), LocusError> {
        self.location_db.location_added(hash, self.machine_id, size, now).await;
        let window = chrono_duration(self.config.machine_location_update_window);

        let recent_remove = self.last_local_remove.get(&hash).is_some_and(|t| now - *t < window);
        let recently_inactive = self
            .last_marked_inactive_self
            .lock()
            .await
            .is_some_and(|t| now - t < window);

        if recent_remove {
            crate::core::metrics::LOCATION_ADD_RECENT_REMOVE_EAGER.inc();
            return self.publish_add_eagerly(hash, size, now).await;
        }
        if recently_inactive {
            crate::core::metrics::LOCATION_ADD_RECENT_INACTIVE_EAGER.inc();
            return self.publish_add_eagerly(hash, size, now).await;
        }

        let recent_add = self.last_local_add.get(&hash).is_some_and(|t| now - *t < window);
        if recent_add {
            crate::core::metrics::REDUNDANT_RECENT_LOCATION_ADD_SKIPPED.inc();
            let touch_frequency = chrono_duration(self.config.touch_frequency);
            let recent_touch = self.last_local_touch.get(&hash).is_some_and(|t| now - *t < touch_frequency);
            if !recent_touch {
                self.publish_event(EventKind::TouchContentLocation { hashes: vec![hash] }).await?;
                self.last_local_touch.insert(hash, now);
                crate::core::metrics::LAZY_TOUCH_EVENT_ONLY.inc();
            }
            return Ok(());
        }

        let replica_count = self.location_db.try_get(hash).await.map(|e| e.machines.len()).unwrap_or(1);
        if replica_count > self.config.safe_to_lazily_update_machine_count_threshold {
            crate::core::metrics::LOCATION_ADD_QUEUED.inc();
            self.publish_event(EventKind::AddContentLocation { hashes: vec![(hash, size)] }).await?;
            self.last_local_add.insert(hash, now);
            return Ok(());
        }

        crate::core::metrics::LOCATION_ADD_EAGER.inc();
        self.publish_add_eagerly(hash, size, now).await
    }

    async fn publish_add_eagerly(&self, hash: ShortHash, size: i64, now: DateTime<Utc>) -> Result<(), LocusError> {
        self.gls.register_location(self.machine_id, hash, size, now).await?;
        crate::core::metrics::REGISTER_LOCAL_LOCATION.inc();
        self.publish_event(EventKind::AddContentLocation { hashes: vec![(hash, size)] }).await?;
        self.last_local_add.insert(hash, now);
        Ok(())
    }

    pub async fn record_local_remove(&self, hash: ShortHash) -> Result<(), LocusError> {
        let now = self.clock.now_utc();
        self.location_db.location_removed(hash, self.machine_id).await;
        self.gls.trim_bulk(self.machine_id, &[hash]).await?;
        self.publish_event(EventKind::RemoveContentLocation { hashes: vec![hash] }).await?;
        self.last_local_remove.insert(hash, now);
        self.last_local_add.remove(&hash);
        Ok(())
    }

    pub async fn touch(&self, hash: ShortHash) -> Result<(), LocusError> {
        let now = self.clock.now_utc();
        self.location_db.touch(hash, now).await;
        self.last_local_touch.insert(hash, now);
        Ok(())
    }

    /// `GetBulk`: local origin reflects every locally-applied event; global
    /// origin reflects the Global KV at observation time. Both mask out
    /// inactive machines (spec §4.6).
    pub async fn get_bulk(&self, hashes: &[ShortHash], origin: LookupOrigin) -> Result<Vec<Option<ContentLocationEntry>>, LocusError> {
        let cluster = self.cluster_state.read().await;
        let raw: Vec<Option<ContentLocationEntry>> = match origin {
            LookupOrigin::Local => {
                let mut out = Vec::with_capacity(hashes.len());
                for hash in hashes {
                    out.push(self.location_db.try_get(*hash).await);
                }
                out
            }
            LookupOrigin::Global => self.gls.get_bulk(hashes).await?,
        };
        Ok(raw
            .into_iter()
            .map(|entry| {
                entry.map(|mut e| {
                    e.machines = e.machines.masking_inactive(|m| cluster.is_active(m));
                    e
                })
            })
            .collect())
    }

    /// Checks whether `hash` currently has any live replica, answering from
    /// a short-lived positive cache before falling back to a fresh Global
    /// KV lookup (scenario S1: a cache hit survives a remote trim for up to
    /// `content_hash_bump_time`, after which the next pin re-queries and
    /// can observe the removal).
    pub async fn pin(&self, hash: ContentHash) -> Result<bool, LocusError> {
        let now = self.clock.now_utc();
        let ttl = chrono_duration(self.config.content_hash_bump_time);
        let short = hash.to_short();

        if let Some(cached_at) = self.pin_cache.get(&short).map(|v| *v) {
            if now - cached_at <= ttl {
                return Ok(true);
            }
        }

        let entries = self.get_bulk(&[short], LookupOrigin::Global).await?;
        let found = entries[0].as_ref().is_some_and(|e| !e.machines.is_empty());
        if found {
            self.pin_cache.insert(short, now);
            self.blob_store.pin(hash).await.ok();
            if self.config.enable_proactive_copy && self.config.proactive_copy_on_pin {
                if let Ok(bytes) = self.blob_store.open_stream(hash).await {
                    self.trigger_proactive_copy(hash, bytes, CopyTrigger::OnPin).await?;
                }
            }
        } else {
            self.pin_cache.remove(&short);
        }
        Ok(found)
    }

    async fn trigger_proactive_copy(&self, hash: ContentHash, bytes: Bytes, trigger: CopyTrigger) -> Result<(), LocusError> {
        let now = self.clock.now_utc();
        let short = hash.to_short();
        let existing = self.location_db.try_get(short).await.map(|e| e.machines).unwrap_or_default();

        let cluster = self.cluster_state.read().await;
        let candidates: Vec<_> = cluster
            .machines
            .iter()
            .filter(|(id, _)| **id != self.machine_id)
            .map(|(id, loc)| (*id, loc.clone(), now, 1usize))
            .collect();
        let count = match trigger {
            CopyTrigger::Background => self.config.proactive_copy_batch_size,
            _ => 1,
        };
        let targets = self.proactive_copy.select_targets(candidates, &existing, |id| cluster.is_active(id), count, now);
        drop(cluster);

        let jobs = targets.into_iter().map(|t| (t, hash, bytes.clone(), now, None)).collect();
        let _ = self.proactive_copy.push_batch(jobs).await;
        Ok(())
    }

    /// Runs one full heartbeat cycle: cluster-state refresh, role election,
    /// checkpoint create/restore, cluster-state mirroring, garbage
    /// collection, and reconciliation (spec §2's "periodic heartbeats
    /// drive role election, cluster-state refresh, checkpoint creation
    /// (master) and restore (worker), and inactivity GC").
    pub async fn heartbeat(&self) -> Result<(), LocusError> {
        let timer = crate::core::metrics::HEARTBEAT_LATENCY_SECONDS.start_timer();
        let now = self.clock.now_utc();

        {
            let mut recompute_due_guard = self.last_inactive_recompute.lock().await;
            let recompute_due = recompute_due_guard
                .is_none_or(|t| now - t >= chrono_duration(self.config.recompute_inactive_machines_expiry));

            let mut cluster = self.cluster_state.write().await;
            cluster.record_heartbeat(self.machine_id, now);
            // Recomputing the inactive set is an O(machines) scan; spec §6
            // names `RecomputeInactiveMachinesExpiry` as a distinct cadence
            // from the heartbeat itself so a large cluster doesn't re-scan
            // every machine on every tick.
            if recompute_due {
                cluster.recompute_inactive(now, chrono_duration(self.config.machine_expiry));
                *recompute_due_guard = Some(now);
            }
            if cluster.inactive.contains(&self.machine_id) {
                *self.last_marked_inactive_self.lock().await = Some(now);
            }
        }

        let role = if self.config.is_master_eligible {
            self.elector.tick(now).await?
        } else {
            Role::Worker
        };

        if self.config.store_cluster_state_in_database {
            let snapshot = self.cluster_state.read().await.clone();
            self.location_db.update_cluster_state(Some(&snapshot), true).await?;
        }

        let mut last_mirror = self.last_cluster_state_mirror.lock().await;
        let mirror_due = last_mirror.is_none_or(|t| now - t >= chrono_duration(self.config.cluster_state_mirror_interval));
        if mirror_due {
            let snapshot = self.cluster_state.read().await.clone();
            self.gls.update_cluster_state(&snapshot).await?;
            *last_mirror = Some(now);
        }
        drop(last_mirror);

        match role {
            Role::Master => self.run_master_checkpoint_cycle(now).await?,
            _ => self.run_worker_restore_cycle(now).await?,
        }

        if !self.config.unsafe_disable_reconciliation {
            let mut last_reconciliation = self.last_reconciliation_run.lock().await;
            let reconciliation_due = last_reconciliation
                .is_none_or(|t| now - t >= chrono_duration(self.config.reconciliation_cycle_frequency));
            if reconciliation_due {
                self.run_reconciliation_cycle(now, false).await?;
                *last_reconciliation = Some(now);
            }
        }

        let is_active = {
            let cluster = self.cluster_state.read().await;
            move |m: MachineId| cluster.is_active(m)
        };
        self.location_db.garbage_collect(is_active).await?;

        if self.config.enable_proactive_replication {
            self.run_background_proactive_copy_cycle(now).await?;
        }

        timer.observe_duration();
        Ok(())
    }

    async fn run_master_checkpoint_cycle(&self, now: DateTime<Utc>) -> Result<(), LocusError> {
        let mut last_created = self.last_checkpoint_created.lock().await;
        let due = last_created.is_none_or(|t| now - t >= chrono_duration(self.config.create_checkpoint_interval));
        if !due {
            return Ok(());
        }
        let sequence_number = self.checkpoint_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.checkpoint_producer.produce(&self.location_db, sequence_number, now).await?;
        *last_created = Some(now);
        Ok(())
    }

    async fn run_worker_restore_cycle(&self, now: DateTime<Utc>) -> Result<(), LocusError> {
        let mut last_restored = self.last_checkpoint_restored.lock().await;
        let peers: Vec<MachineLocation> = {
            let cluster = self.cluster_state.read().await;
            cluster.machines.values().filter(|loc| **loc != self.machine_location).cloned().collect()
        };
        let manifest: Option<CheckpointManifest> = self
            .checkpoint_consumer
            .restore(&self.location_db, &peers, chrono_duration(self.config.restore_checkpoint_age_threshold), *last_restored, now)
            .await?;
        if manifest.is_some() {
            *last_restored = Some(now);
        }
        Ok(())
    }

    async fn run_reconciliation_cycle(&self, now: DateTime<Utc>, force: bool) -> Result<(), LocusError> {
        if !force && self.config.allow_skip_reconciliation && self.reconciliation.is_up_to_date(now) {
            return Ok(());
        }
        let indexed: Vec<ShortHash> = self
            .location_db
            .scan_all()
            .into_iter()
            .filter(|(_, e)| e.machines.contains(self.machine_id))
            .map(|(h, _)| h)
            .collect();

        if let Some(outcome) = self
            .reconciliation
            .run_cycle(self.content_enumerator.as_ref(), &indexed, now, force)
            .await?
        {
            if !outcome.adds.is_empty() || !outcome.removes.is_empty() {
                self.publish_event(EventKind::Reconcile {
                    adds: outcome.adds.into_iter().map(|h| (h, crate::core::location::entry::UNKNOWN_SIZE)).collect(),
                    removes: outcome.removes,
                })
                .await?;
            }
        }
        Ok(())
    }

    /// Spec §4.9 trigger (c): each heartbeat, picks a batch of local hashes
    /// whose replica count is below `under_replicated_threshold` and
    /// proactively copies them out, independent of the on-put/on-pin
    /// triggers gated by `enable_proactive_copy`.
    async fn run_background_proactive_copy_cycle(&self, now: DateTime<Utc>) -> Result<(), LocusError> {
        let local_hashes = self.blob_store.enumerate_local_hashes().await?;
        let mut candidates: Vec<(ContentHash, ContentLocationEntry)> = Vec::new();
        for hash in local_hashes {
            if let Some(entry) = self.location_db.try_get(hash.to_short()).await {
                if entry.machines.contains(self.machine_id) && entry.machines.len() < self.config.under_replicated_threshold {
                    candidates.push((hash, entry));
                }
            }
        }
        // Least-replicated, oldest-touched first: these are the entries
        // furthest from their desired replication factor.
        candidates.sort_by(|a, b| a.1.machines.len().cmp(&b.1.machines.len()).then_with(|| a.1.last_access_time_utc.cmp(&b.1.last_access_time_utc)));
        candidates.truncate(self.config.proactive_copy_batch_size);

        let cluster = self.cluster_state.read().await;
        let peer_candidates: Vec<_> = cluster
            .machines
            .iter()
            .filter(|(id, _)| **id != self.machine_id)
            .map(|(id, loc)| (*id, loc.clone(), now, 1usize))
            .collect();

        let mut jobs = Vec::new();
        for (hash, entry) in candidates {
            let targets = self.proactive_copy.select_targets(
                peer_candidates.clone(),
                &entry.machines,
                |id| cluster.is_active(id),
                1,
                now,
            );
            let Some(target) = targets.into_iter().next() else { continue };
            if let Ok(bytes) = self.blob_store.open_stream(hash).await {
                jobs.push((target, hash, bytes, entry.last_access_time_utc, None));
            }
        }
        drop(cluster);

        if !jobs.is_empty() {
            self.proactive_copy.push_batch(jobs).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::HashType;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::new(HashType::Vso0, [byte; 32])
    }

    async fn state_with_clock(clock: Arc<crate::core::clock::TestClock>) -> (tempfile::TempDir, Arc<ServerState>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_string_lossy().to_string();
        config.machine_location = "m1".into();
        let state = ServerState::initialize_with_clock(config, clock).await.unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn put_local_is_visible_from_local_origin() {
        let clock = crate::core::clock::TestClock::new(Utc::now());
        let (_dir, state) = state_with_clock(clock).await;
        state.put_local(hash(1), Bytes::from_static(b"x")).await.unwrap();
        let entries = state.get_bulk(&[hash(1).to_short()], LookupOrigin::Local).await.unwrap();
        assert!(entries[0].as_ref().unwrap().machines.contains(state.machine_id));
    }

    #[tokio::test]
    async fn redundant_add_within_window_is_suppressed() {
        let clock = crate::core::clock::TestClock::new(Utc::now());
        let (_dir, state) = state_with_clock(clock.clone()).await;
        let short = hash(1).to_short();
        state.record_local_add(short, 10, clock.now_utc()).await.unwrap();
        let before = state.event_hub.last_known_cursor(&state.config.event_hub_epoch).await.unwrap();
        clock.advance(Duration::seconds(1));
        state.record_local_add(short, 10, clock.now_utc()).await.unwrap();
        let after = state.event_hub.last_known_cursor(&state.config.event_hub_epoch).await.unwrap();
        // Redundant add is suppressed; no touch event either since last
        // touch was never set and touch_frequency hasn't elapsed... a lazy
        // touch is emitted since there was no prior touch recorded.
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn pin_cache_survives_a_trim_until_ttl_then_observes_removal_scenario_s1() {
        let clock = crate::core::clock::TestClock::new(Utc::now());
        let (_dir, state) = state_with_clock(clock.clone()).await;
        let ttl = state.config.content_hash_bump_time;

        state.put_local(hash(1), Bytes::from_static(b"x")).await.unwrap();
        assert!(state.pin(hash(1)).await.unwrap());

        // Remote trim removes the only replica from the Global KV directly.
        state.gls.trim_bulk(state.machine_id, &[hash(1).to_short()]).await.unwrap();

        clock.advance(Duration::from_std(ttl).unwrap().checked_mul(99).unwrap() / 100);
        assert!(state.pin(hash(1)).await.unwrap(), "cache hit inside TTL should still report pinned");

        clock.advance(Duration::from_std(ttl).unwrap().checked_mul(2).unwrap() / 100 + Duration::seconds(1));
        assert!(!state.pin(hash(1)).await.unwrap(), "cache expiry should force a fresh lookup that observes the trim");
    }

    #[tokio::test]
    async fn master_heartbeat_produces_a_checkpoint() {
        let clock = crate::core::clock::TestClock::new(Utc::now());
        let (_dir, state) = state_with_clock(clock.clone()).await;
        state.put_local(hash(1), Bytes::from_static(b"x")).await.unwrap();
        state.heartbeat().await.unwrap();
        assert_eq!(state.elector.role(), Role::Master);
        assert!(state.central_store.try_get_file("manifest/e1/latest").await.is_ok());
    }
}
