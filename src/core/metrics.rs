// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the location coordination
//! plane. Every named counter referenced in prose by `spec.md` §4
//! (`RedundantRecentLocationAddSkipped`, `LocationAddQueued`,
//! `IncrementalCheckpointFilesUploadSkipped`, `CancelRedisInstance`, …) has
//! a concrete counter here, registered once globally via `once_cell`.

use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_histogram};

/// All counters named by the event-publish discipline in spec §4.3.
pub static REDUNDANT_RECENT_LOCATION_ADD_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_redundant_recent_location_add_skipped_total",
        "Adds suppressed because an add for the same hash was published within the machine-location-update window."
    ).unwrap()
});
pub static LAZY_TOUCH_EVENT_ONLY: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_lazy_touch_event_only_total",
        "Touch events emitted in place of a suppressed add."
    ).unwrap()
});
pub static LOCATION_ADD_RECENT_REMOVE_EAGER: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_location_add_recent_remove_eager_total",
        "Adds published eagerly because the hash was recently removed locally."
    ).unwrap()
});
pub static LOCATION_ADD_RECENT_INACTIVE_EAGER: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_location_add_recent_inactive_eager_total",
        "Adds published eagerly because this machine was recently marked inactive."
    ).unwrap()
});
pub static LOCATION_ADD_QUEUED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_location_add_queued_total",
        "Adds conveyed only via the event bus because replica count is above the lazy-update threshold."
    ).unwrap()
});
pub static LOCATION_ADD_EAGER: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_location_add_eager_total",
        "Adds published to both the Global KV and the event bus."
    ).unwrap()
});
pub static REGISTER_LOCAL_LOCATION: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_register_local_location_total",
        "Calls made into the Global KV to register a local location eagerly."
    ).unwrap()
});

/// Checkpoint producer/consumer counters from spec §4.4.
pub static INCREMENTAL_CHECKPOINT_FILES_UPLOAD_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_incremental_checkpoint_files_upload_skipped_total",
        "Checkpoint files whose content hash already matches one in the Central Store."
    ).unwrap()
});
pub static INCREMENTAL_CHECKPOINT_FILES_DOWNLOAD_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_incremental_checkpoint_files_download_skipped_total",
        "Checkpoint files reused locally instead of downloaded during restore."
    ).unwrap()
});
pub static RESTORE_CHECKPOINTS_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_restore_checkpoints_skipped_total",
        "Restore cycles skipped because the local checkpoint is still fresh."
    ).unwrap()
});
pub static TRY_GET_FILE_FROM_PEER_SUCCEEDED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_try_get_file_from_peer_succeeded_total",
        "Checkpoint files fetched from a peer machine instead of the Central Store."
    ).unwrap()
});
pub static TRY_GET_FILE_FROM_FALLBACK: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_try_get_file_from_fallback_total",
        "Checkpoint files fetched from the Central Store after no peer had it."
    ).unwrap()
});

/// Eviction counters from spec §4.8.
pub static EVICTION_MIN_AGE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_eviction_min_age_total",
        "Candidates marked ineligible for eviction because their age is below EvictionMinAge."
    ).unwrap()
});

/// Proactive copy counters from spec §4.9.
pub static PROACTIVE_COPY_REJECTED_OLDER_THAN_EVICTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_rejected_push_copy_older_than_evicted_total",
        "Proactive push copies rejected because the content is older than the target's most recently evicted hash."
    ).unwrap()
});
pub static PROACTIVE_COPIES_SUCCEEDED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_proactive_copies_succeeded_total",
        "Proactive copies accepted by the target machine."
    ).unwrap()
});

/// Raided Global KV counters from spec §4.2.
pub static CANCEL_REDIS_INSTANCE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_cancel_redis_instance_total",
        "Times the loser of a raided read/write race failed to cancel cleanly."
    ).unwrap()
});

/// Garbage collection counters from spec §4.1 / §4.6.
pub static GC_ENTRIES_CLEANED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_gc_entries_cleaned_total",
        "LocationDB entries removed by garbage collection."
    ).unwrap()
});
pub static GC_ENTRIES_COLLECTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locusd_gc_entries_collected_total",
        "LocationDB entries inspected during a garbage collection pass."
    ).unwrap()
});

/// Server-wide gauges and histograms.
pub static MASTER_ROLE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "locusd_is_master",
        "Whether this machine currently holds the master role (1) or not (0)."
    ).unwrap()
});
pub static LOCATION_DB_KEY_COUNT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "locusd_location_db_key_count",
        "Number of ShortHash entries currently tracked in the local LocationDB."
    ).unwrap()
});
pub static HEARTBEAT_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "locusd_heartbeat_latency_seconds",
        "Latency of a full heartbeat cycle (election + cluster-state refresh + checkpoint + GC)."
    ).unwrap()
});
pub static CACHE_FLUSH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "locusd_write_cache_flush_total",
        "Write-cache flushes, labeled by trigger.",
        &["trigger"]
    ).unwrap()
});

/// Gathers all registered metrics and encodes them in the Prometheus text
/// format, served by `server::metrics_server`.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
