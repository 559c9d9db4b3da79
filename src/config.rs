// src/config.rs

//! Server configuration: loading from TOML, resolving defaults, and
//! validation. Every option enumerated in spec §6 has a field here, plus
//! the ambient bind/log/metrics settings a runnable daemon needs.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::{Arc, Mutex};

/// Wraps a loaded `Config` so it can be shared and hot-reloaded the way
/// the rest of the codebase shares other mutable server state.
pub trait IntoMutex: Sized {
    fn into_mutex(self) -> Arc<Mutex<Self>>;
}

impl IntoMutex for Config {
    fn into_mutex(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: default_metrics_port() }
    }
}

fn default_metrics_port() -> u16 {
    9898
}

/// Raided Global KV back-end selection. The reference implementation only
/// ships the in-memory back-end (spec §1: the underlying shared KV is out
/// of scope), but the field exists so a future on-disk/Redis-backed
/// `GlobalKv` can be selected without touching call sites.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GlobalKvBackend {
    #[default]
    InMemory,
}

/// All core options named in spec §6, plus the ambient fields (bind
/// address, data directory, log level, metrics) a deployable binary needs.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Address the admin/API HTTP surface binds to.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Root directory for LocationDB shard segments and checkpoint staging.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub global_kv_backend: GlobalKvBackend,

    /// Whether this machine participates in master-lease elections.
    #[serde(default = "default_true")]
    pub is_master_eligible: bool,
    /// Prefix applied to every Global KV key this machine issues, so
    /// multiple logical clusters can share one back-end.
    #[serde(default = "default_key_space_prefix")]
    pub key_space_prefix: String,
    /// Configuration-versioning string; events/checkpoints from a
    /// different epoch are treated as incompatible.
    #[serde(default = "default_epoch")]
    pub event_hub_epoch: String,
    /// Upper bound on `EventBatch::approximate_len()` before a publish is
    /// split into several smaller batches sharing the same sequence
    /// ordering. Chiefly bites on reconciliation deltas, which otherwise
    /// carry a whole cycle's adds and removes in one message.
    #[serde(default = "default_hub_max_message_size")]
    pub hub_max_message_size: usize,

    #[serde(with = "humantime_serde", default = "default_content_hash_bump_time")]
    pub content_hash_bump_time: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_machine_expiry")]
    pub machine_expiry: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_location_entry_expiry")]
    pub location_entry_expiry: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_recompute_inactive_expiry")]
    pub recompute_inactive_machines_expiry: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_cluster_state_mirror_interval")]
    pub cluster_state_mirror_interval: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_master_lease_expiry_time")]
    pub master_lease_expiry_time: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_master_lease_renewal_threshold")]
    pub master_lease_renewal_threshold: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: std::time::Duration,

    #[serde(with = "humantime_serde", default = "default_create_checkpoint_interval")]
    pub create_checkpoint_interval: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_restore_checkpoint_age_threshold")]
    pub restore_checkpoint_age_threshold: std::time::Duration,
    #[serde(default = "default_true")]
    pub use_incremental_checkpointing: bool,
    #[serde(default)]
    pub use_distributed_central_storage: bool,

    #[serde(with = "humantime_serde", default = "default_retry_window")]
    pub retry_window: std::time::Duration,

    #[serde(default = "default_safe_to_lazily_update_threshold")]
    pub safe_to_lazily_update_machine_count_threshold: usize,
    #[serde(with = "humantime_serde", default = "default_replica_credit")]
    pub replica_credit: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_eviction_min_age")]
    pub eviction_min_age: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_touch_frequency")]
    pub touch_frequency: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_machine_location_update_window")]
    pub machine_location_update_window: std::time::Duration,

    #[serde(default = "default_reconciliation_max_cycle_size")]
    pub reconciliation_max_cycle_size: usize,
    #[serde(with = "humantime_serde", default = "default_reconciliation_cycle_frequency")]
    pub reconciliation_cycle_frequency: std::time::Duration,
    #[serde(default = "default_true")]
    pub allow_skip_reconciliation: bool,
    #[serde(default)]
    pub unsafe_disable_reconciliation: bool,

    #[serde(default = "default_true")]
    pub enable_proactive_copy: bool,
    /// Drives spec §4.9 trigger (c): a background, heartbeat-driven sweep
    /// that proactively replicates under-replicated local content, as
    /// opposed to the on-put/on-pin triggers gated by `enable_proactive_copy`.
    #[serde(default)]
    pub enable_proactive_replication: bool,
    #[serde(default = "default_under_replicated_threshold")]
    pub under_replicated_threshold: usize,
    #[serde(default)]
    pub push_proactive_copies: bool,
    #[serde(default = "default_true")]
    pub proactive_copy_on_put: bool,
    #[serde(default)]
    pub proactive_copy_on_pin: bool,
    #[serde(default = "default_true")]
    pub proactive_copy_use_preferred_locations: bool,
    #[serde(default = "default_true")]
    pub proactive_copy_reject_old_content: bool,
    #[serde(default = "default_proactive_copy_batch_size")]
    pub proactive_copy_batch_size: usize,
    #[serde(default = "default_proactive_copy_concurrency")]
    pub proactive_copy_concurrency: usize,

    #[serde(default = "default_true")]
    pub store_cluster_state_in_database: bool,

    /// Soft size threshold (entries) before a shard's write cache is
    /// flushed to its persistent segment.
    #[serde(default = "default_write_cache_size_threshold")]
    pub write_cache_size_threshold: usize,

    /// This machine's advertised endpoint, used when registering with the
    /// Global KV and when peers advertise checkpoint/proactive-copy
    /// targets.
    #[serde(default = "default_machine_location")]
    pub machine_location: String,
}

fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7979
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_data_dir() -> String {
    "locusd_data".to_string()
}
fn default_key_space_prefix() -> String {
    "locusd".to_string()
}
fn default_epoch() -> String {
    "e1".to_string()
}
fn default_hub_max_message_size() -> usize {
    2_000
}
fn default_content_hash_bump_time() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 60)
}
fn default_machine_expiry() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 5)
}
fn default_location_entry_expiry() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 60 * 24)
}
fn default_recompute_inactive_expiry() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}
fn default_cluster_state_mirror_interval() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}
fn default_master_lease_expiry_time() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}
fn default_master_lease_renewal_threshold() -> std::time::Duration {
    std::time::Duration::from_secs(10)
}
fn default_heartbeat_interval() -> std::time::Duration {
    std::time::Duration::from_secs(5)
}
fn default_create_checkpoint_interval() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 10)
}
fn default_restore_checkpoint_age_threshold() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 20)
}
fn default_retry_window() -> std::time::Duration {
    std::time::Duration::from_millis(500)
}
fn default_safe_to_lazily_update_threshold() -> usize {
    3
}
fn default_replica_credit() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 15)
}
fn default_eviction_min_age() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}
fn default_touch_frequency() -> std::time::Duration {
    std::time::Duration::from_secs(30 * 60)
}
fn default_machine_location_update_window() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}
fn default_reconciliation_max_cycle_size() -> usize {
    10_000
}
fn default_reconciliation_cycle_frequency() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 30)
}
fn default_proactive_copy_batch_size() -> usize {
    64
}
fn default_under_replicated_threshold() -> usize {
    3
}
fn default_proactive_copy_concurrency() -> usize {
    8
}
fn default_write_cache_size_threshold() -> usize {
    4096
}
fn default_machine_location() -> String {
    "127.0.0.1:7979".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            metrics: MetricsConfig::default(),
            global_kv_backend: GlobalKvBackend::default(),
            is_master_eligible: true,
            key_space_prefix: default_key_space_prefix(),
            event_hub_epoch: default_epoch(),
            hub_max_message_size: default_hub_max_message_size(),
            content_hash_bump_time: default_content_hash_bump_time(),
            machine_expiry: default_machine_expiry(),
            location_entry_expiry: default_location_entry_expiry(),
            recompute_inactive_machines_expiry: default_recompute_inactive_expiry(),
            cluster_state_mirror_interval: default_cluster_state_mirror_interval(),
            master_lease_expiry_time: default_master_lease_expiry_time(),
            master_lease_renewal_threshold: default_master_lease_renewal_threshold(),
            heartbeat_interval: default_heartbeat_interval(),
            create_checkpoint_interval: default_create_checkpoint_interval(),
            restore_checkpoint_age_threshold: default_restore_checkpoint_age_threshold(),
            use_incremental_checkpointing: true,
            use_distributed_central_storage: false,
            retry_window: default_retry_window(),
            safe_to_lazily_update_machine_count_threshold: default_safe_to_lazily_update_threshold(),
            replica_credit: default_replica_credit(),
            eviction_min_age: default_eviction_min_age(),
            touch_frequency: default_touch_frequency(),
            machine_location_update_window: default_machine_location_update_window(),
            reconciliation_max_cycle_size: default_reconciliation_max_cycle_size(),
            reconciliation_cycle_frequency: default_reconciliation_cycle_frequency(),
            allow_skip_reconciliation: true,
            unsafe_disable_reconciliation: false,
            enable_proactive_copy: true,
            enable_proactive_replication: false,
            under_replicated_threshold: default_under_replicated_threshold(),
            push_proactive_copies: false,
            proactive_copy_on_put: true,
            proactive_copy_on_pin: false,
            proactive_copy_use_preferred_locations: true,
            proactive_copy_reject_old_content: true,
            proactive_copy_batch_size: default_proactive_copy_batch_size(),
            proactive_copy_concurrency: default_proactive_copy_concurrency(),
            store_cluster_state_in_database: true,
            write_cache_size_threshold: default_write_cache_size_threshold(),
            machine_location: default_machine_location(),
        }
    }
}

/// Validates that `machine_location` carries a resolvable host and port,
/// catching a malformed `host:port` string at startup rather than at the
/// first registration attempt against the Global KV. Grounded on the
/// teacher's `core::commands::helpers::validate_url_and_guard_ssrf`, which
/// also borrows `url::Url::parse` to catch a malformed address early
/// rather than let it reach a network call.
fn validate_machine_location(location: &str) -> Result<()> {
    let url = url::Url::parse(&format!("locusd://{location}"))
        .with_context(|| format!("machine_location '{location}' is not a valid host:port address"))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(anyhow!("machine_location '{location}' is missing a host"));
    }
    if url.port().is_none() {
        return Err(anyhow!("machine_location '{location}' is missing a port"));
    }
    Ok(())
}

impl Config {
    /// Reads and parses a TOML config file, falling back to defaults for
    /// every field the file omits, then validates the result.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.key_space_prefix.trim().is_empty() {
            return Err(anyhow!("key_space_prefix cannot be empty"));
        }
        if self.event_hub_epoch.trim().is_empty() {
            return Err(anyhow!("event_hub_epoch cannot be empty"));
        }
        if self.master_lease_renewal_threshold >= self.master_lease_expiry_time {
            return Err(anyhow!(
                "master_lease_renewal_threshold must be less than master_lease_expiry_time"
            ));
        }
        if self.safe_to_lazily_update_machine_count_threshold == 0 {
            return Err(anyhow!(
                "safe_to_lazily_update_machine_count_threshold cannot be 0"
            ));
        }
        if self.reconciliation_max_cycle_size == 0 {
            return Err(anyhow!("reconciliation_max_cycle_size cannot be 0"));
        }
        if self.hub_max_message_size == 0 {
            return Err(anyhow!("hub_max_message_size cannot be 0"));
        }
        if self.proactive_copy_concurrency == 0 {
            return Err(anyhow!("proactive_copy_concurrency cannot be 0"));
        }
        if self.metrics.enabled && self.metrics.port == self.port {
            return Err(anyhow!(
                "metrics.port cannot be the same as the main server port"
            ));
        }
        validate_machine_location(&self.machine_location)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_renewal_threshold_not_below_lease_expiry() {
        let mut cfg = Config::default();
        cfg.master_lease_renewal_threshold = cfg.master_lease_expiry_time;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_clashing_metrics_and_main_port() {
        let mut cfg = Config::default();
        cfg.metrics.enabled = true;
        cfg.metrics.port = cfg.port;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_machine_location_missing_a_port() {
        let mut cfg = Config::default();
        cfg.machine_location = "127.0.0.1".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_hostname_machine_location() {
        let mut cfg = Config::default();
        cfg.machine_location = "worker-7.internal:7979".to_string();
        assert!(cfg.validate().is_ok());
    }
}
