// src/core/global_kv/traits.rs

//! `GlobalKv`: the capability contract for a single shared key-value
//! back-end, named `IGlobalKV` in spec §6. The Global Location Store is
//! built atop a raided pair of these (see `raided.rs`).

use crate::core::LocusError;
use async_trait::async_trait;

/// A single-instance shared key-value back-end. Out of scope per spec §1
/// ("the underlying shared KV ... implementations") — this crate only
/// depends on the trait, plus an in-memory reference implementation used
/// by tests and the demo binary.
#[async_trait]
pub trait GlobalKv: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LocusError>;

    /// Sets `key` to `value` only if it does not already exist. Returns
    /// `true` if the set happened.
    async fn set_if_not_exists(&self, key: &str, value: Vec<u8>) -> Result<bool, LocusError>;

    /// Unconditional set, used for plain writes (e.g. mirroring cluster
    /// state) where no CAS discipline is required.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), LocusError>;

    /// Atomically sets `key` to `new` iff its current value equals
    /// `expected` (`None` meaning "key must not exist"). Returns `true` iff
    /// the swap happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, LocusError>;

    /// Lists every key with the given prefix along with its value.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, LocusError>;

    async fn delete(&self, key: &str) -> Result<(), LocusError>;

    /// Deletes every key for which `predicate` returns true.
    async fn delete_string_keys(&self, predicate: &(dyn Fn(&str) -> bool + Send + Sync)) -> Result<usize, LocusError>;
}
