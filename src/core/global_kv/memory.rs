// src/core/global_kv/memory.rs

//! `InMemoryKv`: a reference `GlobalKv` implementation backed by a
//! `Mutex<BTreeMap>`, standing in for the out-of-scope external KV system.
//! Used by tests and the single-process demo binary. Exposes a couple of
//! admin-only helpers (`inject_failure`, `delete_raw`) so tests can emulate
//! one side of a raided pair going missing, per spec §4.2's resilience
//! requirement.

use crate::core::LocusError;
use crate::core::global_kv::traits::GlobalKv;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryKv {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    /// When set, every operation fails with `Transient`, simulating the
    /// back-end being unreachable.
    unavailable: AtomicBool,
}

impl InMemoryKv {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LocusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LocusError::Transient("backend unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GlobalKv for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LocusError> {
        self.check_available()?;
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set_if_not_exists(&self, key: &str, value: Vec<u8>) -> Result<bool, LocusError> {
        self.check_available()?;
        let mut guard = self.data.lock().await;
        if guard.contains_key(key) {
            Ok(false)
        } else {
            guard.insert(key.to_string(), value);
            Ok(true)
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), LocusError> {
        self.check_available()?;
        self.data.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, LocusError> {
        self.check_available()?;
        let mut guard = self.data.lock().await;
        let current = guard.get(key).map(|v| v.as_slice());
        if current == expected {
            guard.insert(key.to_string(), new);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, LocusError> {
        self.check_available()?;
        Ok(self
            .data
            .lock()
            .await
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), LocusError> {
        self.check_available()?;
        self.data.lock().await.remove(key);
        Ok(())
    }

    async fn delete_string_keys(&self, predicate: &(dyn Fn(&str) -> bool + Send + Sync)) -> Result<usize, LocusError> {
        self.check_available()?;
        let mut guard = self.data.lock().await;
        let to_remove: Vec<String> = guard.keys().filter(|k| predicate(k)).cloned().collect();
        for k in &to_remove {
            guard.remove(k);
        }
        Ok(to_remove.len())
    }
}

impl InMemoryKv {
    /// Test-only: removes a key directly, bypassing any higher-level
    /// idempotence checks, to simulate one side of a raided pair losing
    /// data (spec scenario S3).
    pub async fn delete_raw(&self, key: &str) {
        self.data.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_not_exists_is_idempotent() {
        let kv = InMemoryKv::new();
        assert!(kv.set_if_not_exists("k", b"a".to_vec()).await.unwrap());
        assert!(!kv.set_if_not_exists("k", b"b".to_vec()).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().unwrap(), b"a".to_vec());
    }

    #[tokio::test]
    async fn compare_and_set_requires_matching_expected() {
        let kv = InMemoryKv::new();
        kv.set("k", b"1".to_vec()).await.unwrap();
        assert!(!kv.compare_and_set("k", Some(b"2"), b"3".to_vec()).await.unwrap());
        assert!(kv.compare_and_set("k", Some(b"1"), b"3".to_vec()).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().unwrap(), b"3".to_vec());
    }

    #[tokio::test]
    async fn unavailable_backend_fails_every_call() {
        let kv = InMemoryKv::new();
        kv.set_unavailable(true);
        assert!(kv.get("k").await.is_err());
    }
}
