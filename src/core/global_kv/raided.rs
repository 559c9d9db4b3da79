// src/core/global_kv/raided.rs

//! `RaidedGlobalKv`: composes two independent `GlobalKv` back-ends so the
//! Global Location Store survives either one being unavailable (spec
//! §4.2's "raided" pair). Writes go to both; reads race both and take the
//! first success, with the slower side given a bounded window to catch up
//! before it's cancelled.

use crate::core::LocusError;
use crate::core::global_kv::traits::GlobalKv;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A pair of `GlobalKv` back-ends operated as one logical store. `secondary`
/// is optional so the same type can run single-backend in tests without a
/// distinct code path.
pub struct RaidedGlobalKv {
    primary: Arc<dyn GlobalKv>,
    secondary: Option<Arc<dyn GlobalKv>>,
    /// How long the faster side waits for the slower side to finish before
    /// giving up on a clean cancellation (spec §4.2: "cancellation of the
    /// other MUST complete before the call returns").
    retry_window: Duration,
}

impl fmt::Debug for RaidedGlobalKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaidedGlobalKv")
            .field("has_secondary", &self.secondary.is_some())
            .field("retry_window", &self.retry_window)
            .finish()
    }
}

impl RaidedGlobalKv {
    pub fn new(primary: Arc<dyn GlobalKv>, secondary: Option<Arc<dyn GlobalKv>>, retry_window: Duration) -> Self {
        Self { primary, secondary, retry_window }
    }

    pub fn single(backend: Arc<dyn GlobalKv>) -> Self {
        Self::new(backend, None, Duration::from_secs(5))
    }

    /// Races `primary` and `secondary` against the same operation, taking
    /// the first `Ok`. The loser is given `retry_window` to finish on its
    /// own; if it hasn't by then, the race result is still returned but
    /// `CancelRedisInstance` is bumped to record that we couldn't confirm a
    /// clean cancellation.
    async fn race<T, F>(&self, op: F) -> Result<T, LocusError>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn GlobalKv>) -> futures::future::BoxFuture<'static, Result<T, LocusError>>,
    {
        let Some(secondary) = self.secondary.clone() else {
            return op(self.primary.clone()).await;
        };

        let primary_fut = op(self.primary.clone());
        let secondary_fut = op(secondary);

        tokio::select! {
            biased;
            res = primary_fut => {
                match res {
                    Ok(v) => Ok(v),
                    Err(_) => {
                        match tokio::time::timeout(self.retry_window, op(self.secondary.clone().unwrap())).await {
                            Ok(result) => result,
                            Err(_) => {
                                crate::core::metrics::CANCEL_REDIS_INSTANCE.inc();
                                Err(LocusError::Transient("both raided backends unavailable".into()))
                            }
                        }
                    }
                }
            }
            res = secondary_fut => {
                match res {
                    Ok(v) => Ok(v),
                    Err(_) => {
                        match tokio::time::timeout(self.retry_window, op(self.primary.clone())).await {
                            Ok(result) => result,
                            Err(_) => {
                                crate::core::metrics::CANCEL_REDIS_INSTANCE.inc();
                                Err(LocusError::Transient("both raided backends unavailable".into()))
                            }
                        }
                    }
                }
            }
        }
    }

    /// Issues a write to both backends. Per spec §4.2 every write goes to
    /// both sides regardless of read racing; a failure on either side is
    /// surfaced (the caller decides whether a single-side failure is fatal).
    async fn dual_write<F>(&self, op: F) -> Result<(), LocusError>
    where
        F: Fn(Arc<dyn GlobalKv>) -> futures::future::BoxFuture<'static, Result<(), LocusError>>,
    {
        let primary_res = op(self.primary.clone()).await;
        let secondary_res = match &self.secondary {
            Some(s) => op(s.clone()).await,
            None => Ok(()),
        };
        match (primary_res, secondary_res) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(e), Err(_)) => Err(e),
        }
    }
}

#[async_trait]
impl GlobalKv for RaidedGlobalKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LocusError> {
        let key = key.to_string();
        self.race(move |kv| {
            let key = key.clone();
            Box::pin(async move { kv.get(&key).await })
        })
        .await
    }

    async fn set_if_not_exists(&self, key: &str, value: Vec<u8>) -> Result<bool, LocusError> {
        let key = key.to_string();
        let primary_res = self.primary.set_if_not_exists(&key, value.clone()).await?;
        if let Some(secondary) = &self.secondary {
            // Mirror unconditionally: the primary's CAS result is authoritative,
            // the secondary is kept in sync with a plain set.
            secondary.set(&key, value).await?;
        }
        Ok(primary_res)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), LocusError> {
        let key = key.to_string();
        self.dual_write(move |kv| {
            let key = key.clone();
            let value = value.clone();
            Box::pin(async move { kv.set(&key, value).await })
        })
        .await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, LocusError> {
        // CAS discipline only makes sense against one authoritative side;
        // the primary arbitrates and the secondary is mirrored afterward.
        let swapped = self.primary.compare_and_set(key, expected, new.clone()).await?;
        if swapped {
            if let Some(secondary) = &self.secondary {
                secondary.set(key, new).await?;
            }
        }
        Ok(swapped)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, LocusError> {
        let prefix = prefix.to_string();
        self.race(move |kv| {
            let prefix = prefix.clone();
            Box::pin(async move { kv.scan(&prefix).await })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), LocusError> {
        let key = key.to_string();
        self.dual_write(move |kv| {
            let key = key.clone();
            Box::pin(async move { kv.delete(&key).await })
        })
        .await
    }

    async fn delete_string_keys(&self, predicate: &(dyn Fn(&str) -> bool + Send + Sync)) -> Result<usize, LocusError> {
        let primary_count = self.primary.delete_string_keys(predicate).await?;
        if let Some(secondary) = &self.secondary {
            secondary.delete_string_keys(predicate).await?;
        }
        Ok(primary_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::global_kv::memory::InMemoryKv;

    fn raided() -> (RaidedGlobalKv, Arc<InMemoryKv>, Arc<InMemoryKv>) {
        let primary = InMemoryKv::new();
        let secondary = InMemoryKv::new();
        let kv = RaidedGlobalKv::new(primary.clone(), Some(secondary.clone()), Duration::from_millis(200));
        (kv, primary, secondary)
    }

    #[tokio::test]
    async fn writes_land_on_both_backends() {
        let (kv, primary, secondary) = raided();
        kv.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(primary.get("k").await.unwrap().unwrap(), b"v".to_vec());
        assert_eq!(secondary.get("k").await.unwrap().unwrap(), b"v".to_vec());
    }

    #[tokio::test]
    async fn read_survives_primary_outage() {
        let (kv, primary, _secondary) = raided();
        kv.set("k", b"v".to_vec()).await.unwrap();
        primary.set_unavailable(true);
        assert_eq!(kv.get("k").await.unwrap().unwrap(), b"v".to_vec());
    }

    #[tokio::test]
    async fn read_survives_secondary_outage() {
        let (kv, _primary, secondary) = raided();
        kv.set("k", b"v".to_vec()).await.unwrap();
        secondary.set_unavailable(true);
        assert_eq!(kv.get("k").await.unwrap().unwrap(), b"v".to_vec());
    }

    #[tokio::test]
    async fn read_fails_when_both_backends_down() {
        let (kv, primary, secondary) = raided();
        primary.set_unavailable(true);
        secondary.set_unavailable(true);
        assert!(kv.get("k").await.is_err());
    }
}
