// src/core/clock.rs

//! A narrow time abstraction so heartbeat-driven engines (election lease
//! expiry, checkpoint age, eviction age) can be tested without sleeping in
//! real time. Grounded on the teacher's reliance on `Instant`/`watch`
//! channels for time-sensitive replication logic, generalized here into a
//! trait so scenario tests can advance a fake clock deterministically.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The production clock, backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually-advanced clock for deterministic tests of TTL, lease, and
/// eviction-age behavior.
#[derive(Debug)]
pub struct TestClock {
    millis_since_epoch: AtomicI64,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            millis_since_epoch: AtomicI64::new(start.timestamp_millis()),
        })
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.millis_since_epoch
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis_since_epoch.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }
}
