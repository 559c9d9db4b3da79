// src/core/event_store/hub.rs

//! `EventHub`: the append-only log abstraction collaborator named in spec
//! §6 (`publish`, `subscribe`, `lastKnownCursor`). `InMemoryEventHub` is the
//! reference implementation used by tests and the demo binary, grounded on
//! `spineldb::core::events::EventBus` — a broadcast sender for live fan-out,
//! backed here by a retained log so a subscriber can replay from any cursor
//! rather than only seeing events published after it subscribes.

use crate::core::LocusError;
use crate::core::event_store::types::EventBatch;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Bounded live fan-out capacity; a lagging subscriber falls back to
/// replaying from the retained log rather than losing events outright.
const BROADCAST_CAPACITY: usize = 4096;

pub type BatchStream = Pin<Box<dyn Stream<Item = EventBatch> + Send>>;

#[async_trait]
pub trait EventHub: Send + Sync + std::fmt::Debug {
    async fn publish(&self, epoch: &str, batch: EventBatch) -> Result<(), LocusError>;

    /// Streams every batch for `epoch` starting at `from_cursor` (a global
    /// sequence index into the retained log, not a per-publisher sequence
    /// number).
    async fn subscribe(&self, epoch: &str, from_cursor: u64) -> Result<BatchStream, LocusError>;

    async fn last_known_cursor(&self, epoch: &str) -> Result<u64, LocusError>;
}

#[derive(Debug)]
pub struct InMemoryEventHub {
    inner: Mutex<Inner>,
    sender: broadcast::Sender<EventBatch>,
}

#[derive(Debug, Default)]
struct Inner {
    epoch: String,
    log: Vec<EventBatch>,
}

impl InMemoryEventHub {
    pub fn new(epoch: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(Inner { epoch: epoch.into(), log: Vec::new() }),
            sender,
        }
    }

    /// Resets the retained log and cursor, per spec §4.3: "On epoch change,
    /// in-flight state is abandoned ... event consumers reset their read
    /// position."
    pub fn reset_epoch(&self, new_epoch: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch = new_epoch.into();
        inner.log.clear();
    }
}

#[async_trait]
impl EventHub for InMemoryEventHub {
    async fn publish(&self, epoch: &str, batch: EventBatch) -> Result<(), LocusError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            return Err(LocusError::Rejected(format!(
                "event hub epoch mismatch: publisher={epoch} hub={}",
                inner.epoch
            )));
        }
        inner.log.push(batch.clone());
        // No active subscribers is a routine, not an error, condition.
        let _ = self.sender.send(batch);
        Ok(())
    }

    async fn subscribe(&self, epoch: &str, from_cursor: u64) -> Result<BatchStream, LocusError> {
        let (backlog, epoch_matches) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.log.iter().skip(from_cursor as usize).cloned().collect::<Vec<_>>(),
                inner.epoch == epoch,
            )
        };
        if !epoch_matches {
            return Err(LocusError::Rejected(format!("unknown epoch {epoch}")));
        }
        let mut live = self.sender.subscribe();
        let stream = async_stream::stream! {
            for batch in backlog {
                yield batch;
            }
            loop {
                match live.recv().await {
                    Ok(batch) => yield batch,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn last_known_cursor(&self, epoch: &str) -> Result<u64, LocusError> {
        let inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            return Err(LocusError::Rejected(format!("unknown epoch {epoch}")));
        }
        Ok(inner.log.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_store::types::EventKind;
    use crate::core::machine::MachineId;
    use futures::StreamExt;

    fn batch(seq: u64) -> EventBatch {
        EventBatch {
            epoch: "e1".into(),
            machine: MachineId(1),
            sequence_number: seq,
            kind: EventKind::TouchContentLocation { hashes: vec![] },
        }
    }

    #[tokio::test]
    async fn subscribe_replays_the_retained_log() {
        let hub = InMemoryEventHub::new("e1");
        hub.publish("e1", batch(1)).await.unwrap();
        hub.publish("e1", batch(2)).await.unwrap();

        let mut stream = hub.subscribe("e1", 0).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.sequence_number, 1);
        let second = stream.next().await.unwrap();
        assert_eq!(second.sequence_number, 2);
    }

    #[tokio::test]
    async fn cursor_skips_already_seen_entries() {
        let hub = InMemoryEventHub::new("e1");
        hub.publish("e1", batch(1)).await.unwrap();
        hub.publish("e1", batch(2)).await.unwrap();
        assert_eq!(hub.last_known_cursor("e1").await.unwrap(), 2);

        let mut stream = hub.subscribe("e1", 1).await.unwrap();
        let only = stream.next().await.unwrap();
        assert_eq!(only.sequence_number, 2);
    }

    #[tokio::test]
    async fn epoch_reset_clears_the_log_and_cursor() {
        let hub = InMemoryEventHub::new("e1");
        hub.publish("e1", batch(1)).await.unwrap();
        hub.reset_epoch("e2");
        assert_eq!(hub.last_known_cursor("e2").await.unwrap(), 0);
        assert!(hub.last_known_cursor("e1").await.is_err());
    }
}
