// src/core/event_store/types.rs

//! Event kinds and the batch envelope carried on the event hub (spec §4.3).

use crate::core::hash::ShortHash;
use crate::core::machine::MachineId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    AddContentLocation { hashes: Vec<(ShortHash, i64)> },
    RemoveContentLocation { hashes: Vec<ShortHash> },
    TouchContentLocation { hashes: Vec<ShortHash> },
    UpdateMetadataEntry { key: String, value: Vec<u8> },
    Reconcile { adds: Vec<(ShortHash, i64)>, removes: Vec<ShortHash> },
}

/// The unit of work published and consumed via `EventHub`. Each publisher
/// (identified by `machine`) assigns its own monotonic `sequence_number`;
/// cross-publisher order is undefined (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub epoch: String,
    pub machine: MachineId,
    pub sequence_number: u64,
    pub kind: EventKind,
}

impl EventKind {
    /// Rough wire-size estimate used to decide whether a batch needs to be
    /// split before publish (spec §3: "serialized <= hub max-message-size").
    pub fn approximate_len(&self) -> usize {
        match self {
            EventKind::AddContentLocation { hashes } => hashes.len(),
            EventKind::RemoveContentLocation { hashes } => hashes.len(),
            EventKind::TouchContentLocation { hashes } => hashes.len(),
            EventKind::UpdateMetadataEntry { .. } => 1,
            EventKind::Reconcile { adds, removes } => adds.len() + removes.len(),
        }
    }

    /// Splits a kind whose `approximate_len()` exceeds `max_len` into
    /// several kinds of the same variant, each within budget. Variants that
    /// carry no list (`UpdateMetadataEntry`) are never split.
    pub fn split(self, max_len: usize) -> Vec<EventKind> {
        let max_len = max_len.max(1);
        match self {
            EventKind::AddContentLocation { hashes } => hashes
                .chunks(max_len)
                .map(|c| EventKind::AddContentLocation { hashes: c.to_vec() })
                .collect(),
            EventKind::RemoveContentLocation { hashes } => hashes
                .chunks(max_len)
                .map(|c| EventKind::RemoveContentLocation { hashes: c.to_vec() })
                .collect(),
            EventKind::TouchContentLocation { hashes } => hashes
                .chunks(max_len)
                .map(|c| EventKind::TouchContentLocation { hashes: c.to_vec() })
                .collect(),
            EventKind::UpdateMetadataEntry { key, value } => vec![EventKind::UpdateMetadataEntry { key, value }],
            EventKind::Reconcile { adds, removes } => {
                // Adds and removes are independent lists; split each against
                // the same budget and pair them up positionally so a single
                // oversized cycle still yields a handful of batches rather
                // than one per add plus one per remove.
                let add_chunks: Vec<Vec<(ShortHash, i64)>> =
                    if adds.is_empty() { vec![] } else { adds.chunks(max_len).map(|c| c.to_vec()).collect() };
                let remove_chunks: Vec<Vec<ShortHash>> =
                    if removes.is_empty() { vec![] } else { removes.chunks(max_len).map(|c| c.to_vec()).collect() };
                let n = add_chunks.len().max(remove_chunks.len()).max(1);
                (0..n)
                    .map(|i| EventKind::Reconcile {
                        adds: add_chunks.get(i).cloned().unwrap_or_default(),
                        removes: remove_chunks.get(i).cloned().unwrap_or_default(),
                    })
                    .collect()
            }
        }
    }
}

impl EventBatch {
    /// Rough wire-size estimate used to decide whether a batch needs to be
    /// split before publish (spec §3: "serialized <= hub max-message-size").
    pub fn approximate_len(&self) -> usize {
        self.kind.approximate_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(b: u8) -> ShortHash {
        ShortHash { hash_type: crate::core::hash::HashType::Sha256, prefix: [b; 11] }
    }

    #[test]
    fn split_chunks_a_large_add_batch() {
        let hashes: Vec<(ShortHash, i64)> = (0..10).map(|i| (sh(i), i as i64)).collect();
        let kind = EventKind::AddContentLocation { hashes };
        let parts = kind.split(4);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.approximate_len() <= 4));
    }

    #[test]
    fn split_leaves_small_batches_untouched() {
        let kind = EventKind::RemoveContentLocation { hashes: vec![sh(1), sh(2)] };
        let parts = kind.split(100);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn split_pairs_up_reconcile_adds_and_removes() {
        let adds: Vec<(ShortHash, i64)> = (0..6).map(|i| (sh(i), i as i64)).collect();
        let removes: Vec<ShortHash> = (20..22).map(sh).collect();
        let kind = EventKind::Reconcile { adds, removes };
        let parts = kind.split(3);
        assert_eq!(parts.len(), 2);
        let total_adds: usize = parts
            .iter()
            .map(|p| match p {
                EventKind::Reconcile { adds, .. } => adds.len(),
                _ => 0,
            })
            .sum();
        let total_removes: usize = parts
            .iter()
            .map(|p| match p {
                EventKind::Reconcile { removes, .. } => removes.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(total_adds, 6);
        assert_eq!(total_removes, 2);
    }

    #[test]
    fn split_never_splits_metadata_updates() {
        let kind = EventKind::UpdateMetadataEntry { key: "k".into(), value: vec![1, 2, 3] };
        let parts = kind.split(1);
        assert_eq!(parts.len(), 1);
    }
}
