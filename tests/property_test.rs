// tests/property_test.rs

//! Property-style invariant checks, mirroring the teacher's
//! `tests/property/` suite: instead of a handful of hand-picked examples,
//! these generate many small inputs and check an invariant that must hold
//! for all of them.

use locusd::core::event_store::types::EventKind;
use locusd::core::hash::{ContentHash, HashType, ShortHash};
use proptest::prelude::*;

fn short_hash(byte: u8) -> ShortHash {
    ShortHash { hash_type: HashType::Sha256, prefix: [byte; 11] }
}

proptest! {
    /// Splitting an `AddContentLocation` batch never drops or duplicates a
    /// hash, and no resulting part exceeds the requested budget.
    #[test]
    fn split_add_batch_preserves_every_hash(count in 0usize..200, max_len in 1usize..50) {
        let hashes: Vec<(ShortHash, i64)> = (0..count).map(|i| (short_hash((i % 256) as u8), i as i64)).collect();
        let kind = EventKind::AddContentLocation { hashes: hashes.clone() };
        let parts = kind.split(max_len);

        let mut rebuilt = Vec::new();
        for part in &parts {
            match part {
                EventKind::AddContentLocation { hashes } => {
                    prop_assert!(hashes.len() <= max_len);
                    rebuilt.extend(hashes.iter().cloned());
                }
                _ => prop_assert!(false, "split changed variant"),
            }
        }
        prop_assert_eq!(rebuilt, hashes);
    }

    /// Splitting a `Reconcile` batch preserves the total count of adds and
    /// of removes across all resulting parts.
    #[test]
    fn split_reconcile_batch_preserves_totals(
        add_count in 0usize..100,
        remove_count in 0usize..100,
        max_len in 1usize..30,
    ) {
        let adds: Vec<(ShortHash, i64)> = (0..add_count).map(|i| (short_hash((i % 256) as u8), i as i64)).collect();
        let removes: Vec<ShortHash> = (0..remove_count).map(|i| short_hash((i % 256) as u8)).collect();
        let kind = EventKind::Reconcile { adds: adds.clone(), removes: removes.clone() };
        let parts = kind.split(max_len);

        let total_adds: usize = parts.iter().map(|p| match p {
            EventKind::Reconcile { adds, .. } => adds.len(),
            _ => 0,
        }).sum();
        let total_removes: usize = parts.iter().map(|p| match p {
            EventKind::Reconcile { removes, .. } => removes.len(),
            _ => 0,
        }).sum();

        prop_assert_eq!(total_adds, add_count);
        prop_assert_eq!(total_removes, remove_count);
    }

    /// `ContentHash::to_short` is a deterministic, pure projection: equal
    /// inputs always project to equal `ShortHash`es.
    #[test]
    fn to_short_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 32..=32)) {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let a = ContentHash::new(HashType::Sha256, arr);
        let b = ContentHash::new(HashType::Sha256, arr);
        prop_assert_eq!(a.to_short(), b.to_short());
    }
}
