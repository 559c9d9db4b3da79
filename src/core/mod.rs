// src/core/mod.rs

//! The central module containing the core logic and data structures of the
//! location coordination plane: the algorithms that keep every machine's
//! view of "which machine has which blob" fresh, bounded, and usable under
//! partial failure.

pub mod blob_store;
pub mod checkpoint;
pub mod clock;
pub mod cluster;
pub mod election;
pub mod errors;
pub mod event_store;
pub mod eviction;
pub mod global_kv;
pub mod hash;
pub mod location;
pub mod machine;
pub mod metrics;
pub mod proactive_copy;
pub mod reconciliation;
pub mod state;
pub mod tasks;
pub mod transport;

pub use errors::LocusError;
pub use hash::{ContentHash, ShortHash};
pub use machine::{MachineId, MachineLocation};

/// A uniform result type used across the location coordination plane.
pub type Result<T> = std::result::Result<T, LocusError>;
