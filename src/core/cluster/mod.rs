// src/core/cluster/mod.rs

//! Cluster state and inactivity tracking (spec §4.6): the machine-id ↔
//! location registry, the inactive-machine set, and the epoch.

pub mod state;

pub use state::ClusterState;
