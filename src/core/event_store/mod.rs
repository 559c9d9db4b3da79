// src/core/event_store/mod.rs

//! The event hub (spec §4.3): the publish/subscribe plane every machine
//! uses to propagate location changes to its peers.

pub mod hub;
pub mod types;
