// src/core/machine.rs

//! Machine identity types: the 32-bit `MachineId` allocated monotonically
//! within an epoch, and the opaque `MachineLocation` address it is bound to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A machine's unique index within the current epoch. Allocated on first
/// registration, never reused within an epoch, and never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MachineId(pub u32);

impl MachineId {
    pub const FIRST: MachineId = MachineId(1);

    pub fn next(self) -> MachineId {
        MachineId(self.0 + 1)
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// An opaque, unique-per-endpoint address string (e.g. `host:port`) that a
/// physical machine registers at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineLocation(pub String);

impl fmt::Display for MachineLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MachineLocation {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MachineLocation {
    fn from(s: String) -> Self {
        Self(s)
    }
}
