//! State Synchronization Engine
//!
//! Turns session mutations into ordered deltas, renders viewer-filtered
//! snapshots at join time, and fans deltas out to the right connections.

pub mod broadcast;
pub mod delta;
pub mod snapshot;
