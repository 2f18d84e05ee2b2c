//! Agent side of metron: periodic host sampling into a shared snapshot and
//! batched delivery of that snapshot to the collector server.

pub mod config;
pub mod delivery;
pub mod transport;
