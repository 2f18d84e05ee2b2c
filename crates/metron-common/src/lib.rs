//! Shared building blocks for the metron agent and collector.
//!
//! - [`types`]: the wire/data model for gauge and counter samples.
//! - [`snapshot`]: the lock-guarded in-memory aggregate.
//! - [`retry`]: fixed-schedule backoff for transient failures.
//! - [`workerpool`]: a bounded pool of async workers with an optional
//!   concurrency cap.

pub mod retry;
pub mod snapshot;
pub mod types;
pub mod workerpool;
