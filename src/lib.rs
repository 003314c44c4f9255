//! Local-first data layer for a project-management backend.
//!
//! Reads go through a persistent cache with a freshness window, writes made
//! while offline are applied optimistically and queued, and the sync engine
//! replays the queue once the backend is reachable again.

pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod entity;
pub mod kv;
pub mod logging;
pub mod models;
pub mod queue;
pub mod remote;
pub mod sync;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use client::PlanClient;
pub use config::Config;

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}
