//! Offline-first sync client for a food diary web service.
//!
//! Writes go to the server first; when it is unreachable they are queued in a
//! local store and flushed later, with the caller receiving a provisional
//! record tagged with a temp id. Reads come from the server when possible and
//! from the last cached snapshot otherwise.

pub mod api;
pub mod config;
pub mod logging;
pub mod queue;
pub mod store;
pub mod summary;
pub mod sync;

pub use sync::{ReconcileReport, SyncOrchestrator, SyncStatus};
