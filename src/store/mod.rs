//! Local persistence: the snapshot cache and the pending-mutation queue.
//!
//! Both live as JSON values in a synchronous key-value backend, namespaced
//! per server. SQLite is the durable backend; an in-memory backend is used
//! when persistence is disabled.

mod local;
mod storage;

pub use local::{snapshot_ttl, CacheSnapshot, LocalStore, PendingQueue, StoreKeys, CACHE_VERSION};
pub use storage::{KeyValueStorage, MemoryStorage, SqliteStorage};
