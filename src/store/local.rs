//! Namespaced, versioned local persistence for the snapshot cache and the
//! pending-mutation queue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::api::{Entry, Product, RecordId, ServerState};

use super::storage::KeyValueStorage;

/// Schema version stamped on every snapshot. Bump when `ServerState` changes shape.
pub const CACHE_VERSION: &str = "1";

/// Prefix shared by every key this crate writes.
const KEY_PREFIX: &str = "mealsync";

/// How long a snapshot stays valid.
pub fn snapshot_ttl() -> Duration {
  Duration::minutes(5)
}

/// Last pulled server state with its freshness stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
  pub version: String,
  #[serde(rename = "cachedAt", with = "chrono::serde::ts_milliseconds")]
  pub cached_at: DateTime<Utc>,
  pub data: ServerState,
}

impl CacheSnapshot {
  /// Valid iff the schema version matches and it is younger than the TTL.
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    self.version == CACHE_VERSION && now - self.cached_at < snapshot_ttl()
  }
}

/// Local mutations not yet acknowledged by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingQueue {
  #[serde(default)]
  pub new_entries: Vec<Entry>,
  #[serde(default)]
  pub deleted_entries: Vec<RecordId>,
  #[serde(default)]
  pub new_products: Vec<Product>,
  #[serde(default)]
  pub deleted_products: Vec<RecordId>,
}

impl PendingQueue {
  pub fn has_changes(&self) -> bool {
    !(self.new_entries.is_empty()
      && self.deleted_entries.is_empty()
      && self.new_products.is_empty()
      && self.deleted_products.is_empty())
  }

  /// Total number of queued mutations.
  pub fn total(&self) -> usize {
    self.new_entries.len()
      + self.deleted_entries.len()
      + self.new_products.len()
      + self.deleted_products.len()
  }

  /// Drop every item that was part of `flushed`, keeping anything queued since.
  pub fn remove_flushed(&mut self, flushed: &PendingQueue) {
    self.new_entries.retain(|e| !flushed.new_entries.contains(e));
    self
      .deleted_entries
      .retain(|id| !flushed.deleted_entries.contains(id));
    self.new_products.retain(|p| !flushed.new_products.contains(p));
    self
      .deleted_products
      .retain(|id| !flushed.deleted_products.contains(id));
  }
}

/// Storage keys for one server namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
  pub cache: String,
  pub pending: String,
}

impl StoreKeys {
  /// Keys namespaced by a hash of the server base URL, so two servers never
  /// share cache or queue.
  pub fn for_server(base_url: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(base_url.trim().trim_end_matches('/').as_bytes());
    let digest = hex::encode(hasher.finalize());

    Self::with_namespace(&digest[..12])
  }

  pub fn with_namespace(namespace: &str) -> Self {
    Self {
      cache: format!("{}:{}:cache", KEY_PREFIX, namespace),
      pending: format!("{}:{}:pending", KEY_PREFIX, namespace),
    }
  }
}

/// Local store over a synchronous key-value backend.
///
/// Reads never fail: missing, corrupt or outdated data reads as absent (for
/// the snapshot) or as an empty queue. Write failures are logged and dropped.
pub struct LocalStore<S: KeyValueStorage> {
  storage: S,
  keys: StoreKeys,
  /// Serializes queue read-modify-write cycles
  queue_lock: Mutex<()>,
}

impl<S: KeyValueStorage> LocalStore<S> {
  pub fn new(storage: S, keys: StoreKeys) -> Self {
    Self {
      storage,
      keys,
      queue_lock: Mutex::new(()),
    }
  }

  fn read(&self, key: &str) -> Option<String> {
    match self.storage.get_item(key) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "Failed to read local store");
        None
      }
    }
  }

  fn write<T: Serialize>(&self, key: &str, value: &T) {
    let json = match serde_json::to_string(value) {
      Ok(json) => json,
      Err(e) => {
        warn!(key, error = %e, "Failed to serialize value for local store");
        return;
      }
    };
    if let Err(e) = self.storage.set_item(key, &json) {
      warn!(key, error = %e, "Failed to write local store");
    }
  }

  fn remove(&self, key: &str) {
    if let Err(e) = self.storage.remove_item(key) {
      warn!(key, error = %e, "Failed to remove from local store");
    }
  }

  // ==========================================================================
  // Snapshot cache
  // ==========================================================================

  /// Get the cached snapshot, stale or not. Absent if missing, corrupt or
  /// written under another schema version.
  pub fn get_snapshot(&self) -> Option<CacheSnapshot> {
    let raw = self.read(&self.keys.cache)?;

    match serde_json::from_str::<CacheSnapshot>(&raw) {
      Ok(snapshot) if snapshot.version == CACHE_VERSION => Some(snapshot),
      Ok(snapshot) => {
        debug!(version = %snapshot.version, "Ignoring snapshot from another schema version");
        None
      }
      Err(e) => {
        warn!(error = %e, "Ignoring corrupt cache snapshot");
        None
      }
    }
  }

  /// Replace the snapshot, stamping the current version and time.
  pub fn set_snapshot(&self, data: &ServerState) {
    self.write_snapshot(&CacheSnapshot {
      version: CACHE_VERSION.to_string(),
      cached_at: Utc::now(),
      data: data.clone(),
    });
  }

  pub(crate) fn write_snapshot(&self, snapshot: &CacheSnapshot) {
    self.write(&self.keys.cache, snapshot);
  }

  pub fn clear_snapshot(&self) {
    self.remove(&self.keys.cache);
  }

  pub fn is_snapshot_valid(&self) -> bool {
    self.is_snapshot_valid_at(Utc::now())
  }

  pub fn is_snapshot_valid_at(&self, now: DateTime<Utc>) -> bool {
    self
      .get_snapshot()
      .is_some_and(|snapshot| snapshot.is_valid_at(now))
  }

  // ==========================================================================
  // Pending queue
  // ==========================================================================

  /// Get the pending queue; empty if nothing usable is stored.
  pub fn get_queue(&self) -> PendingQueue {
    let Some(raw) = self.read(&self.keys.pending) else {
      return PendingQueue::default();
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
      warn!(error = %e, "Ignoring corrupt pending queue");
      PendingQueue::default()
    })
  }

  pub fn set_queue(&self, queue: &PendingQueue) {
    let _guard = self.lock_queue();
    self.write(&self.keys.pending, queue);
  }

  pub fn clear_queue(&self) {
    let _guard = self.lock_queue();
    self.remove(&self.keys.pending);
  }

  /// Read, modify and write the queue as one step.
  pub fn update_queue<R>(&self, f: impl FnOnce(&mut PendingQueue) -> R) -> R {
    let _guard = self.lock_queue();
    let mut queue = self.get_queue();
    let result = f(&mut queue);
    self.write(&self.keys.pending, &queue);
    result
  }

  fn lock_queue(&self) -> std::sync::MutexGuard<'_, ()> {
    // The guarded value is (), so a poisoned lock carries no broken state
    self.queue_lock.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{EntryProduct, MealType};
  use crate::store::MemoryStorage;
  use chrono::NaiveDate;

  fn store() -> LocalStore<MemoryStorage> {
    LocalStore::new(MemoryStorage::new(), StoreKeys::with_namespace("test"))
  }

  fn snapshot_at(cached_at: DateTime<Utc>) -> CacheSnapshot {
    CacheSnapshot {
      version: CACHE_VERSION.to_string(),
      cached_at,
      data: ServerState::default(),
    }
  }

  fn entry() -> Entry {
    Entry::new(
      EntryProduct::catalog(RecordId::Server(1)),
      MealType::Breakfast,
      100.0,
      NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    )
  }

  #[test]
  fn test_keys_are_namespaced_per_server() {
    let a = StoreKeys::for_server("http://localhost:5001");
    let b = StoreKeys::for_server("http://localhost:5001/");
    let c = StoreKeys::for_server("https://diary.example.com");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.cache.starts_with("mealsync:"));
    assert!(a.pending.ends_with(":pending"));
  }

  #[test]
  fn test_missing_snapshot_is_absent_and_invalid() {
    let store = store();
    assert!(store.get_snapshot().is_none());
    assert!(!store.is_snapshot_valid());
  }

  #[test]
  fn test_set_snapshot_stamps_version_and_time() {
    let store = store();
    let before = Utc::now();
    store.set_snapshot(&ServerState::default());

    let snapshot = store.get_snapshot().unwrap();
    assert_eq!(snapshot.version, CACHE_VERSION);
    assert!(snapshot.cached_at >= before - Duration::milliseconds(1));
    assert!(store.is_snapshot_valid());
  }

  #[test]
  fn test_freshness_boundary() {
    let store = store();
    let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
    store.write_snapshot(&snapshot_at(now));

    assert!(store.is_snapshot_valid_at(now + Duration::minutes(4)));
    assert!(store.is_snapshot_valid_at(now + Duration::minutes(5) - Duration::milliseconds(1)));
    assert!(!store.is_snapshot_valid_at(now + Duration::minutes(5)));
    assert!(!store.is_snapshot_valid_at(now + Duration::minutes(6)));
  }

  #[test]
  fn test_stale_snapshot_is_still_readable() {
    let store = store();
    store.write_snapshot(&snapshot_at(Utc::now() - Duration::minutes(6)));

    assert!(!store.is_snapshot_valid());
    assert!(store.get_snapshot().is_some());
  }

  #[test]
  fn test_version_mismatch_reads_as_absent() {
    let store = store();
    let mut snapshot = snapshot_at(Utc::now());
    snapshot.version = "0".to_string();
    store.write_snapshot(&snapshot);

    assert!(store.get_snapshot().is_none());
    assert!(!store.is_snapshot_valid());
  }

  #[test]
  fn test_corrupt_snapshot_reads_as_absent() {
    let storage = MemoryStorage::new();
    let keys = StoreKeys::with_namespace("test");
    storage.set_item(&keys.cache, "{not json").unwrap();
    let store = LocalStore::new(storage, keys);

    assert!(store.get_snapshot().is_none());
  }

  #[test]
  fn test_clear_snapshot() {
    let store = store();
    store.set_snapshot(&ServerState::default());
    store.clear_snapshot();
    assert!(store.get_snapshot().is_none());
  }

  #[test]
  fn test_snapshot_cached_at_is_epoch_millis() {
    let snapshot = snapshot_at(DateTime::from_timestamp_millis(1_700_000_000_123).unwrap());
    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["cachedAt"], 1_700_000_000_123i64);
    assert_eq!(value["version"], CACHE_VERSION);
  }

  #[test]
  fn test_missing_or_corrupt_queue_is_empty() {
    let storage = MemoryStorage::new();
    let keys = StoreKeys::with_namespace("test");
    let store = LocalStore::new(storage, keys.clone());
    assert_eq!(store.get_queue(), PendingQueue::default());

    store.storage.set_item(&keys.pending, "{oops").unwrap();
    let queue = store.get_queue();
    assert!(!queue.has_changes());
  }

  #[test]
  fn test_partial_queue_fills_missing_lists() {
    let store = store();
    store
      .storage
      .set_item(&store.keys.pending, r#"{"deleted_entries":[4]}"#)
      .unwrap();

    let queue = store.get_queue();
    assert_eq!(queue.deleted_entries, vec![RecordId::Server(4)]);
    assert!(queue.new_entries.is_empty());
    assert!(queue.has_changes());
  }

  #[test]
  fn test_update_and_clear_queue() {
    let store = store();
    let len = store.update_queue(|q| {
      q.deleted_products.push(RecordId::Server(9));
      q.total()
    });
    assert_eq!(len, 1);
    assert!(store.get_queue().has_changes());

    store.clear_queue();
    assert!(!store.get_queue().has_changes());
  }

  #[test]
  fn test_remove_flushed_keeps_later_items() {
    let mut flushed = PendingQueue::default();
    flushed.new_entries.push(entry());
    flushed.deleted_entries.push(RecordId::Server(3));

    let mut later = entry();
    later.weight = 250.0;

    let mut current = flushed.clone();
    current.new_entries.push(later.clone());
    current.deleted_products.push(RecordId::Server(8));

    current.remove_flushed(&flushed);
    assert_eq!(current.new_entries, vec![later]);
    assert!(current.deleted_entries.is_empty());
    assert_eq!(current.deleted_products, vec![RecordId::Server(8)]);
  }

  #[test]
  fn test_set_queue_round_trips() {
    let store = store();
    let mut queue = PendingQueue::default();
    queue.new_entries.push(entry());
    store.set_queue(&queue);
    assert_eq!(store.get_queue(), queue);
  }
}
