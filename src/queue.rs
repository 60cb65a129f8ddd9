//! Pending-mutation queue built on the local store.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::types::TEMP_ID_PREFIX;
use crate::api::{Entry, Product, RecordId};
use crate::store::{KeyValueStorage, LocalStore, PendingQueue};

/// Generates `temp_<n>` ids from the millisecond clock.
///
/// `n` never repeats and never goes backwards within a process, even for
/// calls inside the same millisecond or across a clock step back.
#[derive(Debug, Default)]
pub struct TempIdGenerator {
  last: AtomicI64,
}

impl TempIdGenerator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next_id(&self) -> String {
    self.next_id_after(0)
  }

  /// Like [`next_id`](Self::next_id), but also strictly above `floor`.
  pub fn next_id_after(&self, floor: i64) -> String {
    let now = Utc::now().timestamp_millis();
    let mut last = self.last.load(Ordering::Relaxed);
    loop {
      let candidate = now.max(last + 1).max(floor + 1);
      match self
        .last
        .compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
      {
        Ok(_) => return format!("{}{}", TEMP_ID_PREFIX, candidate),
        Err(current) => last = current,
      }
    }
  }
}

/// Ordered, categorized queue of unsynced writes.
///
/// Every mutation is a single read-modify-write of the stored queue.
pub struct MutationQueue<S: KeyValueStorage> {
  store: Arc<LocalStore<S>>,
  ids: TempIdGenerator,
}

impl<S: KeyValueStorage> MutationQueue<S> {
  pub fn new(store: Arc<LocalStore<S>>) -> Self {
    Self {
      store,
      ids: TempIdGenerator::new(),
    }
  }

  /// Queue a new entry, returning the temp id it was tagged with.
  pub fn enqueue_entry(&self, mut entry: Entry) -> String {
    if entry.server_product_id().is_none() {
      warn!(
        product = ?entry.product.product_id(),
        "Queued entry has no server product id, the server will reject the batch"
      );
    }

    let temp_id = self.store.update_queue(|queue| {
      let temp_id = self.ids.next_id_after(highest_temp_number(queue));
      entry.temp_id = Some(temp_id.clone());
      entry.offline = true;
      queue.new_entries.push(entry);
      temp_id
    });
    debug!(temp_id = %temp_id, "Queued new entry");
    temp_id
  }

  /// Forget a queued entry (temp id) or queue a server-side deletion.
  pub fn dequeue_entry(&self, id: &RecordId) {
    if id.is_temp() {
      self
        .store
        .update_queue(|queue| queue.new_entries.retain(|e| !e.has_temp_id(id)));
      debug!(%id, "Dropped unsynced entry");
    } else {
      self
        .store
        .update_queue(|queue| queue.deleted_entries.push(id.clone()));
      debug!(%id, "Queued entry deletion");
    }
  }

  /// Queue a new product, returning the temp id it was tagged with.
  pub fn enqueue_product(&self, mut product: Product) -> String {
    let temp_id = self.store.update_queue(|queue| {
      let temp_id = self.ids.next_id_after(highest_temp_number(queue));
      product.temp_id = Some(temp_id.clone());
      product.offline = true;
      queue.new_products.push(product);
      temp_id
    });
    debug!(temp_id = %temp_id, "Queued new product");
    temp_id
  }

  /// Forget a queued product (temp id) or queue a server-side deletion.
  pub fn dequeue_product(&self, id: &RecordId) {
    if id.is_temp() {
      self
        .store
        .update_queue(|queue| queue.new_products.retain(|p| !p.has_temp_id(id)));
      debug!(%id, "Dropped unsynced product");
    } else {
      self
        .store
        .update_queue(|queue| queue.deleted_products.push(id.clone()));
      debug!(%id, "Queued product deletion");
    }
  }

  pub fn has_changes(&self) -> bool {
    self.store.get_queue().has_changes()
  }

  /// Current queue contents.
  pub fn pending(&self) -> PendingQueue {
    self.store.get_queue()
  }

  /// Drop everything queued.
  pub fn clear(&self) {
    self.store.clear_queue();
    debug!("Cleared pending queue");
  }

  /// Remove what a successful push delivered.
  ///
  /// Clears the queue when nothing was queued while the push was in flight;
  /// otherwise keeps only the newer items. Both happen in one queue write.
  pub fn acknowledge(&self, flushed: &PendingQueue) {
    let remaining = self.store.update_queue(|queue| {
      if *queue == *flushed {
        *queue = PendingQueue::default();
      } else {
        queue.remove_flushed(flushed);
      }
      queue.total()
    });

    if remaining > 0 {
      debug!(remaining, "Kept mutations queued during push");
    }
  }
}

/// Largest `n` among the `temp_<n>` ids already queued, or 0.
///
/// The queue outlives the process, so fresh ids must clear what an earlier
/// run handed out.
fn highest_temp_number(queue: &PendingQueue) -> i64 {
  let entry_ids = queue.new_entries.iter().filter_map(|e| e.temp_id.as_deref());
  let product_ids = queue.new_products.iter().filter_map(|p| p.temp_id.as_deref());

  entry_ids
    .chain(product_ids)
    .filter_map(|id| id.strip_prefix(TEMP_ID_PREFIX)?.parse::<i64>().ok())
    .max()
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::is_temp_id;
  use crate::api::{EntryProduct, MealType};
  use crate::store::{MemoryStorage, StoreKeys};
  use chrono::NaiveDate;
  use std::collections::HashSet;
  use std::sync::Barrier;
  use std::thread;

  fn queue() -> MutationQueue<MemoryStorage> {
    let store = LocalStore::new(MemoryStorage::new(), StoreKeys::with_namespace("test"));
    MutationQueue::new(Arc::new(store))
  }

  fn shared_store() -> Arc<LocalStore<MemoryStorage>> {
    Arc::new(LocalStore::new(
      MemoryStorage::new(),
      StoreKeys::with_namespace("test"),
    ))
  }

  fn entry(weight: f64) -> Entry {
    Entry::new(
      EntryProduct::catalog(RecordId::Server(1)),
      MealType::Dinner,
      weight,
      NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    )
  }

  #[test]
  fn test_temp_ids_are_unique_and_increasing() {
    let ids = TempIdGenerator::new();
    let generated: Vec<String> = (0..1000).map(|_| ids.next_id()).collect();

    assert!(generated.iter().all(|id| is_temp_id(id)));
    let unique: HashSet<_> = generated.iter().collect();
    assert_eq!(unique.len(), generated.len());

    let numbers: Vec<i64> = generated
      .iter()
      .map(|id| id[TEMP_ID_PREFIX.len()..].parse().unwrap())
      .collect();
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn test_enqueue_entry_tags_and_stores() {
    let queue = queue();
    assert!(!queue.has_changes());

    let temp_id = queue.enqueue_entry(entry(150.0));
    assert!(is_temp_id(&temp_id));

    let pending = queue.pending();
    assert_eq!(pending.new_entries.len(), 1);
    assert_eq!(pending.new_entries[0].temp_id.as_deref(), Some(temp_id.as_str()));
    assert!(pending.new_entries[0].offline);
    assert!(queue.has_changes());
  }

  #[test]
  fn test_enqueue_then_dequeue_temp_leaves_queue_empty() {
    let queue = queue();
    let temp_id = queue.enqueue_entry(entry(150.0));

    queue.dequeue_entry(&RecordId::Local(temp_id));

    let pending = queue.pending();
    assert!(pending.new_entries.is_empty());
    assert!(pending.deleted_entries.is_empty());
    assert!(!queue.has_changes());
  }

  #[test]
  fn test_dequeue_temp_removes_only_matching_entry() {
    let queue = queue();
    let first = queue.enqueue_entry(entry(100.0));
    let second = queue.enqueue_entry(entry(200.0));

    queue.dequeue_entry(&RecordId::Local(first));

    let pending = queue.pending();
    assert_eq!(pending.new_entries.len(), 1);
    assert_eq!(pending.new_entries[0].temp_id.as_deref(), Some(second.as_str()));
  }

  #[test]
  fn test_dequeue_server_id_appends_deletion() {
    let queue = queue();
    queue.enqueue_entry(entry(100.0));

    queue.dequeue_entry(&RecordId::Server(42));
    queue.dequeue_entry(&RecordId::Local("legacy-7".to_string()));

    let pending = queue.pending();
    assert_eq!(pending.new_entries.len(), 1);
    assert_eq!(
      pending.deleted_entries,
      vec![RecordId::Server(42), RecordId::Local("legacy-7".to_string())]
    );
  }

  #[test]
  fn test_products_mirror_entries() {
    let queue = queue();
    let temp_id = queue.enqueue_product(Product::new("Oats", 12.0, 6.0, 60.0));
    queue.enqueue_product(Product::new("Milk", 2.8, 2.5, 4.7));
    queue.dequeue_product(&RecordId::Local(temp_id));
    queue.dequeue_product(&RecordId::Server(5));

    let pending = queue.pending();
    assert_eq!(pending.new_products.len(), 1);
    assert_eq!(pending.new_products[0].name, "Milk");
    assert!(pending.new_products[0].offline);
    assert_eq!(pending.deleted_products, vec![RecordId::Server(5)]);
  }

  #[test]
  fn test_clear_empties_all_lists() {
    let queue = queue();
    queue.enqueue_entry(entry(100.0));
    queue.enqueue_product(Product::new("Oats", 12.0, 6.0, 60.0));
    queue.dequeue_entry(&RecordId::Server(1));
    queue.dequeue_product(&RecordId::Server(2));

    queue.clear();
    assert_eq!(queue.pending(), PendingQueue::default());
  }

  #[test]
  fn test_acknowledge_keeps_items_queued_during_push() {
    let queue = queue();
    queue.enqueue_entry(entry(100.0));
    let flushed = queue.pending();

    let later = queue.enqueue_entry(entry(300.0));
    queue.acknowledge(&flushed);

    let pending = queue.pending();
    assert_eq!(pending.new_entries.len(), 1);
    assert_eq!(pending.new_entries[0].temp_id.as_deref(), Some(later.as_str()));
  }

  #[test]
  fn test_acknowledge_unchanged_queue_clears_it() {
    let queue = queue();
    queue.enqueue_entry(entry(100.0));
    queue.dequeue_entry(&RecordId::Server(9));
    let flushed = queue.pending();

    queue.acknowledge(&flushed);
    assert!(!queue.has_changes());
  }

  #[test]
  fn test_acknowledge_races_with_enqueue() {
    let queue = Arc::new(queue());

    for _ in 0..500 {
      queue.enqueue_entry(entry(100.0));
      let flushed = queue.pending();

      let barrier = Arc::new(Barrier::new(2));
      let writer = {
        let queue = Arc::clone(&queue);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
          barrier.wait();
          queue.enqueue_entry(entry(300.0))
        })
      };

      barrier.wait();
      queue.acknowledge(&flushed);
      let later = writer.join().unwrap();

      let pending = queue.pending();
      assert!(
        pending
          .new_entries
          .iter()
          .any(|e| e.temp_id.as_deref() == Some(later.as_str())),
        "entry {} queued during acknowledge was lost",
        later
      );
      queue.clear();
    }
  }

  #[test]
  fn test_temp_ids_clear_ids_from_earlier_runs() {
    let store = shared_store();
    let ahead = Utc::now().timestamp_millis() + 1_000_000;

    // Queue left behind by another process whose clock ran ahead
    let mut stored = entry(100.0);
    stored.temp_id = Some(format!("{}{}", TEMP_ID_PREFIX, ahead));
    store.set_queue(&PendingQueue {
      new_entries: vec![stored],
      ..PendingQueue::default()
    });

    let queue = MutationQueue::new(Arc::clone(&store));
    let fresh = queue.enqueue_entry(entry(200.0));
    let product = queue.enqueue_product(Product::new("Oats", 12.0, 6.0, 60.0));

    let number = |id: &str| -> i64 { id[TEMP_ID_PREFIX.len()..].parse().unwrap() };
    assert!(number(&fresh) > ahead);
    assert!(number(&product) > number(&fresh));

    queue.dequeue_entry(&RecordId::Local(fresh));
    let pending = queue.pending();
    assert_eq!(pending.new_entries.len(), 1);
    assert_eq!(
      pending.new_entries[0].temp_id,
      Some(format!("{}{}", TEMP_ID_PREFIX, ahead))
    );
  }
}
