//! Sync orchestrator: network first, local queue as fallback.
//!
//! Every mutation tries the remote gateway first. If that fails for any
//! reason the mutation is queued locally and a provisional result is handed
//! back, so callers can proceed as if the write succeeded. Queued mutations
//! reach the server on the next successful [`SyncOrchestrator::push_changes`].

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{Entry, Product, RecordId, RemoteGateway, ServerState};
use crate::queue::MutationQueue;
use crate::store::{KeyValueStorage, LocalStore};

/// Outcome of a startup reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
  /// Fresh server state was pulled and cached
  pub pulled: bool,
  /// The pending queue was pushed and acknowledged
  pub flushed: bool,
  /// Mutations still waiting for the server
  pub pending: usize,
}

/// Snapshot and queue overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
  pub snapshot_cached_at: Option<DateTime<Utc>>,
  pub snapshot_valid: bool,
  pub new_entries: usize,
  pub deleted_entries: usize,
  pub new_products: usize,
  pub deleted_products: usize,
}

pub struct SyncOrchestrator<S: KeyValueStorage, G: RemoteGateway> {
  store: Arc<LocalStore<S>>,
  queue: MutationQueue<S>,
  gateway: G,
}

impl<S: KeyValueStorage, G: RemoteGateway> SyncOrchestrator<S, G> {
  pub fn new(store: LocalStore<S>, gateway: G) -> Self {
    let store = Arc::new(store);
    let queue = MutationQueue::new(Arc::clone(&store));
    Self {
      store,
      queue,
      gateway,
    }
  }

  pub fn store(&self) -> &LocalStore<S> {
    &self.store
  }

  pub fn queue(&self) -> &MutationQueue<S> {
    &self.queue
  }

  pub fn gateway(&self) -> &G {
    &self.gateway
  }

  async fn pull_and_cache(&self) -> Result<ServerState> {
    let state = self.gateway.pull().await?;
    self.store.set_snapshot(&state);
    info!(
      products = state.products.len(),
      entries = state.entries.len(),
      "Pulled server state"
    );
    Ok(state)
  }

  /// Pull server state, falling back to the cached snapshot (even a stale one).
  ///
  /// Never looks at the pending queue.
  pub async fn sync_all(&self) -> Option<ServerState> {
    match self.pull_and_cache().await {
      Ok(state) => Some(state),
      Err(e) => {
        warn!(error = %e, "Sync pull failed, using cached snapshot");
        self.store.get_snapshot().map(|snapshot| snapshot.data)
      }
    }
  }

  /// Send the whole pending queue in one batch. True if nothing is left to send.
  pub async fn push_changes(&self) -> bool {
    let pending = self.queue.pending();
    if !pending.has_changes() {
      return true;
    }

    match self.gateway.push(&pending).await {
      Ok(()) => {
        self.queue.acknowledge(&pending);
        info!(mutations = pending.total(), "Pushed pending changes");
        true
      }
      Err(e) => {
        warn!(error = %e, mutations = pending.total(), "Push failed, keeping queue");
        false
      }
    }
  }

  /// Create an entry, or queue it and return a provisional copy marked offline.
  pub async fn add_entry(&self, entry: Entry) -> Entry {
    match self.gateway.create_entry(&entry).await {
      Ok(mut confirmed) => {
        confirmed.temp_id = None;
        confirmed.offline = false;
        confirmed
      }
      Err(e) => {
        warn!(error = %e, "Creating entry failed, queueing it");
        let temp_id = self.queue.enqueue_entry(entry.clone());
        Entry {
          id: Some(RecordId::Local(temp_id)),
          offline: true,
          ..entry
        }
      }
    }
  }

  /// Delete an entry. Always reports success: a failed remote delete is queued.
  pub async fn delete_entry(&self, id: &RecordId) -> bool {
    if id.is_temp() {
      // Never reached the server, nothing to tell it
      self.queue.dequeue_entry(id);
      return true;
    }

    if let Err(e) = self.gateway.delete_entry(id).await {
      warn!(error = %e, %id, "Deleting entry failed, queueing deletion");
      self.queue.dequeue_entry(id);
    }
    true
  }

  /// Create a product, or queue it and return a provisional copy marked offline.
  pub async fn add_product(&self, product: Product) -> Product {
    match self.gateway.create_product(&product).await {
      Ok(mut confirmed) => {
        confirmed.temp_id = None;
        confirmed.offline = false;
        confirmed
      }
      Err(e) => {
        warn!(error = %e, "Creating product failed, queueing it");
        let temp_id = self.queue.enqueue_product(product.clone());
        Product {
          id: Some(RecordId::Local(temp_id)),
          offline: true,
          ..product
        }
      }
    }
  }

  /// Delete a product on the next push. The API has no single-product
  /// delete, so this only touches the queue.
  pub fn delete_product(&self, id: &RecordId) -> bool {
    self.queue.dequeue_product(id);
    true
  }

  /// Startup pass: refresh a stale cache, then flush anything queued.
  ///
  /// A failed pull means no connectivity, so the flush is skipped. After a
  /// successful flush the cache is pulled again to pick up server ids.
  pub async fn reconcile(&self) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    if !self.store.is_snapshot_valid() {
      match self.pull_and_cache().await {
        Ok(_) => report.pulled = true,
        Err(e) => {
          warn!(error = %e, "Server unreachable, skipping reconciliation");
          report.pending = self.queue.pending().total();
          return report;
        }
      }
    } else {
      debug!("Cached snapshot is fresh");
    }

    if self.queue.has_changes() && self.push_changes().await {
      report.flushed = true;
      report.pulled |= self.pull_and_cache().await.is_ok();
    }

    report.pending = self.queue.pending().total();
    report
  }

  pub fn status(&self) -> SyncStatus {
    let snapshot = self.store.get_snapshot();
    let pending = self.queue.pending();
    SyncStatus {
      snapshot_cached_at: snapshot.as_ref().map(|s| s.cached_at),
      snapshot_valid: snapshot.is_some_and(|s| s.is_valid_at(Utc::now())),
      new_entries: pending.new_entries.len(),
      deleted_entries: pending.deleted_entries.len(),
      new_products: pending.new_products.len(),
      deleted_products: pending.deleted_products.len(),
    }
  }
}
