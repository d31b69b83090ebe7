use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::row_lock::{RowKey, RowLocks, TxId};
use super::{DlqRepository, OrderRepository, OutboxRepository, Store, StoreError, Transaction};
use crate::dlq::{clamp_list_limit, DlqEntry};
use crate::order::{Order, OrderId};
use crate::outbox::{EventId, OutboxBacklog, OutboxEvent, OutboxStatus};

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    outbox: HashMap<EventId, OutboxEvent>,
    dlq: HashMap<OrderId, DlqEntry>,
}

struct Shared {
    tables: RwLock<Tables>,
    locks: RowLocks,
    next_tx: AtomicU64,
    available: AtomicBool,
}

/// Transactional in-memory storage for orders, outbox rows and DLQ entries.
///
/// Cloning creates another handle to the same storage. Transactions stage
/// their writes privately and apply them in one step on commit; row locks
/// give `SELECT ... FOR UPDATE` and `SKIP LOCKED` behaviour across threads.
///
/// ## Example
///
/// ```
/// use chrono::Utc;
/// use order_pipeline::{InMemoryStore, Order, OrderId, OrderRepository, Store, Transaction};
///
/// let store = InMemoryStore::new();
/// let order = Order::new_pending(OrderId::new(), Utc::now());
///
/// let mut tx = store.begin().unwrap();
/// tx.save_order(&order).unwrap();
/// tx.commit().unwrap();
///
/// assert_eq!(store.order(order.id()).unwrap(), Some(order));
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                locks: RowLocks::new(),
                next_tx: AtomicU64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate an outage: while unavailable, `begin` and `commit` fail.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Committed state of one order.
    pub fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.read_tables()?.orders.get(&id).cloned())
    }

    /// Committed outbox rows, oldest first.
    pub fn outbox_events(&self) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut events: Vec<_> = self.read_tables()?.outbox.values().cloned().collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    /// Committed DLQ entries, newest first.
    pub fn dlq_entries(&self) -> Result<Vec<DlqEntry>, StoreError> {
        let mut entries: Vec<_> = self.read_tables()?.dlq.values().cloned().collect();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    fn read_tables(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.shared
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("tables"))
    }

    fn check_available(shared: &Shared) -> Result<(), StoreError> {
        if shared.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".into()))
        }
    }
}

impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        Self::check_available(&self.shared)?;
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            id: self.shared.next_tx.fetch_add(1, Ordering::SeqCst),
            held: HashSet::new(),
            orders: HashMap::new(),
            outbox: HashMap::new(),
            dlq: HashMap::new(),
        })
    }
}

/// Open transaction against an [`InMemoryStore`].
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    id: TxId,
    held: HashSet<RowKey>,
    orders: HashMap<OrderId, Order>,
    outbox: HashMap<EventId, OutboxEvent>,
    // `None` marks a staged delete.
    dlq: HashMap<OrderId, Option<DlqEntry>>,
}

impl InMemoryTransaction {
    fn read_tables(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.shared
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("tables"))
    }

    fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        if !self.held.contains(&key) {
            self.shared.locks.lock(key, self.id)?;
            self.held.insert(key);
        }
        Ok(())
    }

    fn try_acquire(&mut self, key: RowKey) -> Result<bool, StoreError> {
        if self.held.contains(&key) {
            return Ok(true);
        }
        let acquired = self.shared.locks.try_lock(key, self.id)?;
        if acquired {
            self.held.insert(key);
        }
        Ok(acquired)
    }

    fn release(&mut self, key: RowKey) -> Result<(), StoreError> {
        self.held.remove(&key);
        self.shared.locks.release_all(self.id, [key])
    }

    fn current_event(&self, id: EventId) -> Result<Option<OutboxEvent>, StoreError> {
        if let Some(event) = self.outbox.get(&id) {
            return Ok(Some(event.clone()));
        }
        Ok(self.read_tables()?.outbox.get(&id).cloned())
    }

    /// Committed rows overlaid with this transaction's staged rows.
    fn outbox_view(&self) -> Result<Vec<OutboxEvent>, StoreError> {
        let tables = self.read_tables()?;
        let mut rows: Vec<OutboxEvent> = tables
            .outbox
            .values()
            .filter(|e| !self.outbox.contains_key(&e.id))
            .cloned()
            .collect();
        rows.extend(self.outbox.values().cloned());
        rows.sort_by_key(|e| (e.created_at, e.id));
        Ok(rows)
    }

    fn dlq_view(&self) -> Result<Vec<DlqEntry>, StoreError> {
        let tables = self.read_tables()?;
        let mut entries: Vec<DlqEntry> = tables
            .dlq
            .values()
            .filter(|e| !self.dlq.contains_key(&e.order_id))
            .cloned()
            .collect();
        entries.extend(self.dlq.values().flatten().cloned());
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    fn update_event<F>(&mut self, id: EventId, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut OutboxEvent),
    {
        self.acquire(RowKey::Outbox(id))?;
        let mut event = self
            .current_event(id)?
            .ok_or(StoreError::EventNotFound(id))?;
        apply(&mut event);
        self.outbox.insert(id, event);
        Ok(())
    }
}

impl OrderRepository for InMemoryTransaction {
    fn save_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.acquire(RowKey::Order(order.id()))?;
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }

    fn find_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        if let Some(order) = self.orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        Ok(self.read_tables()?.orders.get(&id).cloned())
    }

    fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.acquire(RowKey::Order(id))?;
        self.find_order(id)
    }
}

impl OutboxRepository for InMemoryTransaction {
    fn enqueue(&mut self, event: OutboxEvent) -> Result<(), StoreError> {
        self.acquire(RowKey::Outbox(event.id))?;
        self.outbox.insert(event.id, event);
        Ok(())
    }

    fn claim_ready(
        &mut self,
        limit: usize,
        now: DateTime<Utc>,
        claimant: &str,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut claimed = Vec::new();
        if limit == 0 {
            return Ok(claimed);
        }
        for candidate in self.outbox_view()? {
            if !candidate.is_ready(now) {
                continue;
            }
            let key = RowKey::Outbox(candidate.id);
            let already_held = self.held.contains(&key);
            if !self.try_acquire(key)? {
                continue;
            }
            // The view predates the lock; another claimant may have taken
            // and settled the row in between.
            match self.current_event(candidate.id)? {
                Some(event) if event.is_ready(now) => {
                    claimed.push(event);
                    if claimed.len() == limit {
                        break;
                    }
                }
                _ if !already_held => self.release(key)?,
                _ => {}
            }
        }
        debug!(claimant, claimed = claimed.len(), "claimed outbox rows");
        Ok(claimed)
    }

    fn mark_processing(
        &mut self,
        id: EventId,
        locked_at: DateTime<Utc>,
        claimant: &str,
    ) -> Result<(), StoreError> {
        self.update_event(id, |event| event.lock(locked_at, claimant))
    }

    fn mark_processed(
        &mut self,
        id: EventId,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_event(id, |event| {
            event.unlock();
            event.status = OutboxStatus::Processed;
            event.processed_at = Some(processed_at);
        })
    }

    fn reschedule(
        &mut self,
        id: EventId,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), StoreError> {
        self.update_event(id, |event| {
            event.unlock();
            event.attempts += 1;
            event.next_attempt_at = next_attempt_at;
            event.last_error = Some(last_error.to_string());
        })
    }

    fn mark_failed(
        &mut self,
        id: EventId,
        failed_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), StoreError> {
        self.update_event(id, |event| {
            event.unlock();
            event.status = OutboxStatus::Failed;
            event.processed_at = Some(failed_at);
            event.last_error = Some(last_error.to_string());
        })
    }

    fn release_stale_locks(&mut self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut released = 0;
        for candidate in self.outbox_view()? {
            if !is_stale(&candidate, older_than) {
                continue;
            }
            let key = RowKey::Outbox(candidate.id);
            let already_held = self.held.contains(&key);
            if !self.try_acquire(key)? {
                continue;
            }
            match self.current_event(candidate.id)? {
                Some(mut event) if is_stale(&event, older_than) => {
                    event.unlock();
                    self.outbox.insert(event.id, event);
                    released += 1;
                }
                _ if !already_held => self.release(key)?,
                _ => {}
            }
        }
        Ok(released)
    }

    fn find_event(&mut self, id: EventId) -> Result<Option<OutboxEvent>, StoreError> {
        self.current_event(id)
    }

    fn backlog(&mut self) -> Result<OutboxBacklog, StoreError> {
        let mut backlog = OutboxBacklog::default();
        for event in self.outbox_view()? {
            match event.status {
                OutboxStatus::Pending => backlog.pending += 1,
                OutboxStatus::Processing => backlog.processing += 1,
                OutboxStatus::Processed | OutboxStatus::Failed => {}
            }
        }
        Ok(backlog)
    }
}

impl DlqRepository for InMemoryTransaction {
    fn save_dlq_entry(
        &mut self,
        order_id: OrderId,
        reason: &str,
        retry_count: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<DlqEntry, StoreError> {
        self.acquire(RowKey::Dlq(order_id))?;
        let entry = DlqEntry {
            order_id,
            reason: reason.to_string(),
            retry_count,
            failed_at,
        };
        self.dlq.insert(order_id, Some(entry.clone()));
        Ok(entry)
    }

    fn find_all_dlq(&mut self) -> Result<Vec<DlqEntry>, StoreError> {
        self.dlq_view()
    }

    fn find_latest_dlq(&mut self, limit: usize) -> Result<Vec<DlqEntry>, StoreError> {
        let mut entries = self.dlq_view()?;
        entries.truncate(clamp_list_limit(limit));
        Ok(entries)
    }

    fn find_dlq_by_order_id(&mut self, order_id: OrderId) -> Result<Option<DlqEntry>, StoreError> {
        if let Some(staged) = self.dlq.get(&order_id) {
            return Ok(staged.clone());
        }
        Ok(self.read_tables()?.dlq.get(&order_id).cloned())
    }

    fn delete_dlq_by_order_id(&mut self, order_id: OrderId) -> Result<bool, StoreError> {
        self.acquire(RowKey::Dlq(order_id))?;
        let existed = self.find_dlq_by_order_id(order_id)?.is_some();
        self.dlq.insert(order_id, None);
        Ok(existed)
    }
}

impl Transaction for InMemoryTransaction {
    fn commit(mut self) -> Result<(), StoreError> {
        InMemoryStore::check_available(&self.shared)?;
        let mut tables = self
            .shared
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("tables"))?;
        tables.orders.extend(self.orders.drain());
        tables.outbox.extend(self.outbox.drain());
        for (order_id, entry) in self.dlq.drain() {
            match entry {
                Some(entry) => {
                    tables.dlq.insert(order_id, entry);
                }
                None => {
                    tables.dlq.remove(&order_id);
                }
            }
        }
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        // Releasing locks is the last step of both commit and rollback.
        let _ = self
            .shared
            .locks
            .release_all(self.id, self.held.drain());
    }
}

fn is_stale(event: &OutboxEvent, older_than: DateTime<Utc>) -> bool {
    event.status == OutboxStatus::Processing && event.locked_at.is_some_and(|at| at < older_than)
}

fn sort_newest_first(entries: &mut [DlqEntry]) {
    entries.sort_by(|a, b| {
        b.failed_at
            .cmp(&a.failed_at)
            .then_with(|| a.order_id.cmp(&b.order_id))
    });
}
