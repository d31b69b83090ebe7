use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use super::StoreError;
use crate::order::OrderId;
use crate::outbox::EventId;

pub(crate) type TxId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RowKey {
    Order(OrderId),
    Outbox(EventId),
    Dlq(OrderId),
}

/// Row locks owned by transactions, backed by `Mutex<HashMap>` + `Condvar`.
///
/// A lock belongs to the transaction that took it until that transaction
/// calls [`release_all`](Self::release_all). Re-locking a row you already
/// hold succeeds immediately.
pub(crate) struct RowLocks {
    held: Mutex<HashMap<RowKey, TxId>>,
    released: Condvar,
}

impl RowLocks {
    pub(crate) fn new() -> Self {
        RowLocks {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    /// Block until `key` is free, then take it.
    pub(crate) fn lock(&self, key: RowKey, tx: TxId) -> Result<(), StoreError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| StoreError::LockPoisoned("row lock"))?;
        loop {
            match held.get(&key) {
                Some(owner) if *owner != tx => {
                    held = self
                        .released
                        .wait(held)
                        .map_err(|_| StoreError::LockPoisoned("row lock"))?;
                }
                _ => break,
            }
        }
        held.insert(key, tx);
        Ok(())
    }

    /// Take `key` if nobody else holds it. Never waits.
    pub(crate) fn try_lock(&self, key: RowKey, tx: TxId) -> Result<bool, StoreError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| StoreError::LockPoisoned("row lock"))?;
        match held.get(&key) {
            Some(owner) if *owner != tx => Ok(false),
            _ => {
                held.insert(key, tx);
                Ok(true)
            }
        }
    }

    pub(crate) fn release_all<I>(&self, tx: TxId, keys: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = RowKey>,
    {
        let mut held = self
            .held
            .lock()
            .map_err(|_| StoreError::LockPoisoned("row lock"))?;
        for key in keys {
            if held.get(&key) == Some(&tx) {
                held.remove(&key);
            }
        }
        self.released.notify_all();
        Ok(())
    }
}
