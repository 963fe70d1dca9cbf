//! In-process shared store.
//!
//! Implements [`SyncChannel`] over a map of session records. Clones share the
//! same records, so two managers holding clones behave like two clients of
//! one remote database. Used for hot-seat play and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::board::BoardRecord;
use super::channel::{ChangeCallback, StoreError, SubscriptionHandle, SyncChannel};
use super::identity::SessionCode;

#[derive(Default)]
struct Entry {
    value: Option<BoardRecord>,
    subscribers: HashMap<u64, ChangeCallback>,
}

impl Entry {
    fn notify(&self, record: &BoardRecord) {
        for on_change in self.subscribers.values() {
            on_change(record.clone());
        }
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    next_subscription_id: u64,
    available: bool,
    delivery_paused: bool,
    /// Notifications held back while delivery is paused, in write order
    held: Vec<(String, BoardRecord)>,
    writes: usize,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_subscription_id: 0,
            available: true,
            delivery_paused: false,
            held: Vec::new(),
            writes: 0,
        }
    }
}

/// Shared in-memory session store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    /// Simulate an outage. While unavailable, publish and subscribe fail.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.available = available;
        }
    }

    /// Hold back change notifications, modelling network latency. Writes
    /// still land. Resuming delivers everything held, in write order.
    pub fn set_delivery_paused(&self, paused: bool) {
        let Ok(mut inner) = self.lock() else { return };
        inner.delivery_paused = paused;
        if !paused {
            let held = std::mem::take(&mut inner.held);
            for (path, record) in held {
                if let Some(entry) = inner.entries.get(&path) {
                    entry.notify(&record);
                }
            }
        }
    }

    /// Current record of a session.
    pub fn record(&self, session_code: &SessionCode) -> Option<BoardRecord> {
        let inner = self.lock().ok()?;
        inner
            .entries
            .get(&session_code.store_path())
            .and_then(|e| e.value.clone())
    }

    /// Overwrite a record directly, as another writer would.
    pub fn put(&self, session_code: &SessionCode, record: BoardRecord) {
        if let Ok(mut inner) = self.lock() {
            write(&mut inner, session_code.store_path(), record);
        }
    }

    /// Number of successful writes across all sessions.
    pub fn write_count(&self) -> usize {
        self.lock().map(|inner| inner.writes).unwrap_or(0)
    }

    /// Number of live subscriptions on a session.
    pub fn subscriber_count(&self, session_code: &SessionCode) -> usize {
        self.lock()
            .ok()
            .and_then(|inner| {
                inner
                    .entries
                    .get(&session_code.store_path())
                    .map(|e| e.subscribers.len())
            })
            .unwrap_or(0)
    }
}

// Notifies under the store lock so delivery order matches write order.
fn write(inner: &mut Inner, path: String, record: BoardRecord) {
    inner.writes += 1;
    if inner.delivery_paused {
        inner.held.push((path.clone(), record.clone()));
    }
    let entry = inner.entries.entry(path).or_default();
    entry.value = Some(record.clone());
    if !inner.delivery_paused {
        entry.notify(&record);
    }
}

#[async_trait]
impl SyncChannel for MemoryStore {
    fn subscribe(
        &self,
        session_code: &SessionCode,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, StoreError> {
        let mut inner = self.lock()?;
        if !inner.available {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;

        let entry = inner.entries.entry(session_code.store_path()).or_default();
        if let Some(value) = &entry.value {
            on_change(value.clone());
        }
        entry.subscribers.insert(id, on_change);

        Ok(SubscriptionHandle {
            session_code: session_code.clone(),
            id,
        })
    }

    async fn publish(
        &self,
        session_code: &SessionCode,
        record: BoardRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.available {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        write(&mut inner, session_code.store_path(), record);
        Ok(())
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let Ok(mut inner) = self.lock() else { return };
        if let Some(entry) = inner.entries.get_mut(&handle.session_code.store_path()) {
            entry.subscribers.remove(&handle.id);
        }
    }
}
