//! Connection state table.
//!
//! One slot per connection. The map is only touched to look a slot up, put
//! one in or take one out; all per-connection work happens under the slot's
//! own async mutex, so shard locks are never held across an await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::{ConnectionId, ConnectionState, LesError};

pub(crate) struct ConnectionSlot {
    /// Set once, when the connection breaches or goes away. Readable without
    /// the state lock so in-flight work can notice.
    closed: AtomicBool,
    state: Mutex<ConnectionState>,
}

impl ConnectionSlot {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self {
            closed: AtomicBool::new(false),
            state: Mutex::new(state),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn state(&self) -> &Mutex<ConnectionState> {
        &self.state
    }
}

#[derive(Default)]
pub(crate) struct ConnectionTable {
    slots: DashMap<ConnectionId, Arc<ConnectionSlot>>,
}

impl ConnectionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a new connection. Fails if the id is already tracked.
    pub(crate) fn insert(
        &self,
        connection_id: ConnectionId,
        slot: Arc<ConnectionSlot>,
    ) -> Result<(), LesError> {
        match self.slots.entry(connection_id) {
            Entry::Occupied(entry) => Err(LesError::DuplicateConnection(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(slot);
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ConnectionSlot>> {
        self.slots.get(connection_id).map(|slot| Arc::clone(slot.value()))
    }

    pub(crate) fn remove(&self, connection_id: &ConnectionId) -> Option<Arc<ConnectionSlot>> {
        self.slots.remove(connection_id).map(|(_, slot)| slot)
    }

    /// Remove the entry only if it still holds `slot`.
    pub(crate) fn remove_slot(&self, connection_id: &ConnectionId, slot: &Arc<ConnectionSlot>) -> bool {
        self.slots
            .remove_if(connection_id, |_, current| Arc::ptr_eq(current, slot))
            .is_some()
    }

    pub(crate) fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.slots.contains_key(connection_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Remove and return every slot.
    pub(crate) fn drain(&self) -> Vec<(ConnectionId, Arc<ConnectionSlot>)> {
        let ids: Vec<ConnectionId> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.slots.remove(&id))
            .collect()
    }
}
