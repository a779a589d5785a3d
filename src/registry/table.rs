//! Connection Registry
//!
//! The registry is the only state shared between connection workers. It
//! maps identifiers to live connections behind a single `RwLock`, so
//! insert, remove and snapshot are linearizable with respect to each other.
//!
//! ## Concurrency Model
//!
//! ```text
//!   Listener ──register()──┐
//!                          ▼
//!                ┌───────────────────┐
//!                │ RwLock<HashMap<   │  one writer at a time
//!                │   ConnectionId,   │
//!                │   Arc<Connection>>│
//!                └───────────────────┘
//!                  ▲             │
//! Supervisor ──deregister()      └──snapshot()──> Router (broadcast)
//! ```
//!
//! Readers never hold the lock while doing I/O: iteration clones the `Arc`s
//! under the read lock and works on that snapshot.

use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::error::{RelayError, RelayResult};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Table of all live connections of one server instance.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an open connection.
    ///
    /// # Errors
    ///
    /// - [`RelayError::DuplicateIdentifier`] if the identifier is taken
    /// - [`RelayError::ClosedConnection`] if the connection is not Open
    pub fn register(&self, connection: Arc<Connection>) -> RelayResult<()> {
        let id = connection.id();
        if connection.state() != ConnectionState::Open {
            return Err(RelayError::ClosedConnection(id));
        }

        match self.write().entry(id) {
            Entry::Occupied(_) => Err(RelayError::DuplicateIdentifier(id)),
            Entry::Vacant(slot) => {
                slot.insert(connection);
                trace!(conn = %id, "Registered connection");
                Ok(())
            }
        }
    }

    /// Removes the connection with `id`, if present.
    ///
    /// Removing an absent identifier is a no-op, so both the receive loop
    /// and the supervisor may call this for the same connection.
    pub fn deregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.write().remove(&id);
        if removed.is_some() {
            trace!(conn = %id, "Deregistered connection");
        }
        removed
    }

    /// Removes `connection` only if it is the registered holder of its id.
    ///
    /// Returns true if an entry was removed.
    pub fn deregister_connection(&self, connection: &Connection) -> bool {
        let mut connections = self.write();
        match connections.entry(connection.id()) {
            Entry::Occupied(entry) if std::ptr::eq(Arc::as_ptr(entry.get()), connection) => {
                entry.remove();
                trace!(conn = %connection.id(), "Deregistered connection");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Identifiers of all registered connections, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().keys().copied().collect()
    }

    /// A point-in-time copy of every registered connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.read().values().cloned().collect()
    }

    /// Visits every connection registered at the time of the call.
    ///
    /// The visitor runs without the lock held, so it may itself register
    /// or deregister connections. Each connection is visited once.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for connection in self.snapshot() {
            visitor(&connection);
        }
    }
}
