//! Routes connection status changes to subscribers.
//!
//! A per-connection subscriber takes precedence over the global one; an event with neither
//! is dropped. Subscribers run outside the registry lock, so they may (un)register freely.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::handle::ConnectionHandle;
use crate::types::StatusChanged;

/// Subscriber for connection status changes.
pub type StatusCallback = Arc<dyn Fn(&StatusChanged) + Send + Sync>;

/// Who received a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Connection,
    Global,
    Dropped,
}

#[derive(Default)]
struct Callbacks {
    global: Option<StatusCallback>,
    per_connection: HashMap<ConnectionHandle, StatusCallback>,
}

/// Subscriber registry owned by one session.
#[derive(Default)]
pub struct CallbackRegistry {
    inner: RwLock<Callbacks>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking subscriber never runs under the lock, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Callbacks> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Callbacks> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Set or clear (`None`) the global subscriber.
    pub fn set_global(&self, callback: Option<StatusCallback>) {
        self.write().global = callback;
    }

    /// Set or clear (`None`) the subscriber for one connection.
    pub fn set_for_connection(&self, conn: ConnectionHandle, callback: Option<StatusCallback>) {
        let mut callbacks = self.write();
        match callback {
            Some(cb) => {
                callbacks.per_connection.insert(conn, cb);
            }
            None => {
                callbacks.per_connection.remove(&conn);
            }
        }
    }

    pub fn clear_for_connection(&self, conn: ConnectionHandle) {
        self.write().per_connection.remove(&conn);
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        let mut callbacks = self.write();
        callbacks.global = None;
        callbacks.per_connection.clear();
    }

    pub fn has_connection_subscriber(&self, conn: ConnectionHandle) -> bool {
        self.read().per_connection.contains_key(&conn)
    }

    pub fn dispatch(&self, event: &StatusChanged) -> Delivery {
        let (callback, delivery) = {
            let callbacks = self.read();
            match callbacks.per_connection.get(&event.connection) {
                Some(cb) => (Some(Arc::clone(cb)), Delivery::Connection),
                None => match &callbacks.global {
                    Some(cb) => (Some(Arc::clone(cb)), Delivery::Global),
                    None => (None, Delivery::Dropped),
                },
            }
        };
        trace!(conn = %event.connection, ?delivery, "status change");
        if let Some(cb) = callback {
            cb(event);
        }
        delivery
    }
}
