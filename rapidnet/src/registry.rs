use crate::*;

use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A slot in a [`ConnectionRegistry`]'s admission gate.
///
/// Dropping the permit returns the slot. A registered connection's permit is
/// held by the registry and released when the connection is removed.
#[derive(Debug)]
pub struct AdmissionPermit(OwnedSemaphorePermit);

impl AdmissionPermit {
    /// Return the slot without registering a connection.
    pub fn release(self) {}
}

struct RegisteredConnection {
    connection: Connection,
    _permit: AdmissionPermit,
}

/// The set of live connections belonging to one server, bounded by a counting
/// admission gate.
///
/// A connection can only be added together with a permit, and removing it
/// drops that permit under the same lock, so the number of registered
/// connections never exceeds the capacity and every permit is released
/// exactly once.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, RegisteredConnection>>,
    admission: Arc<Semaphore>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            admission: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until a slot is free and claim it.
    pub async fn acquire(&self) -> Result<AdmissionPermit, ListenerError> {
        Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map(AdmissionPermit)
            .map_err(|_| ListenerError::AdmissionClosed)
    }

    /// Claim a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.admission)
            .try_acquire_owned()
            .ok()
            .map(AdmissionPermit)
    }

    /// Register a connection, consuming the permit that admitted it.
    pub fn add(&self, connection: Connection, permit: AdmissionPermit) {
        let id = connection.id();
        let previous = self.connections.lock().insert(
            id,
            RegisteredConnection {
                connection,
                _permit: permit,
            },
        );

        if previous.is_some() {
            tracing::error!(connection = %id, "Duplicate connection id registered");
        }
    }

    /// Unregister a connection and release its admission slot. Removing an
    /// ID that isn't registered is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let mut connections = self.connections.lock();
        connections.remove(&id).map(|entry| entry.connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections
            .lock()
            .get(&id)
            .map(|entry| entry.connection.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }

    /// Snapshot of the currently registered connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections
            .lock()
            .values()
            .map(|entry| entry.connection.clone())
            .collect()
    }

    /// Fail any pending and future [`acquire`](Self::acquire) calls.
    pub fn close(&self) {
        self.admission.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_connection(generator: &ConnectionIdGenerator) -> Connection {
        let (conn, _channels) = Connection::new(
            generator.next(),
            "127.0.0.1:9".parse().unwrap(),
            &ConnectionSettings::default(),
        );
        conn
    }

    #[tokio::test]
    async fn admission_is_bounded() {
        let registry = ConnectionRegistry::new(2);
        let generator = ConnectionIdGenerator::new(EndpointId::new(0), 1);

        let first = make_connection(&generator);
        let second = make_connection(&generator);

        registry.add(first.clone(), registry.acquire().await.unwrap());
        registry.add(second, registry.acquire().await.unwrap());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.available_permits(), 0);

        // The third acquire has to wait for a removal
        assert!(registry.try_acquire().is_none());
        assert!(timeout(Duration::from_millis(50), registry.acquire()).await.is_err());

        assert_eq!(registry.remove(first.id()), Some(first));
        assert_eq!(registry.available_permits(), 1);

        let third = make_connection(&generator);
        let permit = timeout(Duration::from_millis(50), registry.acquire())
            .await
            .expect("slot should be free")
            .unwrap();
        registry.add(third, permit);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn remove_releases_once() {
        let registry = ConnectionRegistry::new(1);
        let generator = ConnectionIdGenerator::new(EndpointId::new(0), 1);
        let conn = make_connection(&generator);

        registry.add(conn.clone(), registry.acquire().await.unwrap());
        assert!(registry.remove(conn.id()).is_some());
        assert!(registry.remove(conn.id()).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.available_permits(), 1);
    }

    #[tokio::test]
    async fn unused_permit_returned() {
        let registry = ConnectionRegistry::new(1);

        let permit = registry.acquire().await.unwrap();
        assert_eq!(registry.available_permits(), 0);
        permit.release();
        assert_eq!(registry.available_permits(), 1);
    }

    #[tokio::test]
    async fn closed_gate_fails_acquire() {
        let registry = ConnectionRegistry::new(1);
        let _held = registry.acquire().await.unwrap();

        registry.close();
        assert!(matches!(registry.acquire().await, Err(ListenerError::AdmissionClosed)));
    }
}
