//! TOLLGATE Policy - Connection Registry
//! File Path: services/policy/src/registry.rs
//! Responsibility: Track connections that are open for dispatch and tear them down

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::audit::{AuditAction, AuditLog};
use crate::connection::{Connection, ConnectionId};
use crate::error::AuthError;

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    audit: Arc<AuditLog>,
}

impl ConnectionRegistry {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Open a connection for dispatch.
    ///
    /// Refuses connections that have not been evaluated yet: nothing may be
    /// dispatched on a connection before its decision exists.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), AuthError> {
        if connection.decision().is_none() {
            return Err(AuthError::Unauthorized(connection.id()));
        }
        if !connection.is_live() {
            return Err(AuthError::ConnectionInvalidated(connection.id()));
        }

        debug!(connection = %connection.id(), "registered for dispatch");
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection.id(), connection);
        Ok(())
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Remove and invalidate a connection. In-flight calls on it will fail
    /// their next `ensure_live` check.
    pub fn teardown(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)?;

        removed.invalidate();
        self.audit.record(&removed, AuditAction::TornDown);
        debug!(connection = %id, "torn down");
        Some(removed)
    }

    /// Tear down every registered connection. Returns how many there were.
    pub fn invalidate_all(&self) -> usize {
        let drained: Vec<_> = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, conn)| conn)
            .collect();

        for conn in &drained {
            conn.invalidate();
            self.audit.record(conn, AuditAction::TornDown);
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::test_utils::{authorizer, identity, FakeProvider, CLIENT_EXE};

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(AuditLog::new()))
    }

    #[test]
    fn test_undecided_connection_not_registered() {
        let reg = registry();
        let conn = Arc::new(Connection::accept());
        assert_eq!(
            reg.register(conn.clone()),
            Err(AuthError::Unauthorized(conn.id()))
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_teardown_invalidates() {
        let reg = registry();
        let conn = Arc::new(
            authorizer().establish(&FakeProvider::peer(identity(1000, CLIENT_EXE)), &()),
        );
        reg.register(conn.clone()).expect("register");
        assert!(reg.get(conn.id()).is_some());

        let removed = reg.teardown(conn.id()).expect("present");
        assert_eq!(removed.state(), ConnectionState::Invalidated);
        assert!(reg.get(conn.id()).is_none());
        assert!(reg.teardown(conn.id()).is_none());
    }

    #[test]
    fn test_invalidate_all() {
        let reg = registry();
        let auth = authorizer();
        let conns: Vec<_> = (0..3)
            .map(|_| Arc::new(auth.establish(&FakeProvider::unavailable(), &())))
            .collect();
        for conn in &conns {
            reg.register(conn.clone()).expect("register");
        }

        assert_eq!(reg.invalidate_all(), 3);
        assert!(reg.is_empty());
        assert!(conns.iter().all(|c| !c.is_live()));
    }

    #[test]
    fn test_invalidated_connection_not_registered() {
        let reg = registry();
        let conn = Arc::new(authorizer().establish(&FakeProvider::unavailable(), &()));
        conn.invalidate();
        assert_eq!(
            reg.register(conn.clone()),
            Err(AuthError::ConnectionInvalidated(conn.id()))
        );
    }
}
