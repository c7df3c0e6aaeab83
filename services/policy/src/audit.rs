//! TOLLGATE Policy - Diagnostics Audit Ring
//! File Path: services/policy/src/audit.rs
//! Responsibility: Keep the last few authorization events for local inspection
//! Note: Never sent to peers. Detailed denial reasons live here and in the logs only.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use heapless::HistoryBuffer;

use crate::authorizer::AuthorizationDecision;
use crate::connection::{Connection, ConnectionId};

/// Number of events retained; older ones are overwritten.
pub const AUDIT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// The connection was evaluated (happens once per connection)
    Evaluated(AuthorizationDecision),
    /// The gate refused a privileged call
    Refused,
    /// The connection was removed from dispatch
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub at: SystemTime,
    pub connection: ConnectionId,
    pub uid: Option<u32>,
    pub action: AuditAction,
}

/// Fixed-capacity ring of recent [`AuditEvent`]s.
pub struct AuditLog {
    ring: Mutex<HistoryBuffer<AuditEvent, AUDIT_CAPACITY>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(HistoryBuffer::new()),
        }
    }

    pub fn record(&self, connection: &Connection, action: AuditAction) {
        let event = AuditEvent {
            at: SystemTime::now(),
            connection: connection.id(),
            uid: connection.identity().map(|i| i.uid()),
            action,
        };
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(event);
    }

    /// Retained events, oldest first.
    pub fn recent(&self) -> Vec<AuditEvent> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .oldest_ordered()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog").field("len", &self.len()).finish()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_keeps_most_recent() {
        let log = AuditLog::new();
        let conns: Vec<Connection> = (0..AUDIT_CAPACITY + 8).map(|_| Connection::accept()).collect();
        for conn in &conns {
            log.record(conn, AuditAction::TornDown);
        }

        let events = log.recent();
        assert_eq!(events.len(), AUDIT_CAPACITY);
        assert_eq!(events[0].connection, conns[8].id());
        assert_eq!(events.last().map(|e| e.connection), conns.last().map(Connection::id));
    }

    #[test]
    fn test_uid_absent_without_identity() {
        let log = AuditLog::new();
        log.record(&Connection::accept(), AuditAction::Refused);
        assert_eq!(log.recent()[0].uid, None);
    }
}
