//! TOLLGATE Policy - Privileged Operation Gate
//! File Path: services/policy/src/gate.rs
//! Responsibility: Refuse every privileged call on a connection without a Granted decision
//!
//! Two-state guard. All operations share the connection's single decision;
//! there is no per-operation matrix and no per-call re-verification.

use std::sync::Arc;

use tracing::warn;

use crate::audit::{AuditAction, AuditLog};
use crate::auth::PeerIdentity;
use crate::connection::{Connection, ConnectionId};
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
}

#[derive(Debug, Clone)]
pub struct PrivilegedOperationGate {
    audit: Arc<AuditLog>,
}

impl PrivilegedOperationGate {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self { audit }
    }

    /// Read the cached decision. Missing, Denied or torn down all read as Denied.
    pub fn authorize(&self, connection: &Connection) -> Access {
        match connection.decision() {
            Some(decision) if decision.is_granted() && connection.is_live() => Access::Granted,
            _ => Access::Denied,
        }
    }

    /// Run `operation` only if `connection` is authorized.
    ///
    /// On refusal the closure is never called, so no privileged side effect
    /// can happen.
    pub fn invoke<R, F>(&self, connection: &Connection, operation: F) -> Result<R, AuthError>
    where
        F: FnOnce(&AuthorizedCall<'_>) -> R,
    {
        if self.authorize(connection) == Access::Denied {
            warn!(connection = %connection.id(), "privileged call refused");
            self.audit.record(connection, AuditAction::Refused);
            return Err(if connection.is_live() {
                AuthError::Unauthorized(connection.id())
            } else {
                AuthError::ConnectionInvalidated(connection.id())
            });
        }

        Ok(operation(&AuthorizedCall { connection }))
    }
}

/// Handed to an operation that passed the gate.
#[derive(Debug)]
pub struct AuthorizedCall<'a> {
    connection: &'a Connection,
}

impl AuthorizedCall<'_> {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.connection.identity()
    }

    /// Call right before committing a side effect: fails if the connection
    /// was torn down while the operation was running.
    pub fn ensure_live(&self) -> Result<(), AuthError> {
        if self.connection.is_live() {
            Ok(())
        } else {
            Err(AuthError::ConnectionInvalidated(self.connection.id()))
        }
    }
}
