//! TOLLGATE Policy - Connection Authorizer
//! File Path: services/policy/src/authorizer.rs
//! Responsibility: Evaluate each connection exactly once and cache the result on it
//! Architecture: Accept -> Capture -> Evaluate -> Cache (no re-evaluation, ever)

use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::{AuditAction, AuditLog};
use crate::auth::{IdentityProvider, IdentityToken};
use crate::connection::Connection;
use crate::error::AuthError;
use crate::requirement::{Criterion, TrustRequirement};

/// Outcome of evaluating a connection. Never changes once stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Granted,
    Denied(DenialReason),
}

/// Why a connection was denied. Local diagnostics only; peers see a generic rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// No token could be captured
    IdentityUnavailable,
    /// The token failed this criterion
    PolicyMismatch(Criterion),
}

impl From<DenialReason> for AuthError {
    fn from(reason: DenialReason) -> Self {
        match reason {
            DenialReason::IdentityUnavailable => {
                AuthError::IdentityUnavailable("no identity captured on accept".to_string())
            }
            DenialReason::PolicyMismatch(criterion) => AuthError::PolicyMismatch(criterion),
        }
    }
}

impl AuthorizationDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthorizationDecision::Granted)
    }
}

/// Evaluate a token against a requirement.
///
/// Pure and deterministic: identical inputs always produce the same decision.
pub fn evaluate(token: &IdentityToken, requirement: &TrustRequirement) -> AuthorizationDecision {
    match requirement.check(token.identity()) {
        Ok(()) => AuthorizationDecision::Granted,
        Err(criterion) => AuthorizationDecision::Denied(DenialReason::PolicyMismatch(criterion)),
    }
}

/// Owns the process-wide trust requirement and applies it to connections.
#[derive(Debug, Clone)]
pub struct ConnectionAuthorizer {
    requirement: Arc<TrustRequirement>,
    audit: Arc<AuditLog>,
}

impl ConnectionAuthorizer {
    pub fn new(requirement: Arc<TrustRequirement>, audit: Arc<AuditLog>) -> Self {
        Self { requirement, audit }
    }

    pub fn requirement(&self) -> &TrustRequirement {
        &self.requirement
    }

    /// Accept a transport: capture its identity and decide, synchronously.
    ///
    /// The returned connection always carries a decision. A failed capture
    /// skips evaluation and is recorded as Denied.
    pub fn establish<T, P>(&self, provider: &P, transport: &T) -> Connection
    where
        T: ?Sized,
        P: IdentityProvider<T> + ?Sized,
    {
        let mut connection = Connection::accept();

        match provider.capture(transport) {
            Ok(token) => connection.attach_identity(token),
            Err(e) => warn!(connection = %connection.id(), error = %e, "identity capture failed"),
        }

        self.evaluate_connection(&connection);
        connection
    }

    /// Decide `connection` if it has not been decided yet.
    ///
    /// Returns the cached decision otherwise, even if this authorizer holds a
    /// different requirement than the one that produced it.
    pub fn evaluate_connection<'c>(&self, connection: &'c Connection) -> &'c AuthorizationDecision {
        let mut computed = false;
        let decision = connection.decide_with(|| {
            computed = true;
            match connection.token() {
                Some(token) => evaluate(token, &self.requirement),
                None => AuthorizationDecision::Denied(DenialReason::IdentityUnavailable),
            }
        });

        if computed {
            self.log_decision(connection, decision);
        }
        decision
    }

    fn log_decision(&self, connection: &Connection, decision: &AuthorizationDecision) {
        let uid = connection.identity().map(|i| i.uid());
        let exe = connection
            .identity()
            .map(|i| i.executable().path().display().to_string());

        match decision {
            AuthorizationDecision::Granted => {
                info!(connection = %connection.id(), uid = ?uid, exe = ?exe, "connection granted");
            }
            AuthorizationDecision::Denied(DenialReason::PolicyMismatch(criterion)) => {
                warn!(
                    connection = %connection.id(),
                    uid = ?uid,
                    exe = ?exe,
                    criterion = %criterion,
                    "connection denied: policy mismatch"
                );
            }
            AuthorizationDecision::Denied(DenialReason::IdentityUnavailable) => {
                warn!(connection = %connection.id(), "connection denied: identity unavailable");
            }
        }

        self.audit.record(connection, AuditAction::Evaluated(*decision));
    }
}
