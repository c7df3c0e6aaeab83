//! TOLLGATE Policy - Connection
//! File Path: services/policy/src/connection.rs
//! Responsibility: One peer session with its token and its write-once decision
//!
//! State machine: Unestablished -> Identified -> {Granted | Denied}.
//! Granted and Denied are terminal until teardown. A reconnecting peer gets
//! a fresh Connection and is evaluated from scratch.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::auth::{IdentityToken, PeerIdentity};
use crate::authorizer::AuthorizationDecision;

/// Process-unique connection identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, identity not captured yet
    Unestablished,
    /// Identity captured, not evaluated yet
    Identified,
    Granted,
    Denied,
    /// Torn down; any cached decision is no longer honoured
    Invalidated,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    token: Option<IdentityToken>,
    decision: OnceLock<AuthorizationDecision>,
    live: AtomicBool,
}

impl Connection {
    /// A freshly accepted connection with no identity and no decision.
    pub fn accept() -> Self {
        Self {
            id: ConnectionId::next(),
            token: None,
            decision: OnceLock::new(),
            live: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Attach the token captured on accept. Only valid before evaluation.
    pub(crate) fn attach_identity(&mut self, token: IdentityToken) {
        debug_assert!(self.token.is_none(), "identity captured twice");
        debug_assert!(self.decision.get().is_none(), "identity attached after evaluation");
        self.token = Some(token);
    }

    pub(crate) fn token(&self) -> Option<&IdentityToken> {
        self.token.as_ref()
    }

    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.token.as_ref().map(IdentityToken::identity)
    }

    /// Store the decision on first call; later calls return the cached value
    /// without running `decide`.
    pub(crate) fn decide_with<F>(&self, decide: F) -> &AuthorizationDecision
    where
        F: FnOnce() -> AuthorizationDecision,
    {
        self.decision.get_or_init(decide)
    }

    pub fn decision(&self) -> Option<&AuthorizationDecision> {
        self.decision.get()
    }

    pub fn state(&self) -> ConnectionState {
        if !self.is_live() {
            return ConnectionState::Invalidated;
        }
        match (self.decision.get(), &self.token) {
            (Some(AuthorizationDecision::Granted), _) => ConnectionState::Granted,
            (Some(AuthorizationDecision::Denied(_)), _) => ConnectionState::Denied,
            (None, Some(_)) => ConnectionState::Identified,
            (None, None) => ConnectionState::Unestablished,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Mark the connection torn down. Returns `false` if it already was.
    pub fn invalidate(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}
