//! TOLLGATE Policy: connection authorization for privileged helpers
//! File Path: services/policy/src/lib.rs
//! Responsibility: Decide once, at accept time, whether a peer may invoke privileged operations
//! Architecture: IdentityProvider -> ConnectionAuthorizer -> cached decision -> PrivilegedOperationGate
//!
//! # Flow
//! 1. The transport accepts a peer
//! 2. [`IdentityProvider`] captures its [`IdentityToken`] synchronously
//! 3. [`ConnectionAuthorizer`] evaluates the token against the
//!    [`TrustRequirement`] exactly once and stores the decision on the
//!    [`Connection`]
//! 4. The connection is registered for dispatch
//! 5. Every privileged call goes through [`PrivilegedOperationGate`]
//!
//! Denials fail closed. Missing data is always Denied, never Granted.

pub mod audit;
pub mod auth;
pub mod authorizer;
pub mod connection;
pub mod error;
pub mod gate;
pub mod registry;
pub mod requirement;

#[cfg(test)]
pub(crate) mod test_utils;

pub use audit::{AuditAction, AuditEvent, AuditLog, AUDIT_CAPACITY};
pub use auth::{IdentityProvider, IdentityToken, PeerIdentity, UnixPeerIdentityProvider};
pub use authorizer::{evaluate, AuthorizationDecision, ConnectionAuthorizer, DenialReason};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{AuthError, RequirementError};
pub use gate::{Access, AuthorizedCall, PrivilegedOperationGate};
pub use registry::ConnectionRegistry;
pub use requirement::{Criterion, TrustRequirement, TrustRequirementBuilder};

/// Re-exported so downstream crates can build identities without depending on tollgate-sys.
pub use tollgate_sys::ExecutableInfo;
