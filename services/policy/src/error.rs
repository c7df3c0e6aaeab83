//! TOLLGATE Policy - Error Taxonomy
//! File Path: services/policy/src/error.rs
//! Responsibility: Every way an authorization attempt can end other than Granted
//!
//! All variants are terminal for the connection that produced them. Nothing
//! here is retried: a legitimate peer has to reconnect.

use thiserror::Error;

use crate::connection::ConnectionId;
use crate::requirement::Criterion;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The transport could not supply an identity token. Fails closed.
    #[error("peer identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The token was evaluated and a criterion did not hold. Produced from a
    /// Denied decision's [`DenialReason`](crate::DenialReason); stays local.
    #[error("peer identity does not satisfy the {0} criterion")]
    PolicyMismatch(Criterion),

    /// A privileged call reached the gate without a Granted decision.
    #[error("connection {0} is not authorized")]
    Unauthorized(ConnectionId),

    /// The connection was torn down while a call was in flight.
    #[error("connection {0} was invalidated")]
    ConnectionInvalidated(ConnectionId),
}

impl From<tollgate_sys::Error> for AuthError {
    fn from(e: tollgate_sys::Error) -> Self {
        AuthError::IdentityUnavailable(e.to_string())
    }
}

/// Rejected trust configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementError {
    #[error("trust requirement names no identity criterion")]
    Unconstrained,

    #[error("install prefix must be an absolute path: {0}")]
    RelativeInstallPrefix(String),

    #[error("application identifier must be a bare file name: {0:?}")]
    InvalidIdentifier(String),
}
