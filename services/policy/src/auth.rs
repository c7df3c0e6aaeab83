//! TOLLGATE Policy - Identity Capture
//! File Path: services/policy/src/auth.rs
//! Responsibility: Turn a freshly accepted connection into an unforgeable IdentityToken
//! Depends on: services/tollgate-sys (kernel peer identity)
//!
//! Checking a peer by process id is racy: the pid can be recycled and handed
//! to another process between the check and the use. The token built here is
//! bound to the process instance that called `connect(2)`, so that window
//! does not exist.

use std::os::fd::AsFd;

use tollgate_sys::{ExecutableInfo, PeerPidfd};

use crate::error::AuthError;

/// What the kernel reported about a peer at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    uid: u32,
    gid: u32,
    pid: i32,
    executable: ExecutableInfo,
}

impl PeerIdentity {
    pub fn new(uid: u32, gid: u32, pid: i32, executable: ExecutableInfo) -> Self {
        Self {
            uid,
            gid,
            pid,
            executable,
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// For diagnostics only.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn executable(&self) -> &ExecutableInfo {
        &self.executable
    }
}

/// Opaque proof of a peer's identity, captured once per connection.
///
/// Not `Clone`: a token belongs to exactly one connection and is dropped with it.
#[derive(Debug)]
pub struct IdentityToken {
    identity: PeerIdentity,
    /// Keeps the peer process pinned for the lifetime of the token.
    _pidfd: Option<PeerPidfd>,
}

impl IdentityToken {
    /// Token backed by a pidfd.
    pub fn pinned(identity: PeerIdentity, pidfd: PeerPidfd) -> Self {
        Self {
            identity,
            _pidfd: Some(pidfd),
        }
    }

    /// Token for transports that pin the peer by other means.
    pub fn unpinned(identity: PeerIdentity) -> Self {
        Self {
            identity,
            _pidfd: None,
        }
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }
}

/// Extracts the IdentityToken of a connection.
///
/// The only point of contact between the authorization core and a concrete
/// transport. Must be called synchronously on accept, before any message is
/// read from the connection.
pub trait IdentityProvider<T: ?Sized>: Send + Sync {
    fn capture(&self, transport: &T) -> Result<IdentityToken, AuthError>;
}

/// Linux provider backed by `SO_PEERCRED` + `SO_PEERPIDFD` + procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPeerIdentityProvider;

impl<T: AsFd> IdentityProvider<T> for UnixPeerIdentityProvider {
    fn capture(&self, transport: &T) -> Result<IdentityToken, AuthError> {
        let snapshot = tollgate_sys::capture_peer(transport)?;
        let identity = PeerIdentity::new(
            snapshot.credentials.uid(),
            snapshot.credentials.gid(),
            snapshot.credentials.pid(),
            snapshot.executable,
        );
        Ok(IdentityToken::pinned(identity, snapshot.pidfd))
    }
}
