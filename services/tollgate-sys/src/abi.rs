//! TOLLGATE-SYS: Kernel ABI constants and error type
//! File Path: services/tollgate-sys/src/abi.rs
//! Responsibility: Values the kernel defines that the libc/nix bindings may not carry yet

use std::io;
use thiserror::Error;

/// `SO_PEERPIDFD` socket option (Linux 6.5+).
///
/// Returns a pidfd for the process that called `connect(2)`, pinned at
/// connect time. Defined here because older libc releases lack it.
pub const SO_PEERPIDFD: libc::c_int = 77;

/// Mount point of procfs.
pub const PROC_ROOT: &str = "/proc";

/// Suffix the kernel appends to `/proc/<pid>/exe` when the image was unlinked.
pub const DELETED_SUFFIX: &str = " (deleted)";

/// Group- and world-write permission bits.
pub const MODE_WRITABLE_BY_OTHERS: u32 = 0o022;

/// Errors from peer identity capture.
#[derive(Debug, Error)]
pub enum Error {
    #[error("getsockopt(SO_PEERCRED) failed: {0}")]
    PeerCredentials(#[source] nix::Error),

    #[error("getsockopt(SO_PEERPIDFD) failed: {0}")]
    PeerPidfd(#[source] io::Error),

    #[error("kernel does not support SO_PEERPIDFD")]
    PidfdUnsupported,

    #[error("peer process exited before its identity was captured")]
    PeerExited,

    #[error("failed to resolve executable of process {pid}: {source}")]
    Executable {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("pidfd probe failed: {0}")]
    Probe(#[source] io::Error),
}
