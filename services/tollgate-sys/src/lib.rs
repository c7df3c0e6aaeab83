//! TOLLGATE-SYS: Kernel-backed peer identity for Unix domain sockets
//! File Path: services/tollgate-sys/src/lib.rs
//! Responsibility: Capture who is on the other end of a socket without trusting anything the peer says
//! Architecture: ABI constants + unsafe syscall wrappers + typed identity values
//!
//! A peer is identified by what the kernel recorded at connect time
//! (`SO_PEERCRED`), pinned to a process instance (`SO_PEERPIDFD`), and
//! resolved to an executable image through procfs. Process ids are only a
//! lookup key into procfs and are never trusted on their own.

// ============================================================================
// MODULES
// ============================================================================

/// Kernel constants and the crate error type
pub mod abi;

/// Raw socket-option, pidfd and procfs access
pub mod syscall;

/// Typed identity values
pub mod credential;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use abi::Error;
pub use credential::{ExecutableInfo, PeerCredentials, PeerPidfd};

use std::os::fd::AsFd;

/// Everything the kernel can tell us about a connected peer.
#[derive(Debug)]
pub struct PeerSnapshot {
    pub credentials: PeerCredentials,
    pub pidfd: PeerPidfd,
    pub executable: ExecutableInfo,
}

/// Capture the identity of the process on the other end of `socket`.
///
/// # Ordering
/// 1. Credentials and pidfd are read from the socket (fixed at connect time)
/// 2. The executable is resolved through `/proc/<pid>/exe`
/// 3. The pidfd is probed: if the peer has exited, the pid used in step 2
///    may already belong to another process and the capture fails
///
/// There is no pid-only fallback: a kernel without `SO_PEERPIDFD` yields
/// [`Error::PidfdUnsupported`].
pub fn capture_peer<F: AsFd>(socket: &F) -> Result<PeerSnapshot, Error> {
    let credentials = syscall::peer_credentials(socket)?;
    let pidfd = PeerPidfd::from_owned(syscall::peer_pidfd(socket)?);
    let executable = syscall::executable_of(credentials.pid())?;
    pidfd.probe()?;

    Ok(PeerSnapshot {
        credentials,
        pidfd,
        executable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_capture_self_over_socketpair() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        match capture_peer(&a) {
            Ok(snapshot) => {
                assert_eq!(snapshot.credentials.pid(), std::process::id() as i32);
                let current = std::env::current_exe().expect("current_exe");
                assert_eq!(snapshot.executable.path(), current.as_path());
            }
            Err(Error::PidfdUnsupported) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
