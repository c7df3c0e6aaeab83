//! TOLLGATE-SYS: Socket option and pidfd wrappers
//! File Path: services/tollgate-sys/src/syscall.rs
//! Responsibility: The only place in the workspace that issues raw syscalls
//! Security: All `unsafe` is isolated in this module

use std::fs;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use nix::sys::socket::{getsockopt, sockopt};

use crate::abi::{Error, DELETED_SUFFIX, PROC_ROOT, SO_PEERPIDFD};
use crate::credential::{ExecutableInfo, PeerCredentials};

// =============================================================================
// SOCKET OPTIONS
// =============================================================================

/// SO_PEERCRED: credentials the kernel recorded when the peer connected.
///
/// These are fixed at `connect(2)`/`socketpair(2)` time. The peer cannot
/// change them afterwards, even by calling `setuid` or `exec`.
pub fn peer_credentials<F: AsFd>(socket: &F) -> Result<PeerCredentials, Error> {
    let creds = getsockopt(socket, sockopt::PeerCredentials).map_err(Error::PeerCredentials)?;
    Ok(PeerCredentials::new(creds.pid(), creds.uid(), creds.gid()))
}

/// SO_PEERPIDFD: a pidfd for the exact process instance that connected.
pub fn peer_pidfd<F: AsFd>(socket: &F) -> Result<OwnedFd, Error> {
    let mut pidfd: libc::c_int = -1;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;

    // SAFETY: `pidfd` and `len` are valid for writes of the sizes passed and
    // outlive the call.
    let rc = unsafe {
        libc::getsockopt(
            socket.as_fd().as_raw_fd(),
            libc::SOL_SOCKET,
            SO_PEERPIDFD,
            &mut pidfd as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };

    if rc != 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::ENOPROTOOPT) => Err(Error::PidfdUnsupported),
            Some(libc::ESRCH) => Err(Error::PeerExited),
            _ => Err(Error::PeerPidfd(err)),
        };
    }

    if pidfd < 0 || len as usize != mem::size_of::<libc::c_int>() {
        return Err(Error::PidfdUnsupported);
    }

    // SAFETY: the kernel just installed this descriptor in our table and
    // nothing else owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(pidfd) })
}

// =============================================================================
// PIDFD
// =============================================================================

/// Probe a pidfd with signal 0.
///
/// `Ok(())` means the pinned process still exists, so its pid has not been
/// handed to anyone else. EPERM still proves existence.
pub fn pidfd_probe(pidfd: BorrowedFd<'_>) -> Result<(), Error> {
    // SAFETY: signal 0 only performs existence and permission checks; a null
    // siginfo pointer is accepted by the kernel.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_pidfd_send_signal,
            pidfd.as_raw_fd(),
            0,
            std::ptr::null::<libc::siginfo_t>(),
            0,
        )
    };

    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Err(Error::PeerExited),
        Some(libc::EPERM) => Ok(()),
        _ => Err(Error::Probe(err)),
    }
}

// =============================================================================
// PROCFS
// =============================================================================

/// Resolve the executable image of `pid` through `/proc/<pid>/exe`.
///
/// The metadata is read through the magic link itself, so it describes the
/// inode actually mapped by the process rather than whatever currently sits
/// at that path.
pub fn executable_of(pid: i32) -> Result<ExecutableInfo, Error> {
    let link = PathBuf::from(format!("{PROC_ROOT}/{pid}/exe"));
    let into_error = |source: io::Error| match source.raw_os_error() {
        Some(libc::ENOENT) | Some(libc::ESRCH) => Error::PeerExited,
        _ => Error::Executable { pid, source },
    };

    let target = fs::read_link(&link).map_err(into_error)?;
    let meta = fs::metadata(&link).map_err(into_error)?;

    let (path, deleted) = match target.to_str().and_then(|s| s.strip_suffix(DELETED_SUFFIX)) {
        Some(stripped) => (PathBuf::from(stripped), true),
        None => (target, false),
    };

    Ok(ExecutableInfo::new(path, meta.uid(), meta.mode(), deleted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_peer_credentials_of_socketpair() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let creds = peer_credentials(&a).expect("SO_PEERCRED");
        assert_eq!(creds.pid(), std::process::id() as i32);
        assert_eq!(creds.uid(), nix::unistd::geteuid().as_raw());
        assert_eq!(creds.gid(), nix::unistd::getegid().as_raw());
    }

    #[test]
    fn test_peer_pidfd_pins_live_process() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        match peer_pidfd(&a) {
            Ok(fd) => pidfd_probe(fd.as_fd()).expect("own process is alive"),
            // Pre-6.5 kernels
            Err(Error::PidfdUnsupported) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_executable_of_self() {
        let info = executable_of(std::process::id() as i32).expect("own exe");
        let current = std::env::current_exe().expect("current_exe");
        assert_eq!(info.path(), current.as_path());
        assert!(!info.is_deleted());
    }

    #[test]
    fn test_executable_of_missing_process() {
        // pid_max never reaches i32::MAX
        let err = executable_of(i32::MAX).expect_err("no such process");
        assert!(matches!(err, Error::PeerExited));
    }
}
