//! TOLLGATE-SYS: Peer identity value types
//! File Path: services/tollgate-sys/src/credential.rs
//! Responsibility: Typed wrappers around what the kernel reports about a socket peer

use std::ffi::OsStr;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use crate::abi::{Error, MODE_WRITABLE_BY_OTHERS};
use crate::syscall;

/// Credentials recorded by the kernel when the peer connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerCredentials {
    pid: i32,
    uid: u32,
    gid: u32,
}

impl PeerCredentials {
    pub const fn new(pid: i32, uid: u32, gid: u32) -> Self {
        Self { pid, uid, gid }
    }

    /// Process id at connect time. Recyclable; never use it to decide trust.
    pub const fn pid(&self) -> i32 {
        self.pid
    }

    pub const fn uid(&self) -> u32 {
        self.uid
    }

    pub const fn gid(&self) -> u32 {
        self.gid
    }
}

/// A pidfd pinned to one process instance.
///
/// Unlike a pid, the descriptor keeps referring to the same process after it
/// exits, so a recycled pid can never be mistaken for the original peer.
#[derive(Debug)]
pub struct PeerPidfd(OwnedFd);

impl PeerPidfd {
    pub fn from_owned(fd: OwnedFd) -> Self {
        PeerPidfd(fd)
    }

    /// Check that the pinned process is still running.
    pub fn probe(&self) -> Result<(), Error> {
        syscall::pidfd_probe(self.0.as_fd())
    }
}

impl AsFd for PeerPidfd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// The executable image a process is running, as reported by procfs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutableInfo {
    path: PathBuf,
    owner_uid: u32,
    mode: u32,
    deleted: bool,
}

impl ExecutableInfo {
    pub fn new(path: PathBuf, owner_uid: u32, mode: u32, deleted: bool) -> Self {
        Self {
            path,
            owner_uid,
            mode,
            deleted,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }

    /// Owner of the image file on disk.
    pub fn owner_uid(&self) -> u32 {
        self.owner_uid
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// True if the image was unlinked after the process started.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// True if a user other than the owner could have replaced the image.
    pub fn is_writable_by_others(&self) -> bool {
        self.mode & MODE_WRITABLE_BY_OTHERS != 0
    }
}
