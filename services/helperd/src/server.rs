//! TOLLGATE Helper Daemon - Socket Server
//! File Path: services/helperd/src/server.rs
//! Responsibility: Accept, authorize and dispatch client connections
//!
//! Each accepted stream is identified and evaluated on the accept thread,
//! before it is registered and before its worker thread exists. No request
//! can be read from a connection that has no decision. Denied connections
//! never get a worker: they are sent the generic rejection and closed on
//! the accept thread.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::Shutdown;
use std::os::fd::AsFd;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tollgate_policy::{
    Access, AuditAction, AuditLog, AuthError, AuthorizationDecision, Connection,
    ConnectionAuthorizer, ConnectionId, ConnectionRegistry, IdentityProvider,
    PrivilegedOperationGate, TrustRequirement,
};
use tracing::{debug, error, info, warn};

use crate::ipc::{self, IpcError};
use crate::messages::{Request, Response};
use crate::ops::{dispatch, NetworkSettings};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL_MS: u16 = 200;

/// Upper bound on the accept thread blocking while rejecting a peer.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

type StreamTable = Arc<Mutex<HashMap<ConnectionId, UnixStream>>>;

pub struct Server<P> {
    listener: UnixListener,
    socket_path: PathBuf,
    provider: P,
    authorizer: ConnectionAuthorizer,
    gate: PrivilegedOperationGate,
    registry: Arc<ConnectionRegistry>,
    audit: Arc<AuditLog>,
    backend: Arc<dyn NetworkSettings>,
    /// Clones of live streams, so shutdown can unblock workers.
    streams: StreamTable,
}

impl<P: IdentityProvider<UnixStream>> Server<P> {
    /// Bind the helper socket, replacing a stale one.
    pub fn bind(
        socket_path: &Path,
        socket_mode: u32,
        requirement: TrustRequirement,
        provider: P,
        backend: Arc<dyn NetworkSettings>,
    ) -> Result<Self, IpcError> {
        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_stale_socket(socket_path)?;

        let listener = UnixListener::bind(socket_path)?;
        fs::set_permissions(socket_path, fs::Permissions::from_mode(socket_mode))?;

        let audit = Arc::new(AuditLog::new());
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            provider,
            authorizer: ConnectionAuthorizer::new(Arc::new(requirement), audit.clone()),
            gate: PrivilegedOperationGate::new(audit.clone()),
            registry: Arc::new(ConnectionRegistry::new(audit.clone())),
            audit,
            backend,
            streams: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Serve until `shutdown` is set, then tear every connection down.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<(), IpcError> {
        info!(path = %self.socket_path.display(), "listening");
        let result = self.accept_loop(shutdown);
        self.shutdown_all();
        result
    }

    fn accept_loop(&self, shutdown: &AtomicBool) -> Result<(), IpcError> {
        while !shutdown.load(Ordering::Acquire) {
            let mut fds = [PollFd::new(self.listener.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(ACCEPT_POLL_MS)) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(IpcError::Io(e.into())),
            }

            match self.listener.accept() {
                Ok((stream, _)) => self.accept_one(stream),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
        Ok(())
    }

    fn accept_one(&self, stream: UnixStream) {
        // Capture and decide before anything is read from the stream
        let connection = Arc::new(self.authorizer.establish(&self.provider, &stream));
        let id = connection.id();

        if self.gate.authorize(&connection) == Access::Denied {
            reject(stream, &connection, &self.audit);
            return;
        }

        if let Err(e) = self.registry.register(connection.clone()) {
            warn!(connection = %id, error = %e, "connection not registered");
            return;
        }

        match stream.try_clone() {
            Ok(tracked) => {
                lock(&self.streams).insert(id, tracked);
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "failed to track stream");
                self.registry.teardown(id);
                return;
            }
        }

        let gate = self.gate.clone();
        let backend = self.backend.clone();
        let registry = self.registry.clone();
        let streams = self.streams.clone();

        let spawned = thread::Builder::new()
            .name(format!("tollgate-conn-{id}"))
            .spawn(move || {
                serve_connection(&stream, &connection, &gate, backend.as_ref());
                registry.teardown(id);
                lock(&streams).remove(&id);
            });

        if let Err(e) = spawned {
            error!(connection = %id, error = %e, "failed to spawn connection worker");
            self.registry.teardown(id);
            lock(&self.streams).remove(&id);
        }
    }

    fn shutdown_all(&self) {
        let torn_down = self.registry.invalidate_all();
        for (_, stream) in lock(&self.streams).drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Err(e) = fs::remove_file(&self.socket_path) {
            debug!(error = %e, "socket already removed");
        }
        info!(connections = torn_down, "helper stopped");
    }
}

/// Send the generic rejection to a denied peer and close the stream.
fn reject(stream: UnixStream, connection: &Connection, audit: &AuditLog) {
    let reason = match connection.decision() {
        Some(AuthorizationDecision::Denied(reason)) => AuthError::from(*reason),
        _ => AuthError::Unauthorized(connection.id()),
    };
    info!(connection = %connection.id(), %reason, "rejecting connection");
    audit.record(connection, AuditAction::Refused);

    let mut writer = &stream;
    let sent = stream
        .set_write_timeout(Some(REJECT_WRITE_TIMEOUT))
        .map_err(IpcError::from)
        .and_then(|()| ipc::send(&mut writer, &Response::Rejected));
    if let Err(e) = sent {
        debug!(connection = %connection.id(), error = %e, "failed to send rejection");
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// Remove a socket file left behind by a helper that is no longer running.
///
/// Refuses to touch anything that is not a socket, or a socket something is
/// still listening on.
fn remove_stale_socket(path: &Path) -> Result<(), IpcError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if !meta.file_type().is_socket() {
        return Err(IpcError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )));
    }

    match UnixStream::connect(path) {
        Ok(_) => Err(IpcError::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("another helper is listening on {}", path.display()),
        ))),
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            fs::remove_file(path)?;
            debug!(path = %path.display(), "removed stale socket");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Read requests until the peer hangs up, a call is refused, or the
/// connection is torn down.
fn serve_connection(
    stream: &UnixStream,
    connection: &Connection,
    gate: &PrivilegedOperationGate,
    backend: &dyn NetworkSettings,
) {
    let mut reader = stream;
    let mut writer = stream;

    loop {
        let request: Request = match ipc::recv(&mut reader) {
            Ok(request) => request,
            Err(IpcError::ConnectionClosed) => break,
            Err(e) => {
                if connection.is_live() {
                    warn!(connection = %connection.id(), error = %e, "bad request");
                }
                break;
            }
        };
        debug!(connection = %connection.id(), ?request, "request");

        let response = gate
            .invoke(connection, |call| dispatch(backend, call, &request))
            .unwrap_or(Response::Rejected);

        let terminal = response == Response::Rejected;
        if let Err(e) = ipc::send(&mut writer, &response) {
            debug!(connection = %connection.id(), error = %e, "failed to send response");
            break;
        }
        if terminal {
            break;
        }
    }
}

fn lock(streams: &StreamTable) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, UnixStream>> {
    streams.lock().unwrap_or_else(PoisonError::into_inner)
}
