//! TOLLGATE Helper Daemon - Privileged Operations
//! File Path: services/helperd/src/ops.rs
//! Responsibility: Network-settings operations and their dispatch
//!
//! Everything here runs behind the gate: the only way in is through an
//! [`AuthorizedCall`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tollgate_policy::{AuthError, AuthorizedCall};
use tracing::info;

use crate::messages::{Endpoint, Request, Response};

pub const HELPER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode network state: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("failed to decode network state: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("aborted: {0}")]
    Aborted(#[from] AuthError),
}

/// System network settings the helper is allowed to change.
pub trait NetworkSettings: Send + Sync {
    fn set_socks5_proxy(
        &self,
        call: &AuthorizedCall<'_>,
        endpoint: Option<&Endpoint>,
    ) -> Result<(), OperationError>;

    /// Sets both the HTTP and HTTPS proxy.
    fn set_http_proxy(
        &self,
        call: &AuthorizedCall<'_>,
        endpoint: Option<&Endpoint>,
    ) -> Result<(), OperationError>;

    fn set_dns(&self, call: &AuthorizedCall<'_>, endpoint: Option<&Endpoint>)
        -> Result<(), OperationError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySetting {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl ProxySetting {
    fn from_endpoint(endpoint: Option<&Endpoint>) -> Self {
        match endpoint {
            Some(ep) => ProxySetting {
                enabled: true,
                host: ep.connectable_addr().to_string(),
                port: ep.port,
            },
            None => ProxySetting::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkState {
    pub dns_servers: Vec<String>,
    pub socks5: ProxySetting,
    pub http: ProxySetting,
    pub https: ProxySetting,
}

/// Persists network settings as TOML in the helper's state directory.
///
/// Writes go to a temporary file and are renamed into place only if the
/// calling connection is still live at commit time.
#[derive(Debug)]
pub struct FileNetworkSettings {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileNetworkSettings {
    pub const FILE_NAME: &'static str = "network.toml";

    pub fn new(state_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join(Self::FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<NetworkState, OperationError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(NetworkState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn update<F>(&self, call: &AuthorizedCall<'_>, what: &str, change: F) -> Result<(), OperationError>
    where
        F: FnOnce(&mut NetworkState),
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut state = self.load()?;
        change(&mut state);

        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, toml::to_string_pretty(&state)?)?;

        if let Err(e) = call.ensure_live() {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        fs::rename(&tmp, &self.path)?;

        info!(connection = %call.connection_id(), setting = what, "network settings updated");
        Ok(())
    }
}

impl NetworkSettings for FileNetworkSettings {
    fn set_socks5_proxy(
        &self,
        call: &AuthorizedCall<'_>,
        endpoint: Option<&Endpoint>,
    ) -> Result<(), OperationError> {
        self.update(call, "socks5", |state| {
            state.socks5 = ProxySetting::from_endpoint(endpoint);
        })
    }

    fn set_http_proxy(
        &self,
        call: &AuthorizedCall<'_>,
        endpoint: Option<&Endpoint>,
    ) -> Result<(), OperationError> {
        self.update(call, "http", |state| {
            state.http = ProxySetting::from_endpoint(endpoint);
            state.https = ProxySetting::from_endpoint(endpoint);
        })
    }

    fn set_dns(
        &self,
        call: &AuthorizedCall<'_>,
        endpoint: Option<&Endpoint>,
    ) -> Result<(), OperationError> {
        self.update(call, "dns", |state| {
            state.dns_servers = endpoint
                .map(|ep| vec![ep.connectable_addr().to_string()])
                .unwrap_or_default();
        })
    }
}

/// Execute one request for a caller that passed the gate.
pub fn dispatch(
    backend: &dyn NetworkSettings,
    call: &AuthorizedCall<'_>,
    request: &Request,
) -> Response {
    let result = match request {
        Request::CurrentVersion => return Response::Version(HELPER_VERSION.to_string()),
        Request::SetSocks5Proxy(endpoint) => backend.set_socks5_proxy(call, endpoint.as_ref()),
        Request::SetHttpProxy(endpoint) => backend.set_http_proxy(call, endpoint.as_ref()),
        Request::SetDns(endpoint) => backend.set_dns(call, endpoint.as_ref()),
    };

    match result {
        Ok(()) => Response::Done,
        Err(OperationError::Aborted(_)) => Response::Rejected,
        Err(e) => Response::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tollgate_policy::{
        AuditLog, ConnectionAuthorizer, ExecutableInfo, IdentityProvider, IdentityToken,
        PeerIdentity, PrivilegedOperationGate, TrustRequirement,
    };

    struct Peer;

    impl IdentityProvider<()> for Peer {
        fn capture(&self, _: &()) -> Result<IdentityToken, AuthError> {
            let exe = ExecutableInfo::new(PathBuf::from("/usr/bin/client"), 0, 0o100755, false);
            Ok(IdentityToken::unpinned(PeerIdentity::new(1000, 1000, 1, exe)))
        }
    }

    fn granted() -> (tollgate_policy::Connection, PrivilegedOperationGate) {
        let req = TrustRequirement::builder()
            .with_allowed_uid(1000)
            .build()
            .expect("valid");
        let audit = Arc::new(AuditLog::new());
        let conn = ConnectionAuthorizer::new(Arc::new(req), audit.clone()).establish(&Peer, &());
        (conn, PrivilegedOperationGate::new(audit))
    }

    #[test]
    fn test_set_and_clear_proxies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileNetworkSettings::new(dir.path()).expect("backend");
        let (conn, gate) = granted();

        let response = gate
            .invoke(&conn, |call| {
                dispatch(
                    &backend,
                    call,
                    &Request::SetHttpProxy(Some(Endpoint::new("0.0.0.0", 8080))),
                )
            })
            .expect("granted");
        assert_eq!(response, Response::Done);

        let state = backend.load().expect("load");
        assert!(state.http.enabled);
        assert_eq!(state.https.host, "127.0.0.1");
        assert_eq!(state.https.port, 8080);

        gate.invoke(&conn, |call| dispatch(&backend, call, &Request::SetHttpProxy(None)))
            .expect("granted");
        assert_eq!(backend.load().expect("load").http, ProxySetting::default());
    }

    #[test]
    fn test_set_dns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileNetworkSettings::new(dir.path()).expect("backend");
        let (conn, gate) = granted();

        gate.invoke(&conn, |call| {
            dispatch(&backend, call, &Request::SetDns(Some(Endpoint::new("1.1.1.1", 53))))
        })
        .expect("granted");
        assert_eq!(backend.load().expect("load").dns_servers, vec!["1.1.1.1"]);
    }

    #[test]
    fn test_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileNetworkSettings::new(dir.path()).expect("backend");
        let (conn, gate) = granted();
        let response = gate
            .invoke(&conn, |call| dispatch(&backend, call, &Request::CurrentVersion))
            .expect("granted");
        assert_eq!(response, Response::Version(HELPER_VERSION.to_string()));
    }

    #[test]
    fn test_teardown_aborts_before_commit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileNetworkSettings::new(dir.path()).expect("backend");
        let (conn, gate) = granted();

        let response = gate
            .invoke(&conn, |call| {
                conn.invalidate();
                dispatch(
                    &backend,
                    call,
                    &Request::SetSocks5Proxy(Some(Endpoint::new("127.0.0.1", 1080))),
                )
            })
            .expect("passed the gate before teardown");

        assert_eq!(response, Response::Rejected);
        assert!(!backend.path().exists());
        assert!(!backend.path().with_extension("toml.tmp").exists());
    }
}
