//! Shared fixtures for unit tests.

use std::path::PathBuf;
use std::sync::Arc;

use tollgate_sys::ExecutableInfo;

use crate::audit::AuditLog;
use crate::auth::{IdentityProvider, IdentityToken, PeerIdentity};
use crate::authorizer::ConnectionAuthorizer;
use crate::error::AuthError;
use crate::requirement::TrustRequirement;

pub const CLIENT_EXE: &str = "/opt/tollgate/bin/client";

/// Root-owned, not group/world writable.
pub fn identity(uid: u32, exe: &str) -> PeerIdentity {
    PeerIdentity::new(
        uid,
        uid,
        4242,
        ExecutableInfo::new(PathBuf::from(exe), 0, 0o100755, false),
    )
}

pub fn client_requirement() -> TrustRequirement {
    TrustRequirement::builder()
        .with_allowed_uid(1000)
        .with_identifier("client")
        .with_install_prefix("/opt/tollgate")
        .with_trusted_owner(0)
        .build()
        .expect("valid requirement")
}

pub fn authorizer() -> ConnectionAuthorizer {
    ConnectionAuthorizer::new(Arc::new(client_requirement()), Arc::new(AuditLog::new()))
}

/// Provider that hands out a fixed identity, or fails like a dead transport.
pub struct FakeProvider(Option<PeerIdentity>);

impl FakeProvider {
    pub fn peer(identity: PeerIdentity) -> Self {
        FakeProvider(Some(identity))
    }

    pub fn unavailable() -> Self {
        FakeProvider(None)
    }
}

impl IdentityProvider<()> for FakeProvider {
    fn capture(&self, _transport: &()) -> Result<IdentityToken, AuthError> {
        match &self.0 {
            Some(identity) => Ok(IdentityToken::unpinned(identity.clone())),
            None => Err(AuthError::IdentityUnavailable("transport closed".into())),
        }
    }
}
