//! TOLLGATE Policy - Trust Requirement
//! File Path: services/policy/src/requirement.rs
//! Responsibility: The static description of which peers may use privileged operations
//!
//! Built once at startup (from configuration or the builder) and read-only
//! afterwards. Share it behind an `Arc`; it outlives every connection.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::auth::PeerIdentity;
use crate::error::RequirementError;

/// One row of the trust requirement. Used for local diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criterion {
    /// Peer uid is in `allowed_uids`
    PeerUser,
    /// Peer gid is in `allowed_gids`
    PeerGroup,
    /// Executable file name equals `identifier`
    Identifier,
    /// Executable lives under `install_prefix`
    InstallPath,
    /// Executable file is owned by one of `trusted_owners`
    SigningAuthority,
    /// Executable is still linked and not writable by group or world
    Integrity,
}

impl Criterion {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Criterion::PeerUser => "peer-user",
            Criterion::PeerGroup => "peer-group",
            Criterion::Identifier => "identifier",
            Criterion::InstallPath => "install-path",
            Criterion::SigningAuthority => "signing-authority",
            Criterion::Integrity => "integrity",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Criteria a peer must satisfy. All configured criteria must match.
///
/// An empty set or `None` leaves that dimension unconstrained, but at least
/// one identity criterion must be configured (see [`RequirementError::Unconstrained`]).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "TrustRequirementBuilder")]
pub struct TrustRequirement {
    allowed_uids: BTreeSet<u32>,
    allowed_gids: BTreeSet<u32>,
    identifier: Option<String>,
    install_prefix: Option<PathBuf>,
    trusted_owners: BTreeSet<u32>,
    reject_writable_executable: bool,
}

impl TrustRequirement {
    pub fn builder() -> TrustRequirementBuilder {
        TrustRequirementBuilder::default()
    }

    /// Check every configured criterion, in a fixed order.
    ///
    /// Returns the first criterion that does not hold.
    pub fn check(&self, identity: &PeerIdentity) -> Result<(), Criterion> {
        let exe = identity.executable();

        if !self.allowed_uids.is_empty() && !self.allowed_uids.contains(&identity.uid()) {
            return Err(Criterion::PeerUser);
        }

        if !self.allowed_gids.is_empty() && !self.allowed_gids.contains(&identity.gid()) {
            return Err(Criterion::PeerGroup);
        }

        if let Some(identifier) = &self.identifier {
            if exe.file_name() != Some(OsStr::new(identifier)) {
                return Err(Criterion::Identifier);
            }
        }

        if let Some(prefix) = &self.install_prefix {
            // Path::starts_with compares whole components
            if !exe.path().is_absolute() || !exe.path().starts_with(prefix) {
                return Err(Criterion::InstallPath);
            }
        }

        if !self.trusted_owners.is_empty() && !self.trusted_owners.contains(&exe.owner_uid()) {
            return Err(Criterion::SigningAuthority);
        }

        if self.reject_writable_executable && (exe.is_deleted() || exe.is_writable_by_others()) {
            return Err(Criterion::Integrity);
        }

        Ok(())
    }

    /// Criteria that actually constrain peers, for startup logging.
    pub fn configured_criteria(&self) -> Vec<Criterion> {
        let mut out = Vec::new();
        if !self.allowed_uids.is_empty() {
            out.push(Criterion::PeerUser);
        }
        if !self.allowed_gids.is_empty() {
            out.push(Criterion::PeerGroup);
        }
        if self.identifier.is_some() {
            out.push(Criterion::Identifier);
        }
        if self.install_prefix.is_some() {
            out.push(Criterion::InstallPath);
        }
        if !self.trusted_owners.is_empty() {
            out.push(Criterion::SigningAuthority);
        }
        if self.reject_writable_executable {
            out.push(Criterion::Integrity);
        }
        out
    }
}

/// Builder and configuration form of [`TrustRequirement`].
///
/// ```toml
/// [trust]
/// allowed_uids = [1000]
/// identifier = "tollgate-client"
/// install_prefix = "/usr/lib/tollgate"
/// trusted_owners = [0]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustRequirementBuilder {
    allowed_uids: BTreeSet<u32>,
    allowed_gids: BTreeSet<u32>,
    identifier: Option<String>,
    install_prefix: Option<PathBuf>,
    trusted_owners: BTreeSet<u32>,
    reject_writable_executable: bool,
}

impl Default for TrustRequirementBuilder {
    fn default() -> Self {
        Self {
            allowed_uids: BTreeSet::new(),
            allowed_gids: BTreeSet::new(),
            identifier: None,
            install_prefix: None,
            trusted_owners: BTreeSet::new(),
            reject_writable_executable: true,
        }
    }
}

impl TrustRequirementBuilder {
    pub fn with_allowed_uid(mut self, uid: u32) -> Self {
        self.allowed_uids.insert(uid);
        self
    }

    pub fn with_allowed_gid(mut self, gid: u32) -> Self {
        self.allowed_gids.insert(gid);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_install_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.install_prefix = Some(prefix.into());
        self
    }

    pub fn with_trusted_owner(mut self, uid: u32) -> Self {
        self.trusted_owners.insert(uid);
        self
    }

    pub fn reject_writable_executable(mut self, reject: bool) -> Self {
        self.reject_writable_executable = reject;
        self
    }

    pub fn build(self) -> Result<TrustRequirement, RequirementError> {
        if let Some(identifier) = &self.identifier {
            if identifier.is_empty() || identifier.contains('/') {
                return Err(RequirementError::InvalidIdentifier(identifier.clone()));
            }
        }

        if let Some(prefix) = &self.install_prefix {
            if !prefix.is_absolute() {
                return Err(RequirementError::RelativeInstallPrefix(
                    prefix.display().to_string(),
                ));
            }
        }

        let constrained = !self.allowed_uids.is_empty()
            || !self.allowed_gids.is_empty()
            || self.identifier.is_some()
            || self.install_prefix.is_some()
            || !self.trusted_owners.is_empty();
        if !constrained {
            return Err(RequirementError::Unconstrained);
        }

        Ok(TrustRequirement {
            allowed_uids: self.allowed_uids,
            allowed_gids: self.allowed_gids,
            identifier: self.identifier,
            install_prefix: self.install_prefix,
            trusted_owners: self.trusted_owners,
            reject_writable_executable: self.reject_writable_executable,
        })
    }
}

impl TryFrom<TrustRequirementBuilder> for TrustRequirement {
    type Error = RequirementError;

    fn try_from(builder: TrustRequirementBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_sys::ExecutableInfo;

    fn identity(uid: u32, path: &str, owner: u32, mode: u32) -> PeerIdentity {
        PeerIdentity::new(
            uid,
            uid,
            4242,
            ExecutableInfo::new(PathBuf::from(path), owner, mode, false),
        )
    }

    fn client_requirement() -> TrustRequirement {
        TrustRequirement::builder()
            .with_allowed_uid(1000)
            .with_identifier("client")
            .with_install_prefix("/opt/tollgate")
            .with_trusted_owner(0)
            .build()
            .expect("valid requirement")
    }

    #[test]
    fn test_all_criteria_match() {
        let req = client_requirement();
        assert_eq!(req.check(&identity(1000, "/opt/tollgate/bin/client", 0, 0o100755)), Ok(()));
    }

    #[test]
    fn test_each_criterion_reported() {
        let req = client_requirement();
        assert_eq!(
            req.check(&identity(1001, "/opt/tollgate/bin/client", 0, 0o100755)),
            Err(Criterion::PeerUser)
        );
        assert_eq!(
            req.check(&identity(1000, "/opt/tollgate/bin/other", 0, 0o100755)),
            Err(Criterion::Identifier)
        );
        assert_eq!(
            req.check(&identity(1000, "/tmp/client", 0, 0o100755)),
            Err(Criterion::InstallPath)
        );
        assert_eq!(
            req.check(&identity(1000, "/opt/tollgate/bin/client", 1000, 0o100755)),
            Err(Criterion::SigningAuthority)
        );
        assert_eq!(
            req.check(&identity(1000, "/opt/tollgate/bin/client", 0, 0o100777)),
            Err(Criterion::Integrity)
        );
    }

    #[test]
    fn test_install_prefix_is_component_wise() {
        let req = TrustRequirement::builder()
            .with_install_prefix("/opt/tollgate")
            .build()
            .expect("valid");
        assert_eq!(
            req.check(&identity(0, "/opt/tollgate-evil/client", 0, 0o100755)),
            Err(Criterion::InstallPath)
        );
    }

    #[test]
    fn test_deleted_executable_fails_integrity() {
        let req = TrustRequirement::builder().with_allowed_uid(0).build().expect("valid");
        let exe = ExecutableInfo::new(PathBuf::from("/usr/bin/client"), 0, 0o100755, true);
        assert_eq!(
            req.check(&PeerIdentity::new(0, 0, 1, exe)),
            Err(Criterion::Integrity)
        );
    }

    #[test]
    fn test_unconstrained_requirement_rejected() {
        assert_eq!(
            TrustRequirement::builder().build(),
            Err(RequirementError::Unconstrained)
        );
        // Integrity alone does not identify anybody
        assert_eq!(
            TrustRequirement::builder().reject_writable_executable(true).build(),
            Err(RequirementError::Unconstrained)
        );
    }

    #[test]
    fn test_invalid_fields_rejected() {
        assert!(matches!(
            TrustRequirement::builder().with_install_prefix("opt/app").build(),
            Err(RequirementError::RelativeInstallPrefix(_))
        ));
        assert!(matches!(
            TrustRequirement::builder().with_identifier("bin/client").build(),
            Err(RequirementError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let req: TrustRequirement = toml::from_str(
            r#"
            allowed_uids = [1000]
            identifier = "client"
            install_prefix = "/opt/tollgate"
            trusted_owners = [0]
            "#,
        )
        .expect("parse");
        assert_eq!(req, client_requirement());
    }

    #[test]
    fn test_deserialize_rejects_empty_and_unknown() {
        assert!(toml::from_str::<TrustRequirement>("").is_err());
        assert!(toml::from_str::<TrustRequirement>("allowed_uid = [1]").is_err());
    }
}
