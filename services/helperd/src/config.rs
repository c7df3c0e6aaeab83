//! TOLLGATE Helper Daemon - Configuration
//! File Path: services/helperd/src/config.rs
//! Responsibility: Load daemon settings and the trust requirement from TOML
//!
//! The trust requirement is read once at startup and never reloaded.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tollgate_policy::TrustRequirement;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TOLLGATE_CONFIG";

const DEV_CONFIG: &str = "config/helperd.toml";
const SYSTEM_CONFIG: &str = "/etc/tollgate/helperd.toml";

/// Main configuration structure.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelperConfig {
    #[serde(default)]
    pub helper: HelperSettings,
    /// Which peers may use privileged operations
    pub trust: TrustRequirement,
}

/// Daemon settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HelperSettings {
    /// Unix socket the helper listens on
    pub socket_path: PathBuf,
    /// Permission bits of the socket file. Access control is done per connection.
    pub socket_mode: u32,
    /// Where network settings are persisted
    pub state_dir: PathBuf,
    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/tollgate/helperd.sock"),
            socket_mode: 0o666,
            state_dir: PathBuf::from("/var/lib/tollgate"),
            log_level: "info".to_string(),
        }
    }
}

impl HelperConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HelperConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Locate and load the configuration.
    ///
    /// Looks for config files in this order:
    /// 1. Path in the TOLLGATE_CONFIG environment variable
    /// 2. ./config/helperd.toml
    /// 3. /etc/tollgate/helperd.toml
    ///
    /// There is no embedded default: without a trust section nothing could be granted.
    pub fn load_auto() -> Result<Self> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            return Self::load(&config_path);
        }

        for candidate in [DEV_CONFIG, SYSTEM_CONFIG] {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load(path);
            }
        }

        anyhow::bail!(
            "No configuration found (set {CONFIG_ENV}, or create {DEV_CONFIG} or {SYSTEM_CONFIG})"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tollgate_policy::Criterion;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
            [helper]
            socket_path = "/tmp/helperd.sock"
            socket_mode = 0o660
            state_dir = "/tmp/tollgate"
            log_level = "debug"

            [trust]
            allowed_uids = [1000]
            identifier = "client"
            install_prefix = "/opt/tollgate"
            trusted_owners = [0]
            "#,
        );

        let config = HelperConfig::load(file.path()).expect("load");
        assert_eq!(config.helper.socket_path, PathBuf::from("/tmp/helperd.sock"));
        assert_eq!(config.helper.socket_mode, 0o660);
        assert_eq!(config.helper.log_level, "debug");
        assert_eq!(
            config.trust.configured_criteria(),
            vec![
                Criterion::PeerUser,
                Criterion::Identifier,
                Criterion::InstallPath,
                Criterion::SigningAuthority,
                Criterion::Integrity,
            ]
        );
    }

    #[test]
    fn test_helper_section_defaults() {
        let file = write_config("[trust]\nallowed_uids = [1000]\n");
        let config = HelperConfig::load(file.path()).expect("load");
        assert_eq!(config.helper.socket_mode, 0o666);
        assert_eq!(config.helper.log_level, "info");
    }

    #[test]
    fn test_missing_trust_section_rejected() {
        let file = write_config("[helper]\nlog_level = \"info\"\n");
        assert!(HelperConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_unconstrained_trust_rejected() {
        let file = write_config("[trust]\nreject_writable_executable = true\n");
        let err = HelperConfig::load(file.path()).expect_err("unconstrained");
        assert!(format!("{err:#}").contains("no identity criterion"));
    }

    #[test]
    fn test_missing_file() {
        assert!(HelperConfig::load("/nonexistent/helperd.toml").is_err());
    }
}
