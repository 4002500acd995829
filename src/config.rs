// src/config.rs

//! Deployment configuration
//!
//! The installer gathers its answers into a single JSON document
//! (`deploy-config.json`). It is read once, validated, and then passed
//! explicitly to [`crate::orchestrator::Plan::from_config`]; nothing here is
//! global.

use crate::error::{Error, Result};
use crate::packages::{DEFAULT_TIMEOUT, PackageSource, PackageSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A password or similar value that must never be logged
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Top-level deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub user: UserConfig,
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub pip: PipConfig,
    /// Installed in order, before any Python package
    #[serde(default)]
    pub system_packages: Vec<PackageEntry>,
    #[serde(default)]
    pub python_packages: Vec<PackageEntry>,
}

/// The OS account that owns the modelling environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    /// Defaults to `/home/<name>`
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Also used as the database role's password
    pub password: Secret,
    /// System package providing the crypt hashing helper
    #[serde(default = "default_hash_tool")]
    pub hash_tool_package: String,
}

impl UserConfig {
    pub fn home(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(|| Path::new("/home").join(&self.name))
    }
}

/// PostgreSQL administration settings and database targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    /// Run client tools as the admin OS user via `sudo -u` (peer auth)
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Login role to create; defaults to the OS user's name
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_language")]
    pub procedural_language: String,
    /// Unbounded when absent
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    pub databases: Vec<DatabaseEntry>,
}

impl PostgresConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// One database to bootstrap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    /// SQL files applied in this order before the domain schema
    #[serde(default)]
    pub extension_scripts: Vec<PathBuf>,
    pub domain_schema: PathBuf,
}

/// pip invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipConfig {
    #[serde(default = "default_pip")]
    pub binary: String,
    /// Default isolation scope for Python packages that do not name one
    #[serde(default)]
    pub virtualenv: Option<PathBuf>,
    #[serde(default = "default_pip_timeout")]
    pub timeout_secs: u64,
}

impl PipConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            binary: default_pip(),
            virtualenv: None,
            timeout_secs: default_pip_timeout(),
        }
    }
}

/// A package as written in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageEntry {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub vcs: Option<String>,
    #[serde(default)]
    pub virtualenv: Option<PathBuf>,
}

impl PackageEntry {
    /// Convert to a [`PackageSpec`], falling back to `default_scope`
    pub fn to_spec(&self, default_scope: Option<&Path>) -> Result<PackageSpec> {
        let source = match (&self.file, &self.vcs) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(format!(
                    "package {} names both a file and a vcs source",
                    self.name
                )));
            }
            (Some(file), None) => PackageSource::LocalFile(file.clone()),
            (None, Some(url)) => PackageSource::Vcs(url.clone()),
            (None, None) => PackageSource::Registry,
        };

        Ok(PackageSpec {
            name: self.name.clone(),
            desired_version: self.version.clone(),
            source,
            isolation_scope: self
                .virtualenv
                .clone()
                .or_else(|| default_scope.map(Path::to_path_buf)),
        })
    }
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_hash_tool() -> String {
    "makepasswd".to_string()
}

fn default_admin_user() -> String {
    "postgres".to_string()
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "plpgsql".to_string()
}

fn default_pip() -> String {
    "pip".to_string()
}

fn default_pip_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl DeployConfig {
    /// Read and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and validate a configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Name of the database login role
    pub fn role_name(&self) -> &str {
        self.postgres.role.as_deref().unwrap_or(&self.user.name)
    }

    /// Reject configurations that cannot produce a sensible plan
    pub fn validate(&self) -> Result<()> {
        if self.user.name.trim().is_empty() {
            return Err(Error::Config("user.name must not be empty".to_string()));
        }
        if self.user.password.expose().is_empty() {
            return Err(Error::Config("user.password must not be empty".to_string()));
        }
        if self.user.hash_tool_package.trim().is_empty() {
            return Err(Error::Config(
                "user.hash_tool_package must not be empty".to_string(),
            ));
        }
        if self.role_name().trim().is_empty() {
            return Err(Error::Config("postgres.role must not be empty".to_string()));
        }
        if self.pip.timeout_secs == 0 {
            return Err(Error::Config("pip.timeout_secs must be positive".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for db in &self.postgres.databases {
            if db.name.trim().is_empty() {
                return Err(Error::Config("database name must not be empty".to_string()));
            }
            if !seen.insert(db.name.as_str()) {
                return Err(Error::Config(format!("database {} listed twice", db.name)));
            }
        }

        for entry in self.system_packages.iter().chain(&self.python_packages) {
            if entry.name.trim().is_empty() {
                return Err(Error::Config("package name must not be empty".to_string()));
            }
            entry.to_spec(None)?;
        }
        for entry in &self.system_packages {
            if entry.vcs.is_some() || entry.virtualenv.is_some() {
                return Err(Error::Config(format!(
                    "system package {} cannot use vcs or virtualenv",
                    entry.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "user": { "name": "wave", "password": "s3cret" },
        "postgres": {
            "databases": [
                { "name": "wave", "domain_schema": "/home/wave/wave/db/design/wave.psql" }
            ]
        }
    }"#;

    #[test]
    fn test_defaults_are_applied() {
        let config = DeployConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.user.home(), PathBuf::from("/home/wave"));
        assert_eq!(config.user.shell, "/bin/bash");
        assert_eq!(config.user.hash_tool_package, "makepasswd");
        assert_eq!(config.postgres.admin_user, "postgres");
        assert!(config.postgres.use_sudo);
        assert_eq!(config.postgres.procedural_language, "plpgsql");
        assert_eq!(config.postgres.command_timeout(), None);
        assert_eq!(config.pip.binary, "pip");
        assert_eq!(config.pip.timeout(), Duration::from_secs(600));
        assert_eq!(config.role_name(), "wave");
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = DeployConfig::from_json(MINIMAL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert_eq!(config.user.password.expose(), "s3cret");
    }

    #[test]
    fn test_package_entry_sources() {
        let entry = PackageEntry {
            name: "scipy".to_string(),
            version: Some("0.8.0".to_string()),
            file: Some(PathBuf::from("/tmp/scipy.tar.gz")),
            ..Default::default()
        };
        let spec = entry.to_spec(Some(Path::new("/opt/env"))).unwrap();
        assert_eq!(spec.source, PackageSource::LocalFile(PathBuf::from("/tmp/scipy.tar.gz")));
        assert_eq!(spec.isolation_scope, Some(PathBuf::from("/opt/env")));

        let both = PackageEntry {
            name: "bad".to_string(),
            file: Some(PathBuf::from("/tmp/bad.tar.gz")),
            vcs: Some("git+https://example.org/bad.git".to_string()),
            ..Default::default()
        };
        assert!(matches!(both.to_spec(None), Err(Error::Config(_))));
    }

    #[test]
    fn test_entry_scope_overrides_default() {
        let entry = PackageEntry {
            name: "numpy".to_string(),
            virtualenv: Some(PathBuf::from("/opt/own")),
            ..Default::default()
        };
        let spec = entry.to_spec(Some(Path::new("/opt/env"))).unwrap();
        assert_eq!(spec.isolation_scope, Some(PathBuf::from("/opt/own")));
    }

    #[test]
    fn test_rejects_duplicate_databases() {
        let text = r#"{
            "user": { "name": "wave", "password": "pw" },
            "postgres": {
                "databases": [
                    { "name": "wave", "domain_schema": "/a.psql" },
                    { "name": "wave", "domain_schema": "/b.psql" }
                ]
            }
        }"#;
        assert!(matches!(DeployConfig::from_json(text), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_empty_password() {
        let text = r#"{
            "user": { "name": "wave", "password": "" },
            "postgres": { "databases": [] }
        }"#;
        assert!(matches!(DeployConfig::from_json(text), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_vcs_system_package() {
        let text = r#"{
            "user": { "name": "wave", "password": "pw" },
            "postgres": { "databases": [] },
            "system_packages": [ { "name": "cms", "vcs": "git://example.org/cms" } ]
        }"#;
        assert!(matches!(DeployConfig::from_json(text), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy-config.json");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = DeployConfig::load(&path).unwrap();
        assert_eq!(config.postgres.databases.len(), 1);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(DeployConfig::from_json("{"), Err(Error::Json(_))));
    }
}
