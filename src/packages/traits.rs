// src/packages/traits.rs

//! Package descriptions and the interface every package manager implements

use crate::error::Result;
use crate::exec::CommandLine;
use std::fmt;
use std::path::PathBuf;

/// Where a package is installed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// The package manager's index, pinned by version when one is given
    Registry,
    /// A file on the local filesystem (sdist, wheel, .deb)
    LocalFile(PathBuf),
    /// A version-control URL such as `git+https://...`
    Vcs(String),
}

impl PackageSource {
    pub fn kind(&self) -> &'static str {
        match self {
            PackageSource::Registry => "registry",
            PackageSource::LocalFile(_) => "local file",
            PackageSource::Vcs(_) => "vcs",
        }
    }
}

/// Desired state of one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub desired_version: Option<String>,
    pub source: PackageSource,
    /// Isolated environment (e.g. a virtualenv) that confines every command
    pub isolation_scope: Option<PathBuf>,
}

impl PackageSpec {
    /// A registry package at whatever version the index offers
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desired_version: None,
            source: PackageSource::Registry,
            isolation_scope: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.desired_version = Some(version.into());
        self
    }

    pub fn source(mut self, source: PackageSource) -> Self {
        self.source = source;
        self
    }

    pub fn scope(mut self, scope: impl Into<PathBuf>) -> Self {
        self.isolation_scope = Some(scope.into());
        self
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.desired_version {
            write!(f, "=={}", version)?;
        }
        match &self.source {
            PackageSource::Registry => {}
            PackageSource::LocalFile(path) => write!(f, " from {}", path.display())?,
            PackageSource::Vcs(url) => write!(f, " from {}", url)?,
        }
        if let Some(scope) = &self.isolation_scope {
            write!(f, " in {}", scope.display())?;
        }
        Ok(())
    }
}

/// Probed state of a package; recomputed on every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageState {
    pub name: String,
    pub installed_version: Option<String>,
}

impl PackageState {
    /// Whether the installed version meets `desired`
    ///
    /// With no desired version any installed version is acceptable.
    pub fn satisfies(&self, desired: Option<&str>) -> bool {
        match (self.installed_version.as_deref(), desired) {
            (Some(installed), Some(desired)) => installed == desired,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.installed_version {
            Some(version) => write!(f, "installed {}", version),
            None => f.write_str("absent"),
        }
    }
}

/// Command surface of a package manager (pip, apt, ...)
///
/// Implementations only build commands and parse output; the convergence
/// policy lives in [`super::Package`] and is shared by all of them.
pub trait PackageManager {
    /// Short name used in logs and errors
    fn label(&self) -> &'static str;

    /// Query listing the installed version of `spec.name`
    fn list_installed(&self, spec: &PackageSpec) -> CommandLine;

    /// Extract the installed version from the query's stdout
    fn parse_installed(&self, spec: &PackageSpec, stdout: &str) -> Option<String>;

    /// Install command for the spec's source; fails for unsupported sources
    fn install(&self, spec: &PackageSpec) -> Result<CommandLine>;

    /// Uninstall command for `spec.name`
    fn uninstall(&self, spec: &PackageSpec) -> CommandLine;
}
