// src/packages/apt.rs

//! Debian/Ubuntu system packages through dpkg and apt-get

use crate::error::{Error, Result};
use crate::exec::{CommandLine, CommandRunner, run_mutating};
use crate::packages::traits::{PackageManager, PackageSource, PackageSpec};
use crate::packages::{DEFAULT_TIMEOUT, Package};
use crate::resource::{Action, ConvergenceResult, Resource};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// apt-get invocation settings
#[derive(Debug, Clone)]
pub struct Apt {
    timeout: Option<Duration>,
}

impl Apt {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn command(&self, program: &str) -> CommandLine {
        CommandLine::new(program)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .timeout(self.timeout)
    }

    /// Download fresh package lists from the configured sources
    pub fn update(&self) -> CommandLine {
        self.command("apt-get").args(["update", "-y", "-q"])
    }
}

impl Default for Apt {
    fn default() -> Self {
        Self::new(Some(DEFAULT_TIMEOUT))
    }
}

impl PackageManager for Apt {
    fn label(&self) -> &'static str {
        "apt"
    }

    fn list_installed(&self, spec: &PackageSpec) -> CommandLine {
        self.command("dpkg-query")
            .args(["-W", "-f=${db:Status-Status} ${Version}\\n"])
            .arg(spec.name.as_str())
    }

    /// Only a fully `installed` status counts; `config-files` and friends
    /// leave nothing usable behind.
    fn parse_installed(&self, _spec: &PackageSpec, stdout: &str) -> Option<String> {
        stdout.lines().find_map(|line| {
            let (status, version) = line.trim().split_once(' ')?;
            let version = version.trim();
            (status == "installed" && !version.is_empty()).then(|| version.to_string())
        })
    }

    fn install(&self, spec: &PackageSpec) -> Result<CommandLine> {
        match &spec.source {
            PackageSource::Registry => {
                let target = match &spec.desired_version {
                    Some(version) => format!("{}={}", spec.name, version),
                    None => spec.name.clone(),
                };
                Ok(self
                    .command("apt-get")
                    .args(["install", "-y", "-q"])
                    .arg(target))
            }
            PackageSource::LocalFile(path) => {
                Ok(self.command("dpkg").arg("-i").arg(path.to_string_lossy()))
            }
            PackageSource::Vcs(_) => Err(Error::UnsupportedSource {
                manager: self.label(),
                package: spec.name.clone(),
                source_kind: spec.source.kind(),
            }),
        }
    }

    fn uninstall(&self, spec: &PackageSpec) -> CommandLine {
        self.command("apt-get")
            .args(["remove", "-y", "-q"])
            .arg(spec.name.as_str())
    }
}

/// The apt package index, refreshed before system packages are installed
///
/// Installing against a stale index fails on a freshly imaged host, so the
/// index is refreshed whenever any of `packages` still has to be installed.
/// When every one of them is already satisfied nothing is downloaded.
#[derive(Debug, Clone)]
pub struct PackageIndex {
    apt: Apt,
    packages: Vec<PackageSpec>,
}

/// Registry packages that still need installing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInstalls(pub Vec<String>);

impl fmt::Display for PendingInstalls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("up to date")
        } else {
            write!(f, "{} pending: {}", self.0.len(), self.0.join(", "))
        }
    }
}

impl PackageIndex {
    pub fn new(apt: Apt, packages: Vec<PackageSpec>) -> Self {
        Self { apt, packages }
    }
}

impl Resource for PackageIndex {
    type State = PendingInstalls;

    fn describe(&self) -> String {
        "apt package index".to_string()
    }

    /// Local `.deb` files never consult the index and are not counted
    fn probe(&self, runner: &dyn CommandRunner) -> PendingInstalls {
        let pending = self
            .packages
            .iter()
            .filter(|spec| spec.source == PackageSource::Registry)
            .filter(|spec| {
                let state = Package::new(self.apt.clone(), (*spec).clone()).probe(runner);
                !state.satisfies(spec.desired_version.as_deref())
            })
            .map(|spec| spec.name.clone())
            .collect();
        let pending = PendingInstalls(pending);
        debug!("Probed apt package index: {}", pending);
        pending
    }

    fn converge(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        let pending = self.probe(runner);
        if pending.0.is_empty() {
            info!("All system packages installed; package index not refreshed");
            return Ok(Action::NoOp);
        }
        info!("Refreshing apt package index ({})", pending);
        run_mutating(runner, &self.apt.update())?;
        Ok(Action::Refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRunner, exit, ok};
    use std::path::PathBuf;

    #[test]
    fn test_parse_installed_status() {
        let apt = Apt::default();
        let spec = PackageSpec::new("gfortran");
        assert_eq!(
            apt.parse_installed(&spec, "installed 4:9.3.0-1ubuntu2").as_deref(),
            Some("4:9.3.0-1ubuntu2")
        );
        assert_eq!(apt.parse_installed(&spec, "config-files 4:9.3.0-1ubuntu2"), None);
        assert_eq!(apt.parse_installed(&spec, "not-installed "), None);
        assert_eq!(apt.parse_installed(&spec, ""), None);
    }

    #[test]
    fn test_install_commands() {
        let apt = Apt::default();
        let cmd = apt.install(&PackageSpec::new("cmake")).unwrap();
        assert_eq!(cmd.to_string(), "apt-get install -y -q cmake");
        assert!(cmd.env.contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())));

        let pinned = apt.install(&PackageSpec::new("cms").version("4.0.0")).unwrap();
        assert_eq!(pinned.to_string(), "apt-get install -y -q cms=4.0.0");

        let deb = PackageSpec::new("cms")
            .version("4.0.0")
            .source(PackageSource::LocalFile(PathBuf::from("/tmp/cms.deb")));
        assert_eq!(apt.install(&deb).unwrap().to_string(), "dpkg -i /tmp/cms.deb");
    }

    #[test]
    fn test_vcs_is_unsupported() {
        let apt = Apt::default();
        let spec = PackageSpec::new("wave").source(PackageSource::Vcs("git://x".to_string()));
        assert!(matches!(apt.install(&spec), Err(Error::UnsupportedSource { .. })));
    }

    fn index() -> PackageIndex {
        PackageIndex::new(
            Apt::default(),
            vec![
                PackageSpec::new("gfortran"),
                PackageSpec::new("makepasswd"),
                PackageSpec::new("cms")
                    .source(PackageSource::LocalFile(PathBuf::from("/tmp/cms.deb"))),
            ],
        )
    }

    #[test]
    fn test_update_command() {
        let cmd = Apt::default().update();
        assert_eq!(cmd.to_string(), "apt-get update -y -q");
        assert!(cmd.env.contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())));
        assert_eq!(cmd.timeout, Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_index_refreshed_when_a_package_is_missing() {
        let runner = FakeRunner::new()
            .on("gfortran", ok("installed 9.3\n"))
            .on("dpkg-query", exit(1, "no packages found matching makepasswd"));

        assert_eq!(
            index().probe(&runner),
            PendingInstalls(vec!["makepasswd".to_string()])
        );
        runner.clear();
        assert_eq!(index().converge(&runner).unwrap(), Action::Refreshed);
        assert_eq!(runner.rendered().last().map(String::as_str), Some("apt-get update -y -q"));
    }

    #[test]
    fn test_index_untouched_when_everything_installed() {
        let runner = FakeRunner::new().on("dpkg-query", ok("installed 1.0\n"));

        assert_eq!(index().converge(&runner).unwrap(), Action::NoOp);
        let rendered = runner.rendered();
        assert_eq!(rendered.len(), 2);
        assert!(rendered.iter().all(|c| c.starts_with("dpkg-query")));
    }

    #[test]
    fn test_failed_refresh_is_converge_failure() {
        let runner = FakeRunner::new()
            .on("dpkg-query", ok(""))
            .on("apt-get update", exit(100, "Temporary failure resolving"));

        assert!(matches!(
            index().converge(&runner),
            Err(Error::ConvergeFailure { exit_code: 100, .. })
        ));
    }
}
