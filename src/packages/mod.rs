// src/packages/mod.rs

//! Package convergence
//!
//! [`Package`] holds one desired [`PackageSpec`] together with the
//! [`PackageManager`] that can act on it. The convergence policy is the same
//! for every manager:
//!
//! - Local-file and VCS sources have no reliable version check, so their
//!   install command is always issued.
//! - Registry sources are probed first and only installed when the probed
//!   version differs from the desired one (or nothing is installed).

pub mod apt;
pub mod pip;
pub mod traits;

pub use apt::{Apt, PackageIndex};
pub use pip::Pip;
pub use traits::{PackageManager, PackageSource, PackageSpec, PackageState};

use crate::exec::{CommandRunner, run_mutating, run_probe};
use crate::resource::{Action, ConvergenceResult, Resource};
use std::time::Duration;
use tracing::{debug, info};

/// Package builds and index downloads can be slow; default per-command limit
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// A package that should be installed through a particular manager
#[derive(Debug, Clone)]
pub struct Package<M> {
    manager: M,
    spec: PackageSpec,
}

impl<M: PackageManager> Package<M> {
    pub fn new(manager: M, spec: PackageSpec) -> Self {
        Self { manager, spec }
    }

    pub fn spec(&self) -> &PackageSpec {
        &self.spec
    }

    /// Uninstall the package
    ///
    /// Absence is not special-cased; the underlying tool decides whether
    /// removing a missing package is an error.
    pub fn remove(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        let cmd = self.manager.uninstall(&self.spec);
        info!("Removing {} package {}", self.manager.label(), self.spec.name);
        run_mutating(runner, &cmd)?;
        Ok(Action::Removed)
    }

    fn install(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        let cmd = self.manager.install(&self.spec)?;
        info!("Installing {} package {}", self.manager.label(), self.spec);
        run_mutating(runner, &cmd)?;
        Ok(Action::Installed)
    }
}

impl<M: PackageManager> Resource for Package<M> {
    type State = PackageState;

    fn describe(&self) -> String {
        format!("{} package {}", self.manager.label(), self.spec)
    }

    fn probe(&self, runner: &dyn CommandRunner) -> PackageState {
        let cmd = self.manager.list_installed(&self.spec);
        let installed_version =
            run_probe(runner, &cmd).and_then(|out| self.manager.parse_installed(&self.spec, &out));
        debug!(
            "Probed {} package {}: {:?}",
            self.manager.label(),
            self.spec.name,
            installed_version
        );
        PackageState {
            name: self.spec.name.clone(),
            installed_version,
        }
    }

    fn converge(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        match self.spec.source {
            PackageSource::LocalFile(_) | PackageSource::Vcs(_) => self.install(runner),
            PackageSource::Registry => {
                let state = self.probe(runner);
                if state.satisfies(self.spec.desired_version.as_deref()) {
                    info!(
                        "{} package {} already at {}",
                        self.manager.label(),
                        self.spec.name,
                        state.installed_version.as_deref().unwrap_or("?")
                    );
                    return Ok(Action::NoOp);
                }
                self.install(runner)
            }
        }
    }
}
