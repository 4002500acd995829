// src/orchestrator.rs

//! Ordered, fail-fast application of a provisioning plan
//!
//! A [`Plan`] is a list of [`Step`]s whose order encodes real dependencies:
//! a fresh package index before any system package, compilers before
//! libraries, libraries before Python modules, the hashing tool before the
//! account that needs it, the database role before the databases that grant
//! to it. The [`Orchestrator`] applies them one at a time and stops at the
//! first failure without undoing completed steps.

use crate::account::UserAccount;
use crate::config::DeployConfig;
use crate::db::models::{Run, RunStatus, SchemaDigest, StepRecord};
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::packages::{Apt, Package, PackageIndex, PackageSpec, Pip};
use crate::postgres::{Database, DatabaseTarget, PgAdmin, Role};
use crate::resource::{Action, ConvergenceResult, Resource};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

/// One convergence step
#[derive(Debug, Clone)]
pub enum Step {
    PackageIndex(PackageIndex),
    SystemPackage(Package<Apt>),
    PythonPackage(Package<Pip>),
    Account(UserAccount),
    Role(Role),
    Database(Database),
}

impl Step {
    pub fn describe(&self) -> String {
        match self {
            Step::PackageIndex(r) => r.describe(),
            Step::SystemPackage(r) => r.describe(),
            Step::PythonPackage(r) => r.describe(),
            Step::Account(r) => r.describe(),
            Step::Role(r) => r.describe(),
            Step::Database(r) => r.describe(),
        }
    }

    /// Probed state rendered for display
    pub fn status(&self, runner: &dyn CommandRunner) -> String {
        match self {
            Step::PackageIndex(r) => r.probe(runner).to_string(),
            Step::SystemPackage(r) => r.probe(runner).to_string(),
            Step::PythonPackage(r) => r.probe(runner).to_string(),
            Step::Account(r) => r.probe(runner).to_string(),
            Step::Role(r) => r.probe(runner).to_string(),
            Step::Database(r) => r.probe(runner).to_string(),
        }
    }

    pub fn converge(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        match self {
            Step::PackageIndex(r) => r.converge(runner),
            Step::SystemPackage(r) => r.converge(runner),
            Step::PythonPackage(r) => r.converge(runner),
            Step::Account(r) => r.converge(runner),
            Step::Role(r) => r.converge(runner),
            Step::Database(r) => r.converge(runner),
        }
    }
}

/// An ordered list of steps
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Build the full provisioning plan from a validated configuration
    ///
    /// Order: the apt package index, system packages, Python packages, the
    /// password hashing tool, the OS account, the database role, then each
    /// database in the order configured.
    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        let apt = Apt::default();
        let system_specs = config
            .system_packages
            .iter()
            .map(|entry| entry.to_spec(None))
            .collect::<Result<Vec<_>>>()?;
        let hash_tool = PackageSpec::new(config.user.hash_tool_package.clone());

        let mut index_specs = system_specs.clone();
        index_specs.push(hash_tool.clone());
        let mut steps = vec![Step::PackageIndex(PackageIndex::new(apt.clone(), index_specs))];

        for spec in system_specs {
            steps.push(Step::SystemPackage(Package::new(apt.clone(), spec)));
        }

        let pip = Pip::new(config.pip.binary.clone()).with_timeout(config.pip.timeout());
        for entry in &config.python_packages {
            steps.push(Step::PythonPackage(Package::new(
                pip.clone(),
                entry.to_spec(config.pip.virtualenv.as_deref())?,
            )));
        }

        steps.push(Step::SystemPackage(Package::new(apt, hash_tool)));
        steps.push(Step::Account(UserAccount::new(
            config.user.name.clone(),
            config.user.home(),
            config.user.shell.clone(),
            config.user.password.clone(),
        )));

        let pg = PgAdmin::from_config(&config.postgres);
        steps.push(Step::Role(Role::new(
            pg.clone(),
            config.role_name(),
            config.user.password.clone(),
        )));
        for db in &config.postgres.databases {
            steps.push(Step::Database(Database::new(
                pg.clone(),
                DatabaseTarget {
                    name: db.name.clone(),
                    extension_scripts: db.extension_scripts.clone(),
                    domain_schema: db.domain_schema.clone(),
                    owner_role: config.role_name().to_string(),
                    language: config.postgres.procedural_language.clone(),
                },
            )));
        }

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Result of one completed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub resource: String,
    pub action: Action,
}

/// Summary of a fully successful run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<StepOutcome>,
}

impl RunReport {
    /// Number of steps that changed the host
    pub fn changed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.action.changed()).count()
    }
}

/// Applies plans against a host, optionally journaling each step
pub struct Orchestrator<'a> {
    runner: &'a dyn CommandRunner,
    journal: Option<&'a Connection>,
    config_path: Option<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            journal: None,
            config_path: None,
        }
    }

    pub fn with_journal(mut self, journal: &'a Connection, config_path: Option<String>) -> Self {
        self.journal = Some(journal);
        self.config_path = config_path;
        self
    }

    /// Apply every step in order, stopping at the first failure
    ///
    /// The returned error is [`Error::StepFailed`] wrapping the cause; no
    /// later step is attempted and nothing already done is reverted.
    pub fn apply(&self, plan: &Plan) -> Result<RunReport> {
        let mut run = self.journal.and_then(|conn| {
            let mut run = Run::new(self.config_path.clone());
            journaled(run.insert(conn)).map(|_| run)
        });
        let run_id = run.as_ref().and_then(|r| r.id);

        info!("Applying {} step(s)", plan.len());
        let mut report = RunReport::default();

        for (index, step) in plan.steps.iter().enumerate() {
            let position = index + 1;
            let resource = step.describe();
            debug!("Step {}/{}: {}", position, plan.len(), resource);

            match step.converge(self.runner) {
                Ok(action) => {
                    self.record_step(run_id, position, &resource, Ok(action));
                    if let Step::Database(db) = step {
                        self.track_schema(&db.target, action);
                    }
                    report.outcomes.push(StepOutcome { resource, action });
                }
                Err(e) => {
                    self.record_step(run_id, position, &resource, Err(&e));
                    if let (Some(conn), Some(run)) = (self.journal, run.as_mut()) {
                        journaled(run.finish(conn, RunStatus::Failed));
                    }
                    return Err(Error::StepFailed {
                        position,
                        resource,
                        source: Box::new(e),
                    });
                }
            }
        }

        if let (Some(conn), Some(run)) = (self.journal, run.as_mut()) {
            journaled(run.finish(conn, RunStatus::Succeeded));
        }
        info!(
            "Run complete: {} step(s), {} changed",
            report.outcomes.len(),
            report.changed()
        );
        Ok(report)
    }

    fn record_step(
        &self,
        run_id: Option<i64>,
        position: usize,
        resource: &str,
        result: std::result::Result<Action, &Error>,
    ) {
        let (Some(conn), Some(run_id)) = (self.journal, run_id) else {
            return;
        };
        let mut record = match result {
            Ok(action) => StepRecord::succeeded(
                run_id,
                position as i64,
                resource.to_string(),
                action.as_str(),
            ),
            Err(e) => {
                StepRecord::failed(run_id, position as i64, resource.to_string(), e.to_string())
            }
        };
        journaled(record.insert(conn));
    }

    /// Record the schema digest of a new database, or warn when an existing
    /// database was created from a different schema than the current file
    fn track_schema(&self, target: &DatabaseTarget, action: Action) {
        let Some(conn) = self.journal else {
            return;
        };
        let digest = match file_sha256(&target.domain_schema) {
            Ok(digest) => digest,
            Err(e) => {
                debug!(
                    "Cannot hash {}: {}",
                    target.domain_schema.display(),
                    e
                );
                return;
            }
        };

        if action == Action::Created {
            let record = SchemaDigest::new(
                target.name.clone(),
                target.domain_schema.to_string_lossy().into_owned(),
                digest,
            );
            journaled(record.upsert(conn));
            return;
        }

        if let Some(Some(recorded)) = journaled(SchemaDigest::find(conn, &target.name)) {
            if recorded.sha256 != digest {
                warn!(
                    "Domain schema {} changed since database {} was created on {}; \
                     existing databases are not re-provisioned",
                    target.domain_schema.display(),
                    target.name,
                    recorded.recorded_at
                );
            }
        }
    }
}

/// The journal never stops a run; failures are logged and dropped
fn journaled<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Journal write failed: {}", e);
            None
        }
    }
}

/// Hex SHA-256 of a file's contents
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}
