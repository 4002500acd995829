// src/account.rs

//! The isolated OS account that owns the modelling environment
//!
//! Creating the account needs a crypt hash of the configured password, and
//! the helper that produces it is itself a system package. The plan installs
//! that package in an earlier step, so by the time [`UserAccount::converge`]
//! runs the order is fixed: install hashing tool, compute hash, create user.

use crate::config::Secret;
use crate::error::{Error, Result};
use crate::exec::{CommandLine, CommandRunner, run_mutating, run_probe};
use crate::resource::{Action, ConvergenceResult, Presence, Resource};
use std::path::PathBuf;
use tracing::{debug, info};

/// Desired OS account
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub name: String,
    pub home: PathBuf,
    pub shell: String,
    password: Secret,
}

impl UserAccount {
    pub fn new(
        name: impl Into<String>,
        home: PathBuf,
        shell: impl Into<String>,
        password: Secret,
    ) -> Self {
        Self {
            name: name.into(),
            home,
            shell: shell.into(),
            password,
        }
    }

    /// Compute an MD5-crypt hash; the plaintext only ever travels on stdin
    fn password_hash(&self, runner: &dyn CommandRunner) -> Result<String> {
        let cmd = CommandLine::new("makepasswd")
            .args(["--clearfrom=-", "--crypt-md5"])
            .stdin(format!("{}\n", self.password.expose()));
        let output = run_mutating(runner, &cmd)?;
        parse_makepasswd(&output.stdout)
            .ok_or_else(|| Error::PasswordHash(format!("no hash in output of `{}`", cmd)))
    }
}

/// makepasswd prints `<clear>   <hash>`; the hash is the last field
fn parse_makepasswd(stdout: &str) -> Option<String> {
    let hash = stdout.lines().next()?.split_whitespace().last()?;
    hash.starts_with('$').then(|| hash.to_string())
}

impl Resource for UserAccount {
    type State = Presence;

    fn describe(&self) -> String {
        format!("OS account {}", self.name)
    }

    fn probe(&self, runner: &dyn CommandRunner) -> Presence {
        let cmd = CommandLine::new("getent").args(["passwd", self.name.as_str()]);
        let presence = match run_probe(runner, &cmd) {
            Some(_) => Presence::Present,
            None => Presence::Absent,
        };
        debug!("Probed OS account {}: {}", self.name, presence);
        presence
    }

    /// An existing account is left exactly as it is, password included
    fn converge(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        if self.probe(runner) == Presence::Present {
            info!("OS account {} already exists", self.name);
            return Ok(Action::NoOp);
        }

        let hash = self.password_hash(runner)?;
        let cmd = CommandLine::new("useradd")
            .arg("--create-home")
            .arg("--home-dir")
            .arg(self.home.to_string_lossy())
            .arg("--shell")
            .arg(self.shell.as_str())
            .arg("--password")
            .arg(hash)
            .arg(self.name.as_str());
        info!("Creating OS account {}", self.name);
        run_mutating(runner, &cmd)?;
        Ok(Action::Created)
    }
}
