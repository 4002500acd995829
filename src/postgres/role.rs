// src/postgres/role.rs

//! Database login role

use super::{MAINTENANCE_DB, PgAdmin, quote_ident, quote_literal};
use crate::config::Secret;
use crate::exec::{CommandRunner, run_mutating, run_probe};
use crate::resource::{Action, ConvergenceResult, Presence, Resource};
use tracing::{debug, info};

/// A login role, created at most once
///
/// Existence is the only thing compared. A role that already exists keeps
/// whatever password it has, so re-running never invalidates credentials.
#[derive(Debug, Clone)]
pub struct Role {
    pg: PgAdmin,
    pub name: String,
    password: Secret,
}

impl Role {
    pub fn new(pg: PgAdmin, name: impl Into<String>, password: Secret) -> Self {
        Self {
            pg,
            name: name.into(),
            password,
        }
    }
}

impl Resource for Role {
    type State = Presence;

    fn describe(&self) -> String {
        format!("database role {}", self.name)
    }

    fn probe(&self, runner: &dyn CommandRunner) -> Presence {
        let sql = format!(
            "SELECT 1 FROM pg_roles WHERE rolname = {}",
            quote_literal(&self.name)
        );
        let found = run_probe(runner, &self.pg.query(MAINTENANCE_DB, &sql))
            .is_some_and(|out| out.lines().any(|l| l.trim() == "1"));
        let presence = if found {
            Presence::Present
        } else {
            Presence::Absent
        };
        debug!("Probed database role {}: {}", self.name, presence);
        presence
    }

    fn converge(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        if self.probe(runner) == Presence::Present {
            info!("Database role {} already exists", self.name);
            return Ok(Action::NoOp);
        }

        let sql = format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {};\n",
            quote_ident(&self.name),
            quote_literal(self.password.expose())
        );
        info!("Creating database role {}", self.name);
        run_mutating(runner, &self.pg.execute_stdin(MAINTENANCE_DB, sql))?;
        Ok(Action::Created)
    }
}
