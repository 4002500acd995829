// src/postgres/database.rs

//! Database bootstrap
//!
//! A fresh database goes through a fixed sequence:
//!
//! 1. `createdb`
//! 2. enable the procedural language
//! 3. extension scripts, in the configured order
//! 4. the domain schema
//! 5. `GRANT ALL` on every table then present in `public`
//!
//! The sequence is encoded as a typestate chain ([`Bootstrap`]), so a grant
//! cannot be issued before the schema is loaded and the schema cannot be
//! loaded before the extensions it depends on.
//!
//! Detection is by existence only. If the database is already there, none
//! of the steps above run again, even when the schema file has changed. A
//! bootstrap that failed half way leaves the database behind as-is and the
//! next run will skip it.

use super::{MAINTENANCE_DB, PgAdmin, quote_ident, quote_literal};
use crate::error::Result;
use crate::exec::{CommandRunner, run_mutating, run_probe};
use crate::resource::{Action, ConvergenceResult, Presence, Resource};
use std::marker::PhantomData;
use std::path::PathBuf;
use tracing::{debug, info};

/// Lists `public` tables as ready-to-use qualified identifiers
const PUBLIC_TABLES_SQL: &str = "SELECT quote_ident(schemaname) || '.' || quote_ident(tablename) \
     FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename";

/// A database to bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub name: String,
    /// Applied strictly in order, all before `domain_schema`
    pub extension_scripts: Vec<PathBuf>,
    pub domain_schema: PathBuf,
    /// Receives `GRANT ALL` on every table the schema creates
    pub owner_role: String,
    pub language: String,
}

/// A database target bound to the cluster it lives on
#[derive(Debug, Clone)]
pub struct Database {
    pg: PgAdmin,
    pub target: DatabaseTarget,
}

impl Database {
    pub fn new(pg: PgAdmin, target: DatabaseTarget) -> Self {
        Self { pg, target }
    }
}

impl Resource for Database {
    type State = Presence;

    fn describe(&self) -> String {
        format!("database {}", self.target.name)
    }

    fn probe(&self, runner: &dyn CommandRunner) -> Presence {
        let sql = format!(
            "SELECT 1 FROM pg_database WHERE datname = {}",
            quote_literal(&self.target.name)
        );
        let found = run_probe(runner, &self.pg.query(MAINTENANCE_DB, &sql))
            .is_some_and(|out| out.lines().any(|l| l.trim() == "1"));
        let presence = if found {
            Presence::Present
        } else {
            Presence::Absent
        };
        debug!("Probed database {}: {}", self.target.name, presence);
        presence
    }

    fn converge(&self, runner: &dyn CommandRunner) -> ConvergenceResult {
        if self.probe(runner) == Presence::Present {
            info!(
                "Database {} already exists; schema and grants are not re-applied",
                self.target.name
            );
            return Ok(Action::NoOp);
        }

        let granted = Bootstrap::start(&self.pg, runner, &self.target)
            .create()?
            .enable_language()?
            .load_extensions()?
            .load_domain_schema()?
            .grant_public_tables()?;

        info!(
            "Database {} bootstrapped; {} table(s) granted to {}",
            self.target.name,
            granted.len(),
            self.target.owner_role
        );
        Ok(Action::Created)
    }
}

/// Bootstrap phases
pub mod phase {
    pub struct Absent;
    pub struct Created;
    pub struct LanguageEnabled;
    pub struct ExtensionsLoaded;
    pub struct SchemaLoaded;
}

/// One fresh bootstrap in progress; `P` is the last completed phase
pub struct Bootstrap<'a, P> {
    pg: &'a PgAdmin,
    runner: &'a dyn CommandRunner,
    target: &'a DatabaseTarget,
    _phase: PhantomData<P>,
}

impl<'a, P> Bootstrap<'a, P> {
    fn advance<N>(self) -> Bootstrap<'a, N> {
        Bootstrap {
            pg: self.pg,
            runner: self.runner,
            target: self.target,
            _phase: PhantomData,
        }
    }

    fn apply_file(&self, path: &std::path::Path) -> Result<()> {
        info!("Applying {} to {}", path.display(), self.target.name);
        run_mutating(self.runner, &self.pg.execute_file(&self.target.name, path))?;
        Ok(())
    }
}

impl<'a> Bootstrap<'a, phase::Absent> {
    pub fn start(
        pg: &'a PgAdmin,
        runner: &'a dyn CommandRunner,
        target: &'a DatabaseTarget,
    ) -> Self {
        Self {
            pg,
            runner,
            target,
            _phase: PhantomData,
        }
    }

    pub fn create(self) -> Result<Bootstrap<'a, phase::Created>> {
        info!("Creating database {}", self.target.name);
        run_mutating(self.runner, &self.pg.createdb(&self.target.name))?;
        Ok(self.advance())
    }
}

impl<'a> Bootstrap<'a, phase::Created> {
    pub fn enable_language(self) -> Result<Bootstrap<'a, phase::LanguageEnabled>> {
        let sql = format!(
            "CREATE EXTENSION IF NOT EXISTS {}",
            quote_ident(&self.target.language)
        );
        info!(
            "Enabling language {} in {}",
            self.target.language, self.target.name
        );
        run_mutating(self.runner, &self.pg.execute(&self.target.name, &sql))?;
        Ok(self.advance())
    }
}

impl<'a> Bootstrap<'a, phase::LanguageEnabled> {
    pub fn load_extensions(self) -> Result<Bootstrap<'a, phase::ExtensionsLoaded>> {
        for script in &self.target.extension_scripts {
            self.apply_file(script)?;
        }
        Ok(self.advance())
    }
}

impl<'a> Bootstrap<'a, phase::ExtensionsLoaded> {
    pub fn load_domain_schema(self) -> Result<Bootstrap<'a, phase::SchemaLoaded>> {
        self.apply_file(&self.target.domain_schema)?;
        Ok(self.advance())
    }
}

impl<'a> Bootstrap<'a, phase::SchemaLoaded> {
    /// Grant the owner role every table now in `public`; returns the tables
    pub fn grant_public_tables(self) -> Result<Vec<String>> {
        let listing = run_mutating(
            self.runner,
            &self.pg.query(&self.target.name, PUBLIC_TABLES_SQL),
        )?;
        let tables: Vec<String> = listing
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let role = quote_ident(&self.target.owner_role);
        for table in &tables {
            let sql = format!("GRANT ALL ON {} TO {}", table, role);
            debug!("{} in {}", sql, self.target.name);
            run_mutating(self.runner, &self.pg.execute(&self.target.name, &sql))?;
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_support::{FakeRunner, exit, ok};

    fn wave_test() -> Database {
        let contrib = PathBuf::from("/usr/share/postgresql/8.4/contrib");
        Database::new(
            PgAdmin::new("postgres"),
            DatabaseTarget {
                name: "wave_test".to_string(),
                extension_scripts: vec![
                    contrib.join("uuid-ossp.sql"),
                    contrib.join("postgis-1.5/postgis.sql"),
                    contrib.join("postgis-1.5/spatial_ref_sys.sql"),
                ],
                domain_schema: PathBuf::from("/home/wave/wave/db/design/wave.psql"),
                owner_role: "wave".to_string(),
                language: "plpgsql".to_string(),
            },
        )
    }

    /// The psql/createdb part of each command, without the sudo prefix
    fn tails(runner: &FakeRunner) -> Vec<String> {
        runner
            .rendered()
            .into_iter()
            .map(|c| c.trim_start_matches("sudo -n -u postgres -- ").to_string())
            .collect()
    }

    #[test]
    fn test_fresh_bootstrap_order() {
        let runner = FakeRunner::new()
            .on("FROM pg_database", ok(""))
            .on("FROM pg_tables", ok("public.buoy\npublic.station\n"));

        assert_eq!(wave_test().converge(&runner).unwrap(), Action::Created);

        let psql = "psql -X -q -v ON_ERROR_STOP=1 -d wave_test";
        let contrib = "/usr/share/postgresql/8.4/contrib";
        let calls = tails(&runner);
        assert_eq!(calls[1], "createdb wave_test");
        assert_eq!(
            calls[2],
            format!("{} -c 'CREATE EXTENSION IF NOT EXISTS \"plpgsql\"'", psql)
        );
        assert_eq!(calls[3], format!("{} -f {}/uuid-ossp.sql", psql, contrib));
        assert_eq!(calls[4], format!("{} -f {}/postgis-1.5/postgis.sql", psql, contrib));
        assert_eq!(
            calls[5],
            format!("{} -f {}/postgis-1.5/spatial_ref_sys.sql", psql, contrib)
        );
        assert_eq!(
            calls[6],
            format!("{} -f /home/wave/wave/db/design/wave.psql", psql)
        );
        assert!(calls[7].contains("FROM pg_tables"));
        assert_eq!(
            calls[8],
            format!("{} -c 'GRANT ALL ON public.buoy TO \"wave\"'", psql)
        );
        assert_eq!(
            calls[9],
            format!("{} -c 'GRANT ALL ON public.station TO \"wave\"'", psql)
        );
        assert_eq!(calls.len(), 10);
    }

    #[test]
    fn test_existing_database_short_circuits() {
        let runner = FakeRunner::new().on("FROM pg_database", ok("1\n"));

        assert_eq!(wave_test().converge(&runner).unwrap(), Action::NoOp);
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_failed_extension_stops_before_schema() {
        let runner = FakeRunner::new()
            .on("FROM pg_database", ok(""))
            .on("postgis.sql", exit(3, "ERROR: type \"uuid\" does not exist"));

        let result = wave_test().converge(&runner);
        assert!(matches!(result, Err(Error::ConvergeFailure { exit_code: 3, .. })));

        let calls = tails(&runner);
        assert!(calls.last().unwrap().ends_with("postgis-1.5/postgis.sql"));
        assert!(calls.iter().all(|c| !c.contains("wave.psql")));
        assert!(calls.iter().all(|c| !c.contains("GRANT")));
    }

    #[test]
    fn test_failed_createdb_stops_everything() {
        let runner = FakeRunner::new()
            .on("FROM pg_database", ok(""))
            .on("createdb", exit(1, "permission denied to create database"));

        assert!(wave_test().converge(&runner).is_err());
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_empty_schema_grants_nothing() {
        let runner = FakeRunner::new().on("FROM pg_database", ok(""));
        assert_eq!(wave_test().converge(&runner).unwrap(), Action::Created);
        assert!(tails(&runner).iter().all(|c| !c.contains("GRANT")));
    }

    #[test]
    fn test_grant_listing_failure_is_fatal() {
        let runner = FakeRunner::new()
            .on("FROM pg_database", ok(""))
            .on("FROM pg_tables", exit(2, "connection lost"));
        assert!(matches!(
            wave_test().converge(&runner),
            Err(Error::ConvergeFailure { .. })
        ));
    }
}
