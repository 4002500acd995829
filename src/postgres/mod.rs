// src/postgres/mod.rs

//! PostgreSQL role and database bootstrap
//!
//! All access goes through the stock client tools (`psql`, `createdb`) run
//! as the cluster's admin user. [`PgAdmin`] builds those command lines; the
//! [`role`] and [`database`] modules hold the convergence logic.

pub mod database;
pub mod role;

pub use database::{Database, DatabaseTarget};
pub use role::Role;

use crate::config::PostgresConfig;
use crate::exec::CommandLine;
use std::path::Path;
use std::time::Duration;

/// Database used for cluster-wide catalog queries and role creation
pub const MAINTENANCE_DB: &str = "postgres";

/// Builds client-tool invocations against one cluster
#[derive(Debug, Clone)]
pub struct PgAdmin {
    admin_user: String,
    use_sudo: bool,
    host: Option<String>,
    port: Option<u16>,
    timeout: Option<Duration>,
}

impl PgAdmin {
    pub fn new(admin_user: impl Into<String>) -> Self {
        Self {
            admin_user: admin_user.into(),
            use_sudo: true,
            host: None,
            port: None,
            timeout: None,
        }
    }

    pub fn from_config(config: &PostgresConfig) -> Self {
        Self {
            admin_user: config.admin_user.clone(),
            use_sudo: config.use_sudo,
            host: config.host.clone(),
            port: config.port,
            timeout: config.command_timeout(),
        }
    }

    pub fn use_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `tool` run as the admin, either through sudo or with `--username`
    fn tool(&self, tool: &str) -> CommandLine {
        let cmd = if self.use_sudo {
            CommandLine::new("sudo")
                .args(["-n", "-u", self.admin_user.as_str(), "--", tool])
        } else {
            CommandLine::new(tool).arg("--username").arg(self.admin_user.as_str())
        };
        let cmd = match &self.host {
            Some(host) => cmd.arg("--host").arg(host.as_str()),
            None => cmd,
        };
        let cmd = match self.port {
            Some(port) => cmd.arg("--port").arg(port.to_string()),
            None => cmd,
        };
        cmd.timeout(self.timeout)
    }

    fn psql(&self, database: &str) -> CommandLine {
        self.tool("psql")
            .args(["-X", "-q", "-v", "ON_ERROR_STOP=1", "-d", database])
    }

    /// Unaligned, tuples-only query; one row per stdout line
    pub fn query(&self, database: &str, sql: &str) -> CommandLine {
        self.psql(database).args(["-t", "-A", "-c", sql])
    }

    /// Execute a single statement passed on the command line
    pub fn execute(&self, database: &str, sql: &str) -> CommandLine {
        self.psql(database).args(["-c", sql])
    }

    /// Execute SQL fed on stdin, keeping it out of the process table
    pub fn execute_stdin(&self, database: &str, sql: String) -> CommandLine {
        self.psql(database).stdin(sql)
    }

    /// Execute a SQL file against `database`
    pub fn execute_file(&self, database: &str, path: &Path) -> CommandLine {
        self.psql(database).arg("-f").arg(path.to_string_lossy())
    }

    pub fn createdb(&self, name: &str) -> CommandLine {
        self.tool("createdb").arg(name)
    }
}

/// Quote an identifier for interpolation into SQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into SQL
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("wave"), "\"wave\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("'; DROP ROLE x; --"), "'''; DROP ROLE x; --'");
    }

    #[test]
    fn test_sudo_invocation() {
        let pg = PgAdmin::new("postgres");
        assert_eq!(
            pg.createdb("wave_test").to_string(),
            "sudo -n -u postgres -- createdb wave_test"
        );
        assert_eq!(
            pg.execute_file("wave_test", Path::new("/usr/share/postgis.sql")).to_string(),
            "sudo -n -u postgres -- psql -X -q -v ON_ERROR_STOP=1 -d wave_test -f /usr/share/postgis.sql"
        );
    }

    #[test]
    fn test_direct_invocation_with_host_and_timeout() {
        let config: PostgresConfig = serde_json::from_str(
            r#"{ "admin_user": "admin", "use_sudo": false, "host": "db.local",
                 "port": 5433, "command_timeout_secs": 120, "databases": [] }"#,
        )
        .unwrap();
        let pg = PgAdmin::from_config(&config);
        let cmd = pg.query(MAINTENANCE_DB, "SELECT 1");
        assert_eq!(
            cmd.to_string(),
            "psql --username admin --host db.local --port 5433 -X -q -v ON_ERROR_STOP=1 -d postgres -t -A -c 'SELECT 1'"
        );
        assert_eq!(cmd.timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_stdin_sql_is_not_rendered() {
        let pg = PgAdmin::new("postgres");
        let cmd = pg.execute_stdin(MAINTENANCE_DB, "CREATE ROLE x PASSWORD 'p'".to_string());
        assert!(!cmd.to_string().contains("PASSWORD"));
        assert!(cmd.stdin.is_some());
    }
}
