// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing::{info, warn};
use wavedeploy::config::DeployConfig;
use wavedeploy::db::DEFAULT_JOURNAL_PATH;
use wavedeploy::db::models::{Run, StepRecord};
use wavedeploy::exec::SystemRunner;
use wavedeploy::orchestrator::{Orchestrator, Plan};
use wavedeploy::packages::{Apt, Package, PackageSpec, Pip};

#[derive(Parser)]
#[command(name = "wavedeploy")]
#[command(author, version, long_about = None)]
#[command(about = "Idempotent provisioning for the wave forecasting environment")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge the host to the configured state
    Apply {
        /// Deployment configuration (JSON)
        #[arg(short, long, default_value = "deploy-config.json")]
        config: PathBuf,
        /// Journal path (default: /var/lib/wavedeploy/journal.db)
        #[arg(short, long, default_value = DEFAULT_JOURNAL_PATH)]
        journal: String,
        /// Do not record this run in the journal
        #[arg(long)]
        no_journal: bool,
    },
    /// Show the ordered steps without running anything
    Plan {
        /// Deployment configuration (JSON)
        #[arg(short, long, default_value = "deploy-config.json")]
        config: PathBuf,
    },
    /// Probe the current state of every step (read-only)
    Status {
        /// Deployment configuration (JSON)
        #[arg(short, long, default_value = "deploy-config.json")]
        config: PathBuf,
    },
    /// Uninstall a package
    Remove {
        /// Package name to remove
        package_name: String,
        /// Remove a system package with apt instead of a Python package
        #[arg(long)]
        system: bool,
        /// Virtualenv to remove the Python package from
        #[arg(long)]
        virtualenv: Option<PathBuf>,
        /// pip binary
        #[arg(long, default_value = "pip")]
        pip: String,
    },
    /// Show run history from the journal
    History {
        /// Journal path (default: /var/lib/wavedeploy/journal.db)
        #[arg(short, long, default_value = DEFAULT_JOURNAL_PATH)]
        journal: String,
        /// Also list the steps of each run
        #[arg(short, long)]
        verbose: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Apply {
            config,
            journal,
            no_journal,
        }) => {
            let deploy = DeployConfig::load(&config)?;
            let plan = Plan::from_config(&deploy)?;
            info!("Loaded {} step(s) from {}", plan.len(), config.display());

            let conn = if no_journal {
                None
            } else {
                match wavedeploy::db::init(&journal) {
                    Ok(conn) => Some(conn),
                    Err(e) => {
                        warn!("Journal unavailable, continuing without it: {}", e);
                        None
                    }
                }
            };

            let runner = SystemRunner;
            let mut orchestrator = Orchestrator::new(&runner);
            if let Some(conn) = &conn {
                orchestrator =
                    orchestrator.with_journal(conn, Some(config.display().to_string()));
            }

            let report = match orchestrator.apply(&plan) {
                Ok(report) => report,
                Err(e) => {
                    eprintln!("Provisioning halted: {}", e);
                    std::process::exit(1);
                }
            };

            for outcome in &report.outcomes {
                println!("  [{}] {}", outcome.action, outcome.resource);
            }
            println!(
                "\nProvisioning complete: {} step(s), {} changed",
                report.outcomes.len(),
                report.changed()
            );
            Ok(())
        }
        Some(Commands::Plan { config }) => {
            let deploy = DeployConfig::load(&config)?;
            let plan = Plan::from_config(&deploy)?;

            println!("Plan ({} steps):", plan.len());
            for (index, step) in plan.steps.iter().enumerate() {
                println!("  {:>3}. {}", index + 1, step.describe());
            }
            Ok(())
        }
        Some(Commands::Status { config }) => {
            let deploy = DeployConfig::load(&config)?;
            let plan = Plan::from_config(&deploy)?;
            let runner = SystemRunner;

            for (index, step) in plan.steps.iter().enumerate() {
                println!(
                    "  {:>3}. {} - {}",
                    index + 1,
                    step.describe(),
                    step.status(&runner)
                );
            }
            Ok(())
        }
        Some(Commands::Remove {
            package_name,
            system,
            virtualenv,
            pip,
        }) => {
            let runner = SystemRunner;
            let mut spec = PackageSpec::new(package_name.clone());
            if system {
                if virtualenv.is_some() {
                    return Err(anyhow::anyhow!("--virtualenv only applies to Python packages"));
                }
                Package::new(Apt::default(), spec).remove(&runner)?;
            } else {
                if let Some(scope) = virtualenv {
                    spec = spec.scope(scope);
                }
                Package::new(Pip::new(pip), spec).remove(&runner)?;
            }
            println!("Removed package: {}", package_name);
            Ok(())
        }
        Some(Commands::History { journal, verbose }) => {
            let conn = wavedeploy::db::open(&journal)?;
            let runs = Run::list_all(&conn)?;

            if runs.is_empty() {
                println!("No runs recorded.");
                return Ok(());
            }

            println!("Run history:");
            for run in &runs {
                let id = run.id.unwrap_or_default();
                println!(
                    "  [{}] {} - {} ({})",
                    id,
                    run.started_at,
                    run.config_path.as_deref().unwrap_or("-"),
                    run.status.as_str()
                );
                if verbose {
                    for step in StepRecord::find_by_run(&conn, id)? {
                        let outcome = step
                            .action
                            .as_deref()
                            .or(step.error.as_deref())
                            .unwrap_or("?");
                        println!("        {:>3}. {} - {}", step.position, step.resource, outcome);
                    }
                }
            }
            println!("\nTotal: {} run(s)", runs.len());
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "wavedeploy", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("wavedeploy v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'wavedeploy --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply_defaults() {
        let cli = Cli::try_parse_from(["wavedeploy", "apply"]).unwrap();
        match cli.command {
            Some(Commands::Apply {
                config,
                journal,
                no_journal,
            }) => {
                assert_eq!(config, PathBuf::from("deploy-config.json"));
                assert_eq!(journal, DEFAULT_JOURNAL_PATH);
                assert!(!no_journal);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_parse_remove_with_virtualenv() {
        let cli = Cli::try_parse_from([
            "wavedeploy",
            "remove",
            "numpy",
            "--virtualenv",
            "/opt/wave-env",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Remove {
                package_name,
                system,
                virtualenv,
                pip,
            }) => {
                assert_eq!(package_name, "numpy");
                assert!(!system);
                assert_eq!(virtualenv, Some(PathBuf::from("/opt/wave-env")));
                assert_eq!(pip, "pip");
            }
            _ => panic!("expected remove"),
        }
    }

    #[test]
    fn test_parse_completions_shell() {
        let cli = Cli::try_parse_from(["wavedeploy", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }
}
