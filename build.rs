// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

const DEFAULT_JOURNAL_PATH: &str = "/var/lib/wavedeploy/journal.db";

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .default_value("deploy-config.json")
        .help("Deployment configuration (JSON)")
}

fn journal_arg() -> Arg {
    Arg::new("journal")
        .short('j')
        .long("journal")
        .value_name("PATH")
        .default_value(DEFAULT_JOURNAL_PATH)
        .help("Journal path")
}

fn build_cli() -> Command {
    Command::new("wavedeploy")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Wavedeploy Contributors")
        .about("Idempotent provisioning for the wave forecasting environment")
        .subcommand_required(false)
        .subcommand(
            Command::new("apply")
                .about("Converge the host to the configured state")
                .arg(config_arg())
                .arg(journal_arg())
                .arg(
                    Arg::new("no_journal")
                        .long("no-journal")
                        .action(ArgAction::SetTrue)
                        .help("Do not record this run in the journal"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Show the ordered steps without running anything")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Probe the current state of every step (read-only)")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Uninstall a package")
                .arg(Arg::new("package_name").required(true).help("Package name to remove"))
                .arg(
                    Arg::new("system")
                        .long("system")
                        .action(ArgAction::SetTrue)
                        .help("Remove a system package with apt instead of a Python package"),
                )
                .arg(
                    Arg::new("virtualenv")
                        .long("virtualenv")
                        .value_name("PATH")
                        .help("Virtualenv to remove the Python package from"),
                )
                .arg(
                    Arg::new("pip")
                        .long("pip")
                        .default_value("pip")
                        .help("pip binary"),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Show run history from the journal")
                .arg(journal_arg())
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Also list the steps of each run"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("wavedeploy.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
