// src/packages/pip.rs

//! Python packages through pip

use crate::error::Result;
use crate::exec::CommandLine;
use crate::packages::DEFAULT_TIMEOUT;
use crate::packages::traits::{PackageManager, PackageSource, PackageSpec};
use std::path::Path;
use std::time::Duration;

/// pip invocation settings
#[derive(Debug, Clone)]
pub struct Pip {
    binary: String,
    timeout: Duration,
}

impl Pip {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The pip to use for `spec`: the scope's own pip when it has one
    fn command(&self, spec: &PackageSpec) -> CommandLine {
        let program = match &spec.isolation_scope {
            Some(scope) => scoped_binary(scope, &self.binary),
            None => self.binary.clone(),
        };
        CommandLine::new(program).timeout(Some(self.timeout))
    }
}

impl Default for Pip {
    fn default() -> Self {
        Self::new("pip")
    }
}

/// `<scope>/bin/<name of pip>`
fn scoped_binary(scope: &Path, binary: &str) -> String {
    let name = Path::new(binary)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("pip");
    scope.join("bin").join(name).to_string_lossy().into_owned()
}

/// PEP 503 name normalisation: case-insensitive, runs of `-_.` are equal
fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}

impl PackageManager for Pip {
    fn label(&self) -> &'static str {
        "pip"
    }

    fn list_installed(&self, spec: &PackageSpec) -> CommandLine {
        self.command(spec).arg("freeze")
    }

    fn parse_installed(&self, spec: &PackageSpec, stdout: &str) -> Option<String> {
        let wanted = normalize(&spec.name);
        stdout.lines().find_map(|line| {
            let (name, version) = line.trim().split_once("==")?;
            let version = version.trim();
            (normalize(name.trim()) == wanted && !version.is_empty()).then(|| version.to_string())
        })
    }

    fn install(&self, spec: &PackageSpec) -> Result<CommandLine> {
        let cmd = self.command(spec).args(["install", "-q"]);
        let cmd = match &spec.source {
            PackageSource::Registry => match &spec.desired_version {
                Some(version) => cmd.arg(format!("{}=={}", spec.name, version)),
                None => cmd.arg(spec.name.as_str()),
            },
            PackageSource::LocalFile(path) => cmd.arg(path.to_string_lossy()),
            PackageSource::Vcs(url) => cmd.arg("-e").arg(format!("{}#egg={}", url, spec.name)),
        };
        Ok(cmd)
    }

    fn uninstall(&self, spec: &PackageSpec) -> CommandLine {
        self.command(spec)
            .args(["uninstall", "-q", "-y"])
            .arg(spec.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_installed_exact_name() {
        let pip = Pip::default();
        let spec = PackageSpec::new("numpy");
        let freeze = "numpydoc==1.1.0\nNumPy==1.4.0\nscipy==0.8.0\n";
        assert_eq!(pip.parse_installed(&spec, freeze).as_deref(), Some("1.4.0"));
    }

    #[test]
    fn test_parse_installed_normalizes_separators() {
        let pip = Pip::default();
        let spec = PackageSpec::new("python_dateutil");
        let freeze = "Python-Dateutil==2.8.2\n";
        assert_eq!(pip.parse_installed(&spec, freeze).as_deref(), Some("2.8.2"));
    }

    #[test]
    fn test_parse_installed_ignores_editables_and_garbage() {
        let pip = Pip::default();
        let spec = PackageSpec::new("wave");
        let freeze = "-e git+https://github.com/serc/wave.git@abc#egg=wave\nwave==\nnot a line\n";
        assert_eq!(pip.parse_installed(&spec, freeze), None);
    }

    #[test]
    fn test_registry_install_is_pinned() {
        let pip = Pip::default();
        let cmd = pip.install(&PackageSpec::new("numpy").version("1.4.0")).unwrap();
        assert_eq!(cmd.to_string(), "pip install -q numpy==1.4.0");
        assert_eq!(cmd.timeout, Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_unpinned_registry_install() {
        let pip = Pip::default();
        let cmd = pip.install(&PackageSpec::new("flask")).unwrap();
        assert_eq!(cmd.to_string(), "pip install -q flask");
    }

    #[test]
    fn test_file_and_vcs_installs() {
        let pip = Pip::default();
        let file = PackageSpec::new("h5py")
            .version("1.3.0")
            .source(PackageSource::LocalFile(PathBuf::from("/tmp/h5py-1.3.0.tar.gz")));
        assert_eq!(
            pip.install(&file).unwrap().to_string(),
            "pip install -q /tmp/h5py-1.3.0.tar.gz"
        );

        let vcs = PackageSpec::new("wave")
            .source(PackageSource::Vcs("git+https://github.com/serc/wave.git".to_string()));
        assert_eq!(
            pip.install(&vcs).unwrap().to_string(),
            "pip install -q -e git+https://github.com/serc/wave.git#egg=wave"
        );
    }

    #[test]
    fn test_scope_applies_to_every_command() {
        let pip = Pip::new("pip").with_timeout(Duration::from_secs(30));
        let spec = PackageSpec::new("numpy").version("1.4.0").scope("/opt/wave-env");

        assert_eq!(pip.list_installed(&spec).program, "/opt/wave-env/bin/pip");
        assert_eq!(pip.install(&spec).unwrap().program, "/opt/wave-env/bin/pip");
        assert_eq!(
            pip.uninstall(&spec).to_string(),
            "/opt/wave-env/bin/pip uninstall -q -y numpy"
        );
        assert_eq!(pip.uninstall(&spec).timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_scoped_binary_keeps_binary_name() {
        assert_eq!(
            scoped_binary(Path::new("/opt/env"), "/usr/local/bin/pip2.7"),
            "/opt/env/bin/pip2.7"
        );
    }
}
