// src/exec.rs

//! External command execution
//!
//! Every interaction with the host (package managers, user management,
//! PostgreSQL client tools) goes through a [`CommandRunner`]. Commands are
//! structured argument lists handed straight to the process-spawning
//! primitive; nothing is ever interpreted by a shell.
//!
//! The runner never treats a nonzero exit as an error. Callers decide what an
//! exit status means: probes read it as state, mutating steps go through
//! [`run_mutating`] which turns it into [`Error::ConvergeFailure`].

use crate::error::{Error, Result};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// A command to run: program, argument list, and optional stdin payload
#[derive(Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Fed to the child's stdin; may hold secrets, so it is never rendered
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        if let Some(input) = &self.stdin {
            write!(f, " <stdin: {} bytes>", input.len())?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandLine({})", self)
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by a signal)
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can run a [`CommandLine`] to completion
pub trait CommandRunner {
    /// Run the command, blocking until it exits or its timeout expires
    ///
    /// Fails with [`Error::Execution`] when the process cannot be spawned and
    /// with [`Error::Timeout`] when it had to be killed. A nonzero exit is a
    /// normal [`CommandOutput`].
    fn run(&self, command: &CommandLine) -> Result<CommandOutput>;
}

/// Runs commands as real child processes of this one
///
/// Each command gets a current-thread tokio runtime that lives only for
/// the duration of the call, so callers stay blocking and single-threaded.
/// The child leads its own process group; on timeout the whole group is
/// killed, taking `sudo`'s or `pip`'s own children down with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        debug!("Running: {}", command);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        runtime.block_on(run_child(command))
    }
}

async fn run_child(command: &CommandLine) -> Result<CommandOutput> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| Error::Execution {
        command: command.to_string(),
        source: e,
    })?;
    let group = child.id();

    // stdin is closed when the writer task drops the pipe
    let writer = child
        .stdin
        .take()
        .zip(command.stdin.clone())
        .map(|(mut pipe, input)| {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!("Child closed stdin early: {}", e);
                }
            })
        });
    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    let status = match command.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_elapsed) => {
                kill_process_group(group);
                if let Err(e) = child.kill().await {
                    debug!("Reaping timed-out child failed: {}", e);
                }
                return Err(Error::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
        },
        None => child.wait().await?,
    };

    if let Some(writer) = writer {
        if let Err(e) = writer.await {
            debug!("stdin writer task failed: {}", e);
        }
    }
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: status.code().unwrap_or(-1),
    };
    debug!("Exit status {} from: {}", output.exit_code, command);
    Ok(output)
}

/// Drain a child's output pipe, keeping whatever was read before an error
async fn read_stream<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Reading child output failed after {} bytes: {}", buf.len(), e);
        }
    }
    buf
}

/// SIGKILL every process in the group led by `leader`
#[cfg(unix)]
fn kill_process_group(leader: Option<u32>) {
    let Some(pid) = leader.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group id is the child we spawned
    // with process_group(0), so no unrelated processes are addressed.
    let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "killpg({}) failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: Option<u32>) {}

/// Run a command that changes host state; a nonzero exit becomes an error
pub fn run_mutating(runner: &dyn CommandRunner, command: &CommandLine) -> Result<CommandOutput> {
    let output = runner.run(command)?;
    if !output.success() {
        return Err(Error::ConvergeFailure {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

/// Run a read-only query and return its stdout, or `None` on any failure
///
/// Probe failures are state, not errors: a missing tool, a timeout, a
/// nonzero exit and blank output all read as "nothing there".
pub fn run_probe(runner: &dyn CommandRunner, command: &CommandLine) -> Option<String> {
    match runner.run(command) {
        Ok(output) if output.success() && !output.stdout.trim().is_empty() => Some(output.stdout),
        Ok(output) => {
            debug!(
                "Probe `{}` found nothing (exit status {})",
                command, output.exit_code
            );
            None
        }
        Err(e) => {
            debug!("Probe failed, treating as absent: {}", e);
            None
        }
    }
}
