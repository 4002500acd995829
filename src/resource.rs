// src/resource.rs

//! Desired-state resources
//!
//! A resource pairs a declarative description of what should exist on the
//! host with the imperative logic that makes it so. Each kind (package, OS
//! account, database role, database) implements [`Resource`]:
//!
//! - `probe` is read-only and infallible; anything it cannot determine is
//!   reported as absent.
//! - `converge` compares probed state to desired state and issues the
//!   minimal set of commands, reporting which [`Action`] it took.

use crate::error::Result;
use crate::exec::CommandRunner;
use std::fmt;

/// What a convergence did to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Already in the desired state; no mutating command was issued
    NoOp,
    Created,
    Installed,
    Removed,
    /// Package index downloaded again
    Refreshed,
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::NoOp => "noop",
            Action::Created => "created",
            Action::Installed => "installed",
            Action::Removed => "removed",
            Action::Refreshed => "refreshed",
        }
    }

    /// Whether the host was changed
    pub fn changed(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of converging one resource
pub type ConvergenceResult = Result<Action>;

/// Existence of a named object on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Present => f.write_str("present"),
            Presence::Absent => f.write_str("absent"),
        }
    }
}

/// Common interface for everything the orchestrator can converge
pub trait Resource {
    /// Probed state of this resource
    type State: fmt::Display;

    /// Human-readable identity, used in logs, plans and errors
    fn describe(&self) -> String;

    /// Read current state from the host; never fails
    fn probe(&self, runner: &dyn CommandRunner) -> Self::State;

    /// Bring the host to the desired state
    fn converge(&self, runner: &dyn CommandRunner) -> ConvergenceResult;
}
