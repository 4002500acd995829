// src/lib.rs

//! wavedeploy
//!
//! Provisions a single host into a working wave forecasting environment:
//! system and Python packages, an isolated OS account, and PostgreSQL
//! databases with spatial extensions and the domain schema.
//!
//! # Architecture
//!
//! - Probe, then converge: every resource re-derives its state from the host
//!   on each run and issues only the commands needed to reach the desired
//!   state
//! - Fail-fast: a plan is applied strictly in order and stops at the first
//!   failed step
//! - Structured commands: external tools are spawned with argument lists,
//!   never through a shell; secrets travel on stdin
//! - Journal: an optional SQLite audit trail of runs, never consulted for
//!   convergence decisions

pub mod account;
pub mod config;
pub mod db;
mod error;
pub mod exec;
pub mod orchestrator;
pub mod packages;
pub mod postgres;
pub mod resource;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
