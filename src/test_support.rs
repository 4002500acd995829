// src/test_support.rs

//! Scripted command runner shared by unit tests

use crate::error::{Error, Result};
use crate::exec::{CommandLine, CommandOutput, CommandRunner};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    Timeout,
    SpawnFailure,
}

pub fn ok(stdout: &str) -> Reply {
    Reply::Output(CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    })
}

pub fn exit(code: i32, stderr: &str) -> Reply {
    Reply::Output(CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: code,
    })
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// Records every command and answers from rules matched against the
/// rendered command line. Unmatched commands succeed with empty output.
///
/// A rule with several replies hands them out in order and then keeps
/// repeating the last one, which models the host changing after a step.
#[derive(Default)]
pub struct FakeRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<CommandLine>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, reply: Reply) -> Self {
        self.on_seq(pattern, vec![reply])
    }

    pub fn on_seq(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.rules.borrow_mut().push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.borrow().clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(command.clone());
        let rendered = command.to_string();

        let mut rules = self.rules.borrow_mut();
        let reply = rules
            .iter_mut()
            .find(|rule| rendered.contains(&rule.pattern))
            .and_then(|rule| {
                if rule.replies.len() > 1 {
                    rule.replies.pop_front()
                } else {
                    rule.replies.front().cloned()
                }
            });

        match reply {
            None => Ok(CommandOutput::default()),
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Timeout) => Err(Error::Timeout {
                command: rendered,
                timeout: command.timeout.unwrap_or(Duration::from_secs(0)),
            }),
            Some(Reply::SpawnFailure) => Err(Error::Execution {
                command: rendered,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
        }
    }
}
