//! Evaluation progress reporting, for the purpose of display to the user.

use crate::graph::{OperationId, OperationInfo};
use crate::process::{TaskResult, Termination};
use std::io::Write;
use std::time::Duration;

/// Compute the message to display on the console for a given operation.
pub fn operation_message(op: &OperationInfo) -> String {
    if op.title.is_empty() {
        op.command.to_string()
    } else {
        op.title.clone()
    }
}

/// Trait for evaluation progress notifications.
pub trait Progress {
    /// Called when an operation's command starts.
    fn task_started(&mut self, op: &OperationInfo);

    /// Called when an operation's command completes.
    fn task_finished(&mut self, op: &OperationInfo, result: &TaskResult, elapsed: Duration);

    /// Log a line of output.
    fn log(&mut self, msg: &str);
}

/// Line-at-a-time console output, one line per started or failed operation.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Print full command lines instead of titles.
    verbose: bool,

    /// Last operation announced; its name is not repeated when its output
    /// follows directly.
    last_started: Option<OperationId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn task_started(&mut self, op: &OperationInfo) {
        let msg = if self.verbose {
            op.command.to_string()
        } else {
            operation_message(op)
        };
        self.log(&msg);
        self.last_started = Some(op.id);
    }

    fn task_finished(&mut self, op: &OperationInfo, result: &TaskResult, elapsed: Duration) {
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || self.last_started == Some(op.id) {
                    // Nothing to attribute, or the name is already on the line above.
                } else {
                    self.log(&operation_message(op))
                }
                if self.verbose {
                    self.log(&format!("  took {}ms", elapsed.as_millis()));
                }
            }
            Termination::Interrupted => {
                self.log(&format!("interrupted: {}", operation_message(op)))
            }
            Termination::Failure => self.log(&format!("failed: {}", operation_message(op))),
        };
        if !result.output.is_empty() {
            let _ = std::io::stdout().write_all(&result.output);
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Progress implementation that reports nothing.
#[derive(Default)]
pub struct NoProgress {}

impl Progress for NoProgress {
    fn task_started(&mut self, _op: &OperationInfo) {}
    fn task_finished(&mut self, _op: &OperationInfo, _result: &TaskResult, _elapsed: Duration) {}
    fn log(&mut self, _msg: &str) {}
}
