//! Runs operation commands, potentially in parallel.
//! Unaware of the operation graph; just command execution.

use crate::graph::{CommandInfo, OperationId};
use std::sync::{mpsc, Arc};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// Files a command was seen to touch, as reported by the runner.  Relative
/// paths are relative to the command's working directory.
#[derive(Debug, Clone, Default)]
pub struct ObservedAccess {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

/// The result of executing an operation's command.
#[derive(Debug)]
pub struct TaskResult {
    pub termination: Termination,
    /// Console output.
    pub output: Vec<u8>,
    /// None when the runner cannot monitor file access; the declared files
    /// are recorded in its place.
    pub observed: Option<ObservedAccess>,
}

/// Executes commands.  Shared between worker threads.
pub trait ProcessRunner: Send + Sync {
    /// Returns an Err() if we failed outside of the process itself.
    fn run(&self, command: &CommandInfo) -> anyhow::Result<TaskResult>;
}

/// Runs commands through the system shell, without access monitoring.
#[derive(Default)]
pub struct ShellRunner {}

impl ShellRunner {
    pub fn new() -> Self {
        ShellRunner {}
    }
}

impl ProcessRunner for ShellRunner {
    fn run(&self, command: &CommandInfo) -> anyhow::Result<TaskResult> {
        let cmdline = if command.arguments.is_empty() {
            command.executable.clone()
        } else {
            format!("{} {}", command.executable, command.arguments)
        };
        #[cfg(unix)]
        let mut cmd = std::process::Command::new("/bin/sh");
        #[cfg(unix)]
        cmd.arg("-c").arg(&cmdline);
        #[cfg(windows)]
        let mut cmd = std::process::Command::new("cmd");
        #[cfg(windows)]
        cmd.arg("/c").arg(&cmdline);

        let mut out = cmd
            .current_dir(&command.working_directory)
            .output()
            .map_err(|err| anyhow::anyhow!("spawn {:?}: {}", cmdline, err))?;
        let mut output = Vec::new();
        output.append(&mut out.stdout);
        output.append(&mut out.stderr);

        let termination = if out.status.success() {
            Termination::Success
        } else {
            interrupted_or_failed(&out.status)
        };
        Ok(TaskResult {
            termination,
            output,
            observed: None,
        })
    }
}

#[cfg(unix)]
fn interrupted_or_failed(status: &std::process::ExitStatus) -> Termination {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(libc::SIGINT) => Termination::Interrupted,
        _ => Termination::Failure,
    }
}

#[cfg(not(unix))]
fn interrupted_or_failed(_status: &std::process::ExitStatus) -> Termination {
    Termination::Failure
}

pub struct FinishedTask {
    pub id: OperationId,
    pub span: (Instant, Instant),
    pub result: TaskResult,
}

/// Starts commands on their own threads, at most `parallelism` at a time,
/// and hands back results as they complete.
pub struct Runner {
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    running: usize,
    parallelism: usize,
    process: Arc<dyn ProcessRunner>,
}

impl Runner {
    pub fn new(process: Arc<dyn ProcessRunner>, parallelism: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            finished_send: tx,
            finished_recv: rx,
            running: 0,
            parallelism: parallelism.max(1),
            process,
        }
    }

    pub fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    pub fn start(&mut self, id: OperationId, command: CommandInfo) {
        let tx = self.finished_send.clone();
        let process = self.process.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = process.run(&command).unwrap_or_else(|err| TaskResult {
                termination: Termination::Failure,
                output: err.to_string().into_bytes(),
                observed: None,
            });
            let finish = Instant::now();

            let task = FinishedTask {
                id,
                span: (start, finish),
                result,
            };
            // The receiver is gone only if evaluation already gave up.
            let _ = tx.send(task);
        });
        self.running += 1;
    }

    /// Block until a started command completes.  None if nothing is running.
    pub fn wait(&mut self) -> Option<FinishedTask> {
        if self.running == 0 {
            return None;
        }
        // The runner holds a sender, so recv() cannot see a closed channel.
        let task = self.finished_recv.recv().ok()?;
        self.running -= 1;
        Some(task)
    }
}
