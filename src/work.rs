//! The evaluate phase: walks the operation graph in dependency order and
//! runs the operations that are out of date.

use crate::db;
use crate::error::{Error, Result};
use crate::files::{FileId, FileSystemState};
use crate::fs::{FileSystem, MTime};
use crate::graph::{OperationGraph, OperationId, OperationInfo};
use crate::process::{ObservedAccess, ProcessRunner, Runner, Termination};
use crate::progress::Progress;
use crate::schedule::ReadyQueue;
use crate::{densemap, trace};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// How an evaluate pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything is up to date; the number is the count of executed
    /// operations.
    Success(usize),
    /// An operation failed; nothing further was started.
    Failed,
    /// The cancellation flag was raised; nothing further was started.
    Interrupted,
}

type MTimes = FxHashMap<FileId, MTime>;

pub struct Work<'a> {
    graph: &'a mut OperationGraph,
    files: &'a mut FileSystemState,
    fs: &'a dyn FileSystem,
    progress: &'a mut dyn Progress,
    runner: Runner,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a mut OperationGraph,
        files: &'a mut FileSystemState,
        fs: &'a dyn FileSystem,
        process: Arc<dyn ProcessRunner>,
        progress: &'a mut dyn Progress,
        parallelism: usize,
    ) -> Self {
        Work {
            graph,
            files,
            fs,
            progress,
            runner: Runner::new(process, parallelism),
            cancel: None,
        }
    }

    /// Checked before starting each operation.
    pub fn set_cancel_flag(&mut self, flag: &'a AtomicBool) {
        self.cancel = Some(flag);
    }

    fn cancelled(&self) -> bool {
        self.cancel.map_or(false, |flag| flag.load(Ordering::SeqCst))
    }

    /// Stat every input and output once, in parallel.  Operations that run
    /// mark their children dirty, so later changes need no re-stat.
    fn stat_all(&self) -> Result<MTimes> {
        let mut ids: Vec<FileId> = self
            .graph
            .operations()
            .flat_map(|op| op.all_inputs().chain(op.all_outputs()))
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let files: &FileSystemState = &*self.files;
        let fs = self.fs;
        ids.par_iter()
            .map(|&id| {
                let path = files.get_file_path(id)?;
                let mtime = fs
                    .stat(path)
                    .map_err(|err| Error::io(format!("stat {}", path), err))?;
                Ok((id, mtime))
            })
            .collect()
    }

    /// Whether an operation must run given the state of its files.
    fn is_stale(&self, op: &OperationInfo, mtimes: &MTimes) -> bool {
        let mtime = |id: FileId| mtimes.get(&id).copied().unwrap_or(MTime::Missing);
        if !op.was_successful_run {
            debug!("{:?}: no previous successful run", op.title);
            return true;
        }
        let mut oldest_output: Option<std::time::SystemTime> = None;
        for id in op.all_outputs() {
            match mtime(id) {
                MTime::Missing => {
                    debug!("{:?}: output {:?} missing", op.title, id);
                    return true;
                }
                MTime::Stamp(t) => {
                    oldest_output = Some(oldest_output.map_or(t, |o| o.min(t)));
                }
            }
        }
        let oldest_output = match oldest_output {
            Some(t) => t,
            None => {
                debug!("{:?}: no outputs", op.title);
                return true;
            }
        };
        // An input the operation rewrites in place is one of its own outputs;
        // only its presence counts.
        let outputs: FxHashSet<FileId> = op.all_outputs().collect();
        for id in op.all_inputs() {
            match mtime(id) {
                MTime::Missing => {
                    debug!("{:?}: input {:?} missing", op.title, id);
                    return true;
                }
                MTime::Stamp(t) if t > oldest_output && !outputs.contains(&id) => {
                    debug!("{:?}: input {:?} newer than outputs", op.title, id);
                    return true;
                }
                MTime::Stamp(_) => {}
            }
        }
        false
    }

    /// Store what a finished command did.
    fn record(
        &mut self,
        id: OperationId,
        success: bool,
        observed: Option<ObservedAccess>,
    ) -> Result<()> {
        let op = &mut self.graph[id];
        op.was_successful_run = success;
        if !success {
            return Ok(());
        }
        match observed {
            Some(observed) => {
                let wd = op.command.working_directory.clone();
                op.observed_input = self.files.to_file_ids(&observed.input, &wd)?;
                op.observed_output = self.files.to_file_ids(&observed.output, &wd)?;
            }
            None => {
                op.observed_input = op.declared_input.clone();
                op.observed_output = op.declared_output.clone();
            }
        }
        Ok(())
    }

    /// Run every stale operation, respecting the graph order.
    pub fn run(&mut self) -> Result<Outcome> {
        let mtimes = trace::scope("stat", || self.stat_all())?;

        let n = self.graph.len();
        let mut remaining = Vec::with_capacity(n);
        let mut successors = Vec::with_capacity(n);
        for op in self.graph.operations() {
            remaining.push(op.dependency_count as usize);
            successors.push(op.children.iter().map(densemap::Index::index).collect());
        }
        let roots: Vec<usize> = self
            .graph
            .root_operations()
            .iter()
            .map(densemap::Index::index)
            .collect();
        let mut queue = ReadyQueue::from_counts(remaining, successors, &roots);

        let mut parent_ran = vec![false; n];
        let mut ran = 0;
        let mut failed = false;
        let mut interrupted = false;
        loop {
            while !failed && !interrupted && self.runner.can_start_more() {
                if self.cancelled() {
                    interrupted = true;
                    break;
                }
                let index = match queue.start_next() {
                    Some(index) => index,
                    None => break,
                };
                let id = OperationId::from(index);
                let op = &self.graph[id];
                if parent_ran[index] || self.is_stale(op, &mtimes) {
                    self.progress.task_started(op);
                    self.runner.start(id, op.command.clone());
                } else {
                    debug!("{:?}: up to date", op.title);
                    queue.finish(index);
                }
            }

            let task = match self.runner.wait() {
                Some(task) => task,
                None => break,
            };
            let index = densemap::Index::index(&task.id);
            let success = task.result.termination == Termination::Success;
            if task.result.termination == Termination::Interrupted {
                interrupted = true;
            }
            self.progress.task_finished(
                &self.graph[task.id],
                &task.result,
                task.span.1.duration_since(task.span.0),
            );
            self.record(task.id, success, task.result.observed)?;
            if success {
                ran += 1;
                for child in &self.graph[task.id].children {
                    parent_ran[densemap::Index::index(child)] = true;
                }
                queue.finish(index);
            } else {
                failed = true;
                queue.abandon(index);
            }
        }

        if interrupted {
            return Ok(Outcome::Interrupted);
        }
        if failed {
            return Ok(Outcome::Failed);
        }
        if let Some(stuck) = queue.stuck() {
            let titles: Vec<&str> = stuck
                .iter()
                .map(|&i| self.graph[OperationId::from(i)].title.as_str())
                .collect();
            return Err(Error::DependencyDeadlock(format!(
                "operations never became ready: {}",
                titles.join(", ")
            )));
        }
        info!("evaluated {} operations, ran {}", n, ran);
        Ok(Outcome::Success(ran))
    }
}

/// Carry run results from the previous build's graph into a freshly
/// generated one.  Operations match by command and must declare the same
/// files; anything else starts over as never run.  Returns how many
/// operations matched.
pub fn merge_previous_results(
    graph: &mut OperationGraph,
    files: &mut FileSystemState,
    previous: &OperationGraph,
) -> Result<usize> {
    let previous_files = db::restore_files(previous)?;
    let paths = |state: &FileSystemState, ids: &[FileId]| -> Result<Vec<String>> {
        ids.iter()
            .map(|&id| Ok(state.get_file_path(id)?.to_string()))
            .collect()
    };
    let path_set = |state: &FileSystemState, ids: &[FileId]| -> Result<Vec<String>> {
        let mut set = paths(state, ids)?;
        set.sort_unstable();
        set.dedup();
        Ok(set)
    };

    let mut merged = 0;
    for index in 0..graph.len() {
        let id = OperationId::from(index);
        let prev = match previous.find_operation(&graph[id].command) {
            Some(prev) => &previous[prev],
            None => continue,
        };
        let op = &graph[id];
        if path_set(&*files, &op.declared_input)? != path_set(&previous_files, &prev.declared_input)?
            || path_set(&*files, &op.declared_output)?
                != path_set(&previous_files, &prev.declared_output)?
        {
            debug!("{:?}: declared files changed", op.title);
            continue;
        }
        let observed_input = paths(&previous_files, &prev.observed_input)?;
        let observed_output = paths(&previous_files, &prev.observed_output)?;
        let op = &mut graph[id];
        op.was_successful_run = prev.was_successful_run;
        op.observed_input = observed_input
            .iter()
            .map(|p| files.to_file_id(p))
            .collect::<Result<_>>()?;
        op.observed_output = observed_output
            .iter()
            .map(|p| files.to_file_id(p))
            .collect::<Result<_>>()?;
        merged += 1;
    }
    Ok(merged)
}
