//! Drivers for the two phases over a target directory: generate writes the
//! operation graph, evaluate runs it and records the results.

use crate::build_task::{BuildTaskManager, Parameters, TaskRegistry};
use crate::error::{Error, Result};
use crate::files::FileSystemState;
use crate::fs::FileSystem;
use crate::generate::{AccessLists, OperationGraphGenerator};
use crate::graph::OperationGraph;
use crate::process::ProcessRunner;
use crate::progress::Progress;
use crate::work::{self, Outcome, Work};
use crate::{db, trace};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the persisted state of one target directory lives.
#[derive(Debug, Clone)]
pub struct TargetLayout {
    soup: PathBuf,
}

impl TargetLayout {
    pub fn new(target_directory: impl AsRef<Path>) -> Self {
        TargetLayout {
            soup: target_directory.as_ref().join(".soup"),
        }
    }

    pub fn soup_directory(&self) -> &Path {
        &self.soup
    }

    pub fn read_access(&self) -> PathBuf {
        self.soup.join("GenerateReadAccess.txt")
    }

    pub fn write_access(&self) -> PathBuf {
        self.soup.join("GenerateWriteAccess.txt")
    }

    pub fn evaluate_graph(&self) -> PathBuf {
        self.soup.join("GenerateEvaluateGraph.bog")
    }

    pub fn result_graph(&self) -> PathBuf {
        self.soup.join("EvaluateResultGraph.bog")
    }
}

/// Read a newline-delimited path list.  None if the file does not exist.
pub fn read_path_list(path: &Path) -> Result<Option<Vec<String>>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::io(format!("read {}", path.display()), err)),
    };
    Ok(Some(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

/// The generator's access lists, or None when neither list is present,
/// which leaves declared paths unchecked.
pub fn read_access_lists(layout: &TargetLayout) -> Result<Option<AccessLists>> {
    let read = read_path_list(&layout.read_access())?;
    let write = read_path_list(&layout.write_access())?;
    if read.is_none() && write.is_none() {
        return Ok(None);
    }
    AccessLists::new(read.unwrap_or_default(), write.unwrap_or_default()).map(Some)
}

/// Run every registered build task, derive the graph from the operations
/// they declared, and persist it.
pub fn generate(
    layout: &TargetLayout,
    registry: &TaskRegistry,
    parameters: &Parameters,
) -> Result<OperationGraph> {
    let access = read_access_lists(layout)?;
    let mut generator = OperationGraphGenerator::new(FileSystemState::new(), access);

    let mut manager = BuildTaskManager::new(registry);
    let order = trace::scope("tasks", || manager.execute(parameters, &mut generator))?;
    info!("ran {} build tasks: {}", order.len(), order.join(", "));

    let graph = trace::scope("build_graph", || generator.build_graph())?;
    info!("generated {} operations", graph.len());
    trace::scope("db::save", || db::save(&layout.evaluate_graph(), &graph))?;
    Ok(graph)
}

/// Load the previous results, if any are present and readable.
fn load_previous(layout: &TargetLayout) -> Result<Option<OperationGraph>> {
    match db::load_if_exists(&layout.result_graph()) {
        Ok(previous) => Ok(previous),
        Err(Error::CorruptFile(msg)) => {
            warn!("discarding previous results: {}", msg);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Run the generated graph.  Returns the number of executed operations, or
/// None if an operation failed.  The result graph is written in every case
/// but a fatal error, so a later pass can pick up where this one stopped.
pub fn evaluate(
    layout: &TargetLayout,
    fs: &dyn FileSystem,
    process: Arc<dyn ProcessRunner>,
    progress: &mut dyn Progress,
    parallelism: usize,
    cancel: Option<&AtomicBool>,
) -> Result<Option<usize>> {
    let mut graph = trace::scope("db::load", || db::load(&layout.evaluate_graph()))?;
    let mut files = db::restore_files(&graph)?;

    if let Some(previous) = load_previous(layout)? {
        match work::merge_previous_results(&mut graph, &mut files, &previous) {
            Ok(merged) => info!("carried over {} previous results", merged),
            Err(Error::CorruptFile(msg)) | Err(Error::NotFound(msg)) => {
                warn!("discarding previous results: {}", msg);
                graph = db::load(&layout.evaluate_graph())?;
                files = db::restore_files(&graph)?;
            }
            Err(err) => return Err(err),
        }
    }

    let outcome = {
        let mut work = Work::new(&mut graph, &mut files, fs, process, progress, parallelism);
        if let Some(cancel) = cancel {
            work.set_cancel_flag(cancel);
        }
        trace::scope("work.run", || work.run())?
    };

    graph.compact_files(&files)?;
    trace::scope("db::save", || db::save(&layout.result_graph(), &graph))?;

    match outcome {
        Outcome::Success(n) => Ok(Some(n)),
        Outcome::Failed => Ok(None),
        Outcome::Interrupted => Err(Error::Interrupted),
    }
}
