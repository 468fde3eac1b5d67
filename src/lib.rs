pub mod build_task;
pub mod canon;
pub mod db;
pub mod densemap;
pub mod error;
pub mod files;
pub mod fs;
pub mod generate;
pub mod graph;
pub mod load;
pub mod process;
pub mod progress;
mod run;
pub mod schedule;
pub mod signal;
pub mod trace;
pub mod work;

pub use build_task::{BuildTask, BuildTaskManager, Parameters, TaskContext, TaskRegistry};
pub use error::{Error, Result};
pub use files::{FileId, FileSystemState};
pub use generate::{AccessLists, OperationGraphGenerator};
pub use graph::{CommandInfo, OperationGraph, OperationId, OperationInfo};
pub use run::run;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
