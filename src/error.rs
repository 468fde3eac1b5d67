//! Error kinds shared by the generate and evaluate phases.
//!
//! Every variant aborts the current pass; there is no partial-success mode.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A relative path was given where an absolute one is required.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The same (working directory, executable, arguments) triple was
    /// registered twice in one generate pass.
    #[error("duplicate operation: {0}")]
    DuplicateOperation(String),

    /// A declared input or output falls outside the access lists.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("circular dependency: {0}")]
    CircularDependency(String),

    /// The scheduler ran out of ready nodes with nodes left to run.
    #[error("dependency deadlock: {0}")]
    DependencyDeadlock(String),

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task {name:?} failed: {error:#}")]
    TaskFailed { name: String, error: anyhow::Error },

    #[error("interrupted by user")]
    Interrupted,

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        Error::Io {
            context: context.to_string(),
            source,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io {
            context: "io".to_string(),
            source,
        }
    }
}
