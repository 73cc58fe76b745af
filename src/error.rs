//! Error types shared by the build engine and the HTTP layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::ci::targets::TargetError;

/// An external command (git, go) that could not be run or exited non-zero.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{command} failed ({status}): {stderr}")]
    Failed {
        command: String,
        /// Exit code, `None` when the process was killed by a signal.
        code: Option<i32>,
        status: String,
        stderr: String,
    },

    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Failed { code, .. } => *code,
            Self::Io { .. } => None,
        }
    }
}

/// Broad classification of [`CiError`], used by callers deciding how to report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The project clone is missing or unreadable.
    Open,
    /// The reference is unknown to the repository, even after a refresh.
    Resolution,
    /// The build working directory or commit description could not be prepared.
    BuildSetup,
}

/// Errors returned synchronously by project, reference and build lookups.
#[derive(Debug, Error)]
pub enum CiError {
    #[error("project {name:?} not found at {}: {source}", path.display())]
    ProjectNotFound {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read remote of project {name:?}: {source}")]
    RemoteQuery {
        name: String,
        #[source]
        source: CommandError,
    },

    #[error("unknown reference {reference:?}: {source}")]
    UnknownReference {
        reference: String,
        #[source]
        source: CommandError,
    },

    #[error("cannot create build directory {}: {source}", path.display())]
    BuildDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot describe commit {commit}: {source}")]
    Describe {
        commit: String,
        #[source]
        source: CommandError,
    },
}

impl CiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProjectNotFound { .. } | Self::RemoteQuery { .. } => ErrorKind::Open,
            Self::UnknownReference { .. } => ErrorKind::Resolution,
            Self::BuildDir { .. } | Self::Describe { .. } => ErrorKind::BuildSetup,
        }
    }
}

/// Anything that ends a pipeline run in `Failed`.
///
/// These never reach a caller; they are rendered into the build log.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] TargetError),

    /// Checkout or configuration lookup failed.
    #[error("version control error: {0}")]
    Vcs(#[source] CommandError),

    /// The toolchain ran and reported failure. Its output is already in the log.
    #[error("build command exited with {status}: {command}")]
    Toolchain { command: String, status: String },

    #[error("{context}: {source}")]
    System {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn system(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::System {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = CiError> = std::result::Result<T, E>;
