//! Error types for branch promotion.

use std::path::PathBuf;
use thiserror::Error;

use crate::vcs::VcsError;
use crate::workflow::{Location, Step};

/// Why the promotion pipeline stopped.
#[derive(Error, Debug)]
pub enum FailureKind {
    /// The working copy has a different branch checked out.
    #[error("{location} working copy is on branch '{actual}', expected '{expected}'")]
    WrongBranch {
        location: Location,
        expected: String,
        actual: String,
    },

    /// The working copy has unstaged or staged changes.
    #[error("{location} working copy has uncommitted changes")]
    DirtyWorkingCopy { location: Location },

    /// Fetch or fast-forward pull failed.
    #[error("failed to sync {location} working copy: {cause}")]
    SyncFailed { location: Location, cause: String },

    /// Merging the development history produced conflicts.
    #[error("merge conflict in {location} working copy: {details}")]
    MergeConflict { location: Location, details: String },

    /// The remote refused the push.
    #[error("push rejected for {location} working copy: {cause}")]
    PushRejected { location: Location, cause: String },

    /// A query against the working copy failed outright.
    #[error("{operation} failed in {location} working copy: {message}")]
    Vcs {
        location: Location,
        operation: &'static str,
        message: String,
    },
}

impl FailureKind {
    /// Returns the working copy the failure refers to.
    pub fn location(&self) -> Location {
        match self {
            FailureKind::WrongBranch { location, .. }
            | FailureKind::DirtyWorkingCopy { location }
            | FailureKind::SyncFailed { location, .. }
            | FailureKind::MergeConflict { location, .. }
            | FailureKind::PushRejected { location, .. }
            | FailureKind::Vcs { location, .. } => *location,
        }
    }

    /// Wraps a query failure that is not itself one of the gated conditions.
    pub(crate) fn query(location: Location, operation: &'static str, err: VcsError) -> Self {
        FailureKind::Vcs {
            location,
            operation,
            message: err.to_string(),
        }
    }
}

/// A promotion that stopped at `step`.
#[derive(Error, Debug)]
#[error("promotion aborted at {step}: {kind}")]
pub struct PromoteError {
    /// The step that failed.
    pub step: Step,
    /// What went wrong.
    #[source]
    pub kind: FailureKind,
}

impl PromoteError {
    pub(crate) fn new(step: Step, kind: FailureKind) -> Self {
        Self { step, kind }
    }
}

/// Top-level error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML.
    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The promotion pipeline aborted.
    #[error(transparent)]
    Promote(#[from] PromoteError),
}

/// Result type alias for promotion operations.
pub type Result<T> = std::result::Result<T, Error>;
