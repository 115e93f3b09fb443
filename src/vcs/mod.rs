//! Version-control capability used by the promotion workflow.
//!
//! This module provides the [`VersionControl`] trait, the [`GitCli`]
//! implementation that shells out to `git`, and [`InMemoryVcs`], a scripted
//! implementation for exercising the workflow without a repository.

mod git;
mod memory;

pub use git::GitCli;
pub use memory::{CopyState, InMemoryVcs, VcsCall};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by individual version-control operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VcsError {
    /// The version-control binary could not be started.
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    /// A read-only query (branch, diff) failed.
    #[error("{command} failed: {message}")]
    Query { command: String, message: String },

    /// Fetching from the remote failed.
    #[error("fetch from {remote} failed: {message}")]
    Fetch { remote: String, message: String },

    /// The pull was not a clean fast-forward, or could not reach the remote.
    #[error("fast-forward pull of {remote}/{branch} failed: {message}")]
    Pull {
        remote: String,
        branch: String,
        message: String,
    },

    /// The merge stopped on conflicts, leaving the working copy mid-merge.
    #[error("merge of {reference} failed: {message}")]
    Merge {
        reference: String,
        message: String,
        conflicted_files: Vec<PathBuf>,
    },

    /// The merge was refused before it started; the working copy is unchanged.
    #[error("merge of {reference} refused: {message}")]
    MergeFailed { reference: String, message: String },

    /// The remote refused the push.
    #[error("push to {remote}/{branch} failed: {message}")]
    Push {
        remote: String,
        branch: String,
        message: String,
    },
}

/// Result type alias for version-control operations.
pub type VcsResult<T> = std::result::Result<T, VcsError>;

/// What a no-fast-forward merge did to the current branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A merge commit was created.
    Merged { commit: String },
    /// The branch already contained the merged history; nothing was committed.
    AlreadyUpToDate,
}

/// Operations the promotion workflow needs from the version-control system.
///
/// Every call addresses a working copy by its filesystem path and fails
/// independently with its own [`VcsError`].
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Returns the name of the branch checked out in the working copy.
    async fn current_branch(&self, path: &Path) -> VcsResult<String>;

    /// Returns true if tracked files have unstaged or staged changes.
    async fn has_uncommitted_changes(&self, path: &Path) -> VcsResult<bool>;

    /// Updates remote-tracking references from `remote`.
    async fn fetch(&self, path: &Path, remote: &str) -> VcsResult<()>;

    /// Pulls `branch` from `remote`, refusing anything but a fast-forward.
    async fn pull_fast_forward_only(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
    ) -> VcsResult<()>;

    /// Merges `reference` into the current branch, always creating a merge
    /// commit and never prompting for the commit message.
    async fn merge_no_fast_forward(&self, path: &Path, reference: &str) -> VcsResult<MergeOutcome>;

    /// Pushes `branch` to `remote`.
    async fn push(&self, path: &Path, remote: &str, branch: &str) -> VcsResult<()>;
}
