//! Scripted in-memory implementation of [`VersionControl`].
//!
//! Each working copy is a [`CopyState`] keyed by path. Failures are injected
//! per copy, and every call is recorded so callers can check which
//! operations ran and in what order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{MergeOutcome, VcsError, VcsResult, VersionControl};

/// Simulated state of one working copy.
#[derive(Debug, Clone, Default)]
pub struct CopyState {
    /// Branch currently checked out.
    pub branch: String,
    /// Whether tracked files have unstaged or staged changes.
    pub dirty: bool,
    /// If set, `fetch` fails with this message.
    pub fetch_error: Option<String>,
    /// If set, `pull_fast_forward_only` fails with this message.
    pub pull_error: Option<String>,
    /// If set, `merge_no_fast_forward` stops with these files unmerged.
    pub merge_conflicts: Option<Vec<PathBuf>>,
    /// If set, `merge_no_fast_forward` refuses to start with this message.
    pub merge_error: Option<String>,
    /// If set, `push` is rejected with this message.
    pub push_error: Option<String>,
    /// References already merged into the current branch.
    pub merged: HashSet<String>,
    /// Merge commits created in this copy, oldest first.
    pub merge_commits: Vec<String>,
    /// Number of successful pushes.
    pub pushes: usize,
}

impl CopyState {
    /// A clean working copy with `branch` checked out.
    pub fn on_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Default::default()
        }
    }

    /// Marks the copy as having uncommitted changes.
    pub fn dirty(mut self) -> Self {
        self.dirty = true;
        self
    }
}

/// A recorded call against [`InMemoryVcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    CurrentBranch(PathBuf),
    HasUncommittedChanges(PathBuf),
    Fetch {
        path: PathBuf,
        remote: String,
    },
    Pull {
        path: PathBuf,
        remote: String,
        branch: String,
    },
    Merge {
        path: PathBuf,
        reference: String,
    },
    Push {
        path: PathBuf,
        remote: String,
        branch: String,
    },
}

impl VcsCall {
    /// Returns true for operations that talk to the remote.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            VcsCall::Fetch { .. } | VcsCall::Pull { .. } | VcsCall::Push { .. }
        )
    }

    /// Returns the working copy the call addressed.
    pub fn path(&self) -> &Path {
        match self {
            VcsCall::CurrentBranch(path) | VcsCall::HasUncommittedChanges(path) => path,
            VcsCall::Fetch { path, .. }
            | VcsCall::Pull { path, .. }
            | VcsCall::Merge { path, .. }
            | VcsCall::Push { path, .. } => path,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    copies: HashMap<PathBuf, CopyState>,
    calls: Vec<VcsCall>,
    next_commit: u64,
}

/// Version control backed by in-memory working-copy states.
#[derive(Debug, Default)]
pub struct InMemoryVcs {
    inner: Mutex<Inner>,
}

impl InMemoryVcs {
    /// Creates an empty instance with no working copies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a working copy at `path`.
    pub fn with_copy(self, path: impl Into<PathBuf>, state: CopyState) -> Self {
        self.lock().copies.insert(path.into(), state);
        self
    }

    /// Applies `f` to the state of the copy at `path`, if registered.
    pub fn update(&self, path: &Path, f: impl FnOnce(&mut CopyState)) {
        if let Some(state) = self.lock().copies.get_mut(path) {
            f(state);
        }
    }

    /// Returns a snapshot of the copy at `path`.
    pub fn copy(&self, path: &Path) -> Option<CopyState> {
        self.lock().copies.get(path).cloned()
    }

    /// Returns every call made so far, in order.
    pub fn calls(&self) -> Vec<VcsCall> {
        self.lock().calls.clone()
    }

    /// Returns only the calls that reach the remote.
    pub fn network_calls(&self) -> Vec<VcsCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_network())
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave Inner half-updated.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_a_repository(command: &str, path: &Path) -> VcsError {
    VcsError::Query {
        command: command.to_string(),
        message: format!("{} is not a working copy", path.display()),
    }
}

#[async_trait]
impl VersionControl for InMemoryVcs {
    async fn current_branch(&self, path: &Path) -> VcsResult<String> {
        let mut inner = self.lock();
        inner.calls.push(VcsCall::CurrentBranch(path.to_path_buf()));
        inner
            .copies
            .get(path)
            .map(|state| state.branch.clone())
            .ok_or_else(|| not_a_repository("current-branch", path))
    }

    async fn has_uncommitted_changes(&self, path: &Path) -> VcsResult<bool> {
        let mut inner = self.lock();
        inner
            .calls
            .push(VcsCall::HasUncommittedChanges(path.to_path_buf()));
        inner
            .copies
            .get(path)
            .map(|state| state.dirty)
            .ok_or_else(|| not_a_repository("diff", path))
    }

    async fn fetch(&self, path: &Path, remote: &str) -> VcsResult<()> {
        let mut inner = self.lock();
        inner.calls.push(VcsCall::Fetch {
            path: path.to_path_buf(),
            remote: remote.to_string(),
        });
        let state = inner
            .copies
            .get(path)
            .ok_or_else(|| not_a_repository("fetch", path))?;
        match &state.fetch_error {
            Some(message) => Err(VcsError::Fetch {
                remote: remote.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn pull_fast_forward_only(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
    ) -> VcsResult<()> {
        let mut inner = self.lock();
        inner.calls.push(VcsCall::Pull {
            path: path.to_path_buf(),
            remote: remote.to_string(),
            branch: branch.to_string(),
        });
        let state = inner
            .copies
            .get(path)
            .ok_or_else(|| not_a_repository("pull", path))?;
        match &state.pull_error {
            Some(message) => Err(VcsError::Pull {
                remote: remote.to_string(),
                branch: branch.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn merge_no_fast_forward(&self, path: &Path, reference: &str) -> VcsResult<MergeOutcome> {
        let mut inner = self.lock();
        inner.calls.push(VcsCall::Merge {
            path: path.to_path_buf(),
            reference: reference.to_string(),
        });
        inner.next_commit += 1;
        let commit = format!("merge-{}", inner.next_commit);

        let state = inner
            .copies
            .get_mut(path)
            .ok_or_else(|| not_a_repository("merge", path))?;

        if let Some(message) = &state.merge_error {
            return Err(VcsError::MergeFailed {
                reference: reference.to_string(),
                message: message.clone(),
            });
        }

        if let Some(files) = &state.merge_conflicts {
            // A stopped merge leaves the copy dirty until someone resolves it.
            state.dirty = true;
            return Err(VcsError::Merge {
                reference: reference.to_string(),
                message: "automatic merge failed".to_string(),
                conflicted_files: files.clone(),
            });
        }

        if !state.merged.insert(reference.to_string()) {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }
        state.merge_commits.push(commit.clone());
        Ok(MergeOutcome::Merged { commit })
    }

    async fn push(&self, path: &Path, remote: &str, branch: &str) -> VcsResult<()> {
        let mut inner = self.lock();
        inner.calls.push(VcsCall::Push {
            path: path.to_path_buf(),
            remote: remote.to_string(),
            branch: branch.to_string(),
        });
        let state = inner
            .copies
            .get_mut(path)
            .ok_or_else(|| not_a_repository("push", path))?;
        if let Some(message) = &state.push_error {
            return Err(VcsError::Push {
                remote: remote.to_string(),
                branch: branch.to_string(),
                message: message.clone(),
            });
        }
        state.pushes += 1;
        Ok(())
    }
}
