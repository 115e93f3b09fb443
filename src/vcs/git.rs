//! `git` command-line implementation of [`VersionControl`].

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use super::{MergeOutcome, VcsError, VcsResult, VersionControl};

/// Runs `git` in each working copy.
pub struct GitCli {
    /// Path to the git binary.
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Creates a runner using the `git` found on `PATH`.
    pub fn new() -> Self {
        Self {
            git_path: "git".to_string(),
        }
    }

    /// Creates a runner with a custom git binary.
    pub fn with_git_path(git_path: impl Into<String>) -> Self {
        Self {
            git_path: git_path.into(),
        }
    }

    async fn run(&self, path: &Path, args: &[&str]) -> VcsResult<Output> {
        let output = Command::new(&self.git_path)
            .args(args)
            .current_dir(path)
            // Never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| VcsError::Spawn {
                program: self.git_path.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(
            path = ?path,
            args = ?args,
            status = ?output.status.code(),
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git finished"
        );

        Ok(output)
    }

    /// Runs a query that must succeed and returns its trimmed stdout.
    async fn query(&self, path: &Path, args: &[&str]) -> VcsResult<String> {
        let output = self.run(path, args).await?;
        if !output.status.success() {
            return Err(VcsError::Query {
                command: format!("git {}", args.join(" ")),
                message: diagnostic(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs `git diff --quiet`, where exit status 1 means "differences found".
    async fn diff_has_changes(&self, path: &Path, args: &[&str]) -> VcsResult<bool> {
        let output = self.run(path, args).await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(VcsError::Query {
                command: format!("git {}", args.join(" ")),
                message: diagnostic(&output),
            }),
        }
    }

    async fn head(&self, path: &Path) -> VcsResult<String> {
        self.query(path, &["rev-parse", "HEAD"]).await
    }

    /// Returns true if a stopped merge left `MERGE_HEAD` behind.
    async fn merge_in_progress(&self, path: &Path) -> VcsResult<bool> {
        let output = self
            .run(path, &["rev-parse", "-q", "--verify", "MERGE_HEAD"])
            .await?;
        Ok(output.status.success())
    }

    /// Lists files left unmerged by a stopped merge.
    async fn conflicted_files(&self, path: &Path) -> VcsResult<Vec<PathBuf>> {
        let output = self
            .query(path, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(output
            .lines()
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn current_branch(&self, path: &Path) -> VcsResult<String> {
        self.query(path, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn has_uncommitted_changes(&self, path: &Path) -> VcsResult<bool> {
        if self.diff_has_changes(path, &["diff", "--quiet"]).await? {
            return Ok(true);
        }
        self.diff_has_changes(path, &["diff", "--cached", "--quiet"])
            .await
    }

    async fn fetch(&self, path: &Path, remote: &str) -> VcsResult<()> {
        let output = self.run(path, &["fetch", remote]).await?;
        if !output.status.success() {
            return Err(VcsError::Fetch {
                remote: remote.to_string(),
                message: diagnostic(&output),
            });
        }
        Ok(())
    }

    async fn pull_fast_forward_only(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
    ) -> VcsResult<()> {
        let output = self
            .run(path, &["pull", "--ff-only", remote, branch])
            .await?;
        if !output.status.success() {
            return Err(VcsError::Pull {
                remote: remote.to_string(),
                branch: branch.to_string(),
                message: diagnostic(&output),
            });
        }
        Ok(())
    }

    async fn merge_no_fast_forward(&self, path: &Path, reference: &str) -> VcsResult<MergeOutcome> {
        let before = self.head(path).await?;

        let output = self
            .run(path, &["merge", "--no-ff", "--no-edit", reference])
            .await?;

        if !output.status.success() {
            let conflicted_files = self.conflicted_files(path).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to list conflicted files");
                Vec::new()
            });

            // Refusals (untracked files in the way, bad ref, no identity)
            // never start the merge, so nothing is left to resolve.
            if conflicted_files.is_empty() && !self.merge_in_progress(path).await? {
                return Err(VcsError::MergeFailed {
                    reference: reference.to_string(),
                    message: diagnostic(&output),
                });
            }

            return Err(VcsError::Merge {
                reference: reference.to_string(),
                message: merge_diagnostic(&output),
                conflicted_files,
            });
        }

        let after = self.head(path).await?;
        if before == after {
            Ok(MergeOutcome::AlreadyUpToDate)
        } else {
            Ok(MergeOutcome::Merged { commit: after })
        }
    }

    async fn push(&self, path: &Path, remote: &str, branch: &str) -> VcsResult<()> {
        let output = self.run(path, &["push", remote, branch]).await?;
        if !output.status.success() {
            return Err(VcsError::Push {
                remote: remote.to_string(),
                branch: branch.to_string(),
                message: diagnostic(&output),
            });
        }
        Ok(())
    }
}

/// Picks the most useful text from a failed git invocation.
fn diagnostic(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("exited with {}", output.status)
}

/// git reports merge conflicts on stdout as `CONFLICT (...)` lines.
fn merge_diagnostic(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let conflicts: Vec<&str> = stdout
        .lines()
        .filter(|line| line.starts_with("CONFLICT"))
        .collect();
    if conflicts.is_empty() {
        diagnostic(output)
    } else {
        conflicts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    /// Helper to create a temp git repo with one commit on `main`.
    fn create_temp_git_repo() -> TempDir {
        let temp_dir = TempDir::new().expect("failed to create temp dir");

        let git = |args: &[&str]| {
            StdCommand::new("git")
                .args(args)
                .current_dir(temp_dir.path())
                .output()
                .expect("failed to run git");
        };

        git(&["init"]);
        git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&["config", "user.email", "test@test.com"]);
        git(&["config", "user.name", "Test User"]);
        git(&["config", "commit.gpgsign", "false"]);

        std::fs::write(temp_dir.path().join("README.md"), "# Test Repo\n")
            .expect("failed to write README");

        git(&["add", "."]);
        git(&["commit", "-m", "Initial commit"]);

        temp_dir
    }

    #[tokio::test]
    async fn reports_current_branch() {
        let repo = create_temp_git_repo();
        let git = GitCli::new();

        let branch = git.current_branch(repo.path()).await.unwrap();
        assert_eq!(branch, "main");
    }

    #[tokio::test]
    async fn clean_repo_has_no_uncommitted_changes() {
        let repo = create_temp_git_repo();
        let git = GitCli::new();

        assert!(!git.has_uncommitted_changes(repo.path()).await.unwrap());
    }

    #[tokio::test]
    async fn untracked_files_do_not_count_as_dirty() {
        let repo = create_temp_git_repo();
        std::fs::write(repo.path().join("scratch.txt"), "notes\n").unwrap();
        let git = GitCli::new();

        assert!(!git.has_uncommitted_changes(repo.path()).await.unwrap());
    }

    #[tokio::test]
    async fn unstaged_edit_is_dirty() {
        let repo = create_temp_git_repo();
        std::fs::write(repo.path().join("README.md"), "# Changed\n").unwrap();
        let git = GitCli::new();

        assert!(git.has_uncommitted_changes(repo.path()).await.unwrap());
    }

    #[tokio::test]
    async fn staged_file_is_dirty() {
        let repo = create_temp_git_repo();
        std::fs::write(repo.path().join("new.txt"), "staged\n").unwrap();
        StdCommand::new("git")
            .args(["add", "new.txt"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        let git = GitCli::new();

        assert!(git.has_uncommitted_changes(repo.path()).await.unwrap());
    }

    #[tokio::test]
    async fn query_outside_repository_fails() {
        let dir = TempDir::new().unwrap();
        let git = GitCli::new();

        let err = git.current_branch(dir.path()).await.unwrap_err();
        assert!(matches!(err, VcsError::Query { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let repo = create_temp_git_repo();
        let git = GitCli::with_git_path("/nonexistent/git-binary");

        let err = git.current_branch(repo.path()).await.unwrap_err();
        assert!(matches!(err, VcsError::Spawn { .. }));
    }

    #[tokio::test]
    async fn fetch_from_unknown_remote_fails() {
        let repo = create_temp_git_repo();
        let git = GitCli::new();

        let err = git.fetch(repo.path(), "nowhere").await.unwrap_err();
        assert!(matches!(err, VcsError::Fetch { ref remote, .. } if remote == "nowhere"));
    }

    #[tokio::test]
    async fn merge_of_unknown_reference_is_not_a_conflict() {
        let repo = create_temp_git_repo();
        let git = GitCli::new();

        let err = git
            .merge_no_fast_forward(repo.path(), "origin/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, VcsError::MergeFailed { ref reference, .. } if reference == "origin/missing"));
        assert!(!git.merge_in_progress(repo.path()).await.unwrap());
    }

    #[tokio::test]
    async fn merge_of_ancestor_is_already_up_to_date() {
        let repo = create_temp_git_repo();
        StdCommand::new("git")
            .args(["branch", "feature"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        let git = GitCli::new();

        let outcome = git
            .merge_no_fast_forward(repo.path(), "feature")
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::AlreadyUpToDate);
    }
}
