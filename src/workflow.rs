//! Promotion workflow.
//!
//! Promotes the development branch into the production branch as a fixed,
//! fail-fast sequence of [`Step`]s over two working copies. A failing step
//! stops the run; steps that already completed are not undone.

use std::fmt;
use std::path::PathBuf;

use crate::config::PromoteConfig;
use crate::error::{FailureKind, PromoteError, Result};
use crate::vcs::{MergeOutcome, VcsError, VersionControl};

/// Which of the two working copies an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Dev,
    Prod,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Dev => write!(f, "development"),
            Location::Prod => write!(f, "production"),
        }
    }
}

/// One stage of the promotion pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CheckDevBranch,
    CheckDevClean,
    SyncDev,
    CheckProdBranch,
    CheckProdClean,
    SyncProd,
    Merge,
    Push,
}

impl Step {
    /// All steps in the order they run.
    pub const ALL: [Step; 8] = [
        Step::CheckDevBranch,
        Step::CheckDevClean,
        Step::SyncDev,
        Step::CheckProdBranch,
        Step::CheckProdClean,
        Step::SyncProd,
        Step::Merge,
        Step::Push,
    ];

    /// The step that runs after this one, or `None` after the push.
    pub fn next(self) -> Option<Step> {
        let position = Step::ALL.iter().position(|step| *step == self)?;
        Step::ALL.get(position + 1).copied()
    }

    /// The working copy this step operates on.
    pub fn location(self) -> Location {
        match self {
            Step::CheckDevBranch | Step::CheckDevClean | Step::SyncDev => Location::Dev,
            _ => Location::Prod,
        }
    }

    /// Returns true if the step talks to the remote.
    pub fn is_network(self) -> bool {
        matches!(self, Step::SyncDev | Step::SyncProd | Step::Push)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CheckDevBranch => "check-dev-branch",
            Step::CheckDevClean => "check-dev-clean",
            Step::SyncDev => "sync-dev",
            Step::CheckProdBranch => "check-prod-branch",
            Step::CheckProdClean => "check-prod-clean",
            Step::SyncProd => "sync-prod",
            Step::Merge => "merge",
            Step::Push => "push",
        };
        write!(f, "{}", name)
    }
}

/// A working copy together with the branch it must have checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    pub location: Location,
    pub path: PathBuf,
    pub branch: String,
}

/// Summary of a successful promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionReport {
    /// Steps that ran, in order.
    pub completed: Vec<Step>,
    /// What the merge step did.
    pub merge: MergeOutcome,
}

impl PromotionReport {
    /// Returns true if a new merge commit was created and pushed.
    pub fn created_merge_commit(&self) -> bool {
        matches!(self.merge, MergeOutcome::Merged { .. })
    }
}

/// Runs the promotion pipeline against a [`VersionControl`] backend.
pub struct Promoter<V: VersionControl> {
    vcs: V,
    dev: WorkingCopy,
    prod: WorkingCopy,
    remote: String,
}

impl<V: VersionControl> Promoter<V> {
    /// Creates a promoter for the working copies named in `config`.
    pub fn new(vcs: V, config: &PromoteConfig) -> Self {
        Self {
            vcs,
            dev: WorkingCopy {
                location: Location::Dev,
                path: config.dev_path.clone(),
                branch: config.dev_branch.clone(),
            },
            prod: WorkingCopy {
                location: Location::Prod,
                path: config.prod_path.clone(),
                branch: config.prod_branch.clone(),
            },
            remote: config.remote.clone(),
        }
    }

    /// Returns the version-control backend.
    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Returns the working copy at `location`.
    pub fn copy(&self, location: Location) -> &WorkingCopy {
        match location {
            Location::Dev => &self.dev,
            Location::Prod => &self.prod,
        }
    }

    /// The remote-tracking reference merged into production.
    pub fn merge_reference(&self) -> String {
        format!("{}/{}", self.remote, self.dev.branch)
    }

    /// Runs every step in order, stopping at the first failure.
    pub async fn promote(&self) -> std::result::Result<PromotionReport, PromoteError> {
        let mut report = PromotionReport {
            completed: Vec::with_capacity(Step::ALL.len()),
            merge: MergeOutcome::AlreadyUpToDate,
        };

        let mut next = Some(Step::CheckDevBranch);
        while let Some(step) = next {
            tracing::debug!(step = %step, location = %step.location(), "running step");

            if let Err(kind) = self.run_step(step, &mut report).await {
                tracing::warn!(step = %step, error = %kind, "promotion aborted");
                return Err(PromoteError::new(step, kind));
            }

            report.completed.push(step);
            next = step.next();
        }

        tracing::info!(
            dev_branch = %self.dev.branch,
            prod_branch = %self.prod.branch,
            merge = ?report.merge,
            "promotion complete"
        );
        Ok(report)
    }

    async fn run_step(
        &self,
        step: Step,
        report: &mut PromotionReport,
    ) -> std::result::Result<(), FailureKind> {
        let copy = self.copy(step.location());
        match step {
            Step::CheckDevBranch | Step::CheckProdBranch => self.check_branch(copy).await,
            Step::CheckDevClean | Step::CheckProdClean => self.check_clean(copy).await,
            Step::SyncDev | Step::SyncProd => self.sync(copy).await,
            Step::Merge => {
                report.merge = self.merge().await?;
                Ok(())
            }
            Step::Push => self.push().await,
        }
    }

    /// Fails unless `copy` has its expected branch checked out.
    pub async fn check_branch(&self, copy: &WorkingCopy) -> std::result::Result<(), FailureKind> {
        let actual = self
            .vcs
            .current_branch(&copy.path)
            .await
            .map_err(|e| FailureKind::query(copy.location, "branch query", e))?;

        if actual != copy.branch {
            return Err(FailureKind::WrongBranch {
                location: copy.location,
                expected: copy.branch.clone(),
                actual,
            });
        }

        tracing::info!(location = %copy.location, branch = %actual, "branch verified");
        Ok(())
    }

    /// Fails if `copy` has unstaged or staged changes to tracked files.
    pub async fn check_clean(&self, copy: &WorkingCopy) -> std::result::Result<(), FailureKind> {
        let dirty = self
            .vcs
            .has_uncommitted_changes(&copy.path)
            .await
            .map_err(|e| FailureKind::query(copy.location, "status query", e))?;

        if dirty {
            return Err(FailureKind::DirtyWorkingCopy {
                location: copy.location,
            });
        }

        tracing::info!(location = %copy.location, "working copy is clean");
        Ok(())
    }

    /// Fetches, then fast-forwards `copy`'s branch to its remote counterpart.
    pub async fn sync(&self, copy: &WorkingCopy) -> std::result::Result<(), FailureKind> {
        let sync_failed = |e: VcsError| FailureKind::SyncFailed {
            location: copy.location,
            cause: e.to_string(),
        };

        self.vcs
            .fetch(&copy.path, &self.remote)
            .await
            .map_err(sync_failed)?;
        self.vcs
            .pull_fast_forward_only(&copy.path, &self.remote, &copy.branch)
            .await
            .map_err(sync_failed)?;

        tracing::info!(
            location = %copy.location,
            remote = %self.remote,
            branch = %copy.branch,
            "working copy synced"
        );
        Ok(())
    }

    /// Merges the fetched development branch into production with a merge commit.
    ///
    /// On conflict the production copy is left mid-merge for manual resolution.
    pub async fn merge(&self) -> std::result::Result<MergeOutcome, FailureKind> {
        let reference = self.merge_reference();
        let outcome = self
            .vcs
            .merge_no_fast_forward(&self.prod.path, &reference)
            .await
            .map_err(|e| match e {
                VcsError::Merge {
                    message,
                    conflicted_files,
                    ..
                } => FailureKind::MergeConflict {
                    location: Location::Prod,
                    details: conflict_details(&message, &conflicted_files),
                },
                other => FailureKind::query(Location::Prod, "merge", other),
            })?;

        match &outcome {
            MergeOutcome::Merged { commit } => {
                tracing::info!(reference = %reference, commit = %commit, "created merge commit")
            }
            MergeOutcome::AlreadyUpToDate => {
                tracing::info!(reference = %reference, "production already contains development")
            }
        }
        Ok(outcome)
    }

    /// Publishes the production branch.
    pub async fn push(&self) -> std::result::Result<(), FailureKind> {
        self.vcs
            .push(&self.prod.path, &self.remote, &self.prod.branch)
            .await
            .map_err(|e| match e {
                VcsError::Push { message, .. } => FailureKind::PushRejected {
                    location: Location::Prod,
                    cause: message,
                },
                other => FailureKind::query(Location::Prod, "push", other),
            })?;

        tracing::info!(remote = %self.remote, branch = %self.prod.branch, "pushed production branch");
        Ok(())
    }
}

fn conflict_details(message: &str, files: &[PathBuf]) -> String {
    if files.is_empty() {
        return message.to_string();
    }
    let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    format!("{} (unmerged: {})", message, names.join(", "))
}

/// Validates `config` and promotes development into production.
pub async fn promote<V: VersionControl>(vcs: V, config: &PromoteConfig) -> Result<PromotionReport> {
    for warning in config.validate().into_result()? {
        tracing::warn!(warning = %warning, "configuration warning");
    }

    let promoter = Promoter::new(vcs, config);
    Ok(promoter.promote().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::vcs::{CopyState, InMemoryVcs, VcsCall};

    const DEV: &str = "/work/dev";
    const PROD: &str = "/work/prod";

    fn config() -> PromoteConfig {
        PromoteConfig::new(DEV, PROD)
    }

    fn ready_vcs() -> InMemoryVcs {
        InMemoryVcs::new()
            .with_copy(DEV, CopyState::on_branch("develop"))
            .with_copy(PROD, CopyState::on_branch("main"))
    }

    fn promoter(vcs: InMemoryVcs) -> Promoter<InMemoryVcs> {
        Promoter::new(vcs, &config())
    }

    #[test]
    fn steps_form_a_linear_chain() {
        let mut step = Step::CheckDevBranch;
        let mut visited = vec![step];
        while let Some(next) = step.next() {
            visited.push(next);
            step = next;
        }
        assert_eq!(visited, Step::ALL.to_vec());
    }

    #[test]
    fn step_locations_split_at_prod_branch_check() {
        assert_eq!(Step::SyncDev.location(), Location::Dev);
        assert_eq!(Step::CheckProdBranch.location(), Location::Prod);
        assert_eq!(Step::Push.location(), Location::Prod);
    }

    #[test]
    fn only_sync_and_push_reach_the_remote() {
        let network: Vec<Step> = Step::ALL.into_iter().filter(|s| s.is_network()).collect();
        assert_eq!(network, vec![Step::SyncDev, Step::SyncProd, Step::Push]);
    }

    #[test]
    fn last_step_has_no_successor() {
        assert_eq!(Step::Merge.next(), Some(Step::Push));
        assert_eq!(Step::Push.next(), None);
    }

    #[test]
    fn merge_reference_uses_remote_and_dev_branch() {
        let config = config().with_remote("upstream").with_branches("next", "stable");
        let promoter = Promoter::new(InMemoryVcs::new(), &config);
        assert_eq!(promoter.merge_reference(), "upstream/next");
    }

    #[tokio::test]
    async fn successful_promotion_runs_every_step() {
        let promoter = promoter(ready_vcs());

        let report = promoter.promote().await.expect("promotion should succeed");

        assert_eq!(report.completed, Step::ALL.to_vec());
        assert!(report.created_merge_commit());

        let prod = promoter.vcs().copy(PROD.as_ref()).unwrap();
        assert_eq!(prod.merge_commits.len(), 1);
        assert_eq!(prod.pushes, 1);
    }

    #[tokio::test]
    async fn successful_promotion_issues_calls_in_order() {
        let promoter = promoter(ready_vcs());
        promoter.promote().await.unwrap();

        let dev = PathBuf::from(DEV);
        let prod = PathBuf::from(PROD);
        assert_eq!(
            promoter.vcs().calls(),
            vec![
                VcsCall::CurrentBranch(dev.clone()),
                VcsCall::HasUncommittedChanges(dev.clone()),
                VcsCall::Fetch {
                    path: dev.clone(),
                    remote: "origin".to_string()
                },
                VcsCall::Pull {
                    path: dev,
                    remote: "origin".to_string(),
                    branch: "develop".to_string()
                },
                VcsCall::CurrentBranch(prod.clone()),
                VcsCall::HasUncommittedChanges(prod.clone()),
                VcsCall::Fetch {
                    path: prod.clone(),
                    remote: "origin".to_string()
                },
                VcsCall::Pull {
                    path: prod.clone(),
                    remote: "origin".to_string(),
                    branch: "main".to_string()
                },
                VcsCall::Merge {
                    path: prod.clone(),
                    reference: "origin/develop".to_string()
                },
                VcsCall::Push {
                    path: prod,
                    remote: "origin".to_string(),
                    branch: "main".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn wrong_dev_branch_aborts_without_network_calls() {
        let vcs = ready_vcs();
        vcs.update(DEV.as_ref(), |s| s.branch = "feature/login".to_string());
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::CheckDevBranch);
        match err.kind {
            FailureKind::WrongBranch {
                location,
                expected,
                actual,
            } => {
                assert_eq!(location, Location::Dev);
                assert_eq!(expected, "develop");
                assert_eq!(actual, "feature/login");
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert!(promoter.vcs().network_calls().is_empty());
    }

    #[tokio::test]
    async fn dirty_dev_aborts_before_fetch() {
        let vcs = InMemoryVcs::new()
            .with_copy(DEV, CopyState::on_branch("develop").dirty())
            .with_copy(PROD, CopyState::on_branch("main"));
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::CheckDevClean);
        assert!(matches!(
            err.kind,
            FailureKind::DirtyWorkingCopy {
                location: Location::Dev
            }
        ));
        assert!(promoter.vcs().network_calls().is_empty());
    }

    #[tokio::test]
    async fn dev_sync_failure_is_fatal() {
        let vcs = ready_vcs();
        vcs.update(DEV.as_ref(), |s| {
            s.pull_error = Some("Not possible to fast-forward, aborting.".to_string())
        });
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::SyncDev);
        match &err.kind {
            FailureKind::SyncFailed { location, cause } => {
                assert_eq!(*location, Location::Dev);
                assert!(cause.contains("fast-forward"));
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert!(promoter
            .vcs()
            .calls()
            .iter()
            .all(|call| call.path() == std::path::Path::new(DEV)));
    }

    #[tokio::test]
    async fn fetch_failure_skips_pull() {
        let vcs = ready_vcs();
        vcs.update(DEV.as_ref(), |s| {
            s.fetch_error = Some("Could not resolve host".to_string())
        });
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::SyncDev);
        assert!(!promoter
            .vcs()
            .calls()
            .iter()
            .any(|call| matches!(call, VcsCall::Pull { .. })));
    }

    #[tokio::test]
    async fn wrong_prod_branch_aborts_after_dev_sync() {
        let vcs = ready_vcs();
        vcs.update(PROD.as_ref(), |s| s.branch = "develop".to_string());
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::CheckProdBranch);
        assert_eq!(err.kind.location(), Location::Prod);
        assert!(matches!(err.kind, FailureKind::WrongBranch { .. }));

        let calls = promoter.vcs().calls();
        assert!(calls.contains(&VcsCall::Pull {
            path: PathBuf::from(DEV),
            remote: "origin".to_string(),
            branch: "develop".to_string(),
        }));
        assert!(!calls.iter().any(|call| matches!(call, VcsCall::Merge { .. })));
    }

    #[tokio::test]
    async fn dirty_prod_aborts_before_prod_fetch() {
        let vcs = InMemoryVcs::new()
            .with_copy(DEV, CopyState::on_branch("develop"))
            .with_copy(PROD, CopyState::on_branch("main").dirty());
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::CheckProdClean);
        assert!(!promoter
            .vcs()
            .network_calls()
            .iter()
            .any(|call| call.path() == std::path::Path::new(PROD)));
    }

    #[tokio::test]
    async fn diverged_prod_fails_sync() {
        let vcs = ready_vcs();
        vcs.update(PROD.as_ref(), |s| {
            s.pull_error = Some("Not possible to fast-forward, aborting.".to_string())
        });
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::SyncProd);
        assert!(matches!(
            err.kind,
            FailureKind::SyncFailed {
                location: Location::Prod,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn merge_conflict_leaves_prod_unresolved_and_skips_push() {
        let vcs = ready_vcs();
        vcs.update(PROD.as_ref(), |s| {
            s.merge_conflicts = Some(vec![PathBuf::from("src/app.rs")])
        });
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::Merge);
        match &err.kind {
            FailureKind::MergeConflict { location, details } => {
                assert_eq!(*location, Location::Prod);
                assert!(details.contains("src/app.rs"));
            }
            other => panic!("unexpected failure: {:?}", other),
        }

        let prod = promoter.vcs().copy(PROD.as_ref()).unwrap();
        assert!(prod.dirty);
        assert_eq!(prod.pushes, 0);
    }

    #[tokio::test]
    async fn refused_merge_is_not_reported_as_conflict() {
        let vcs = ready_vcs();
        vcs.update(PROD.as_ref(), |s| {
            s.merge_error = Some("untracked working tree files would be overwritten".to_string())
        });
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::Merge);
        match &err.kind {
            FailureKind::Vcs {
                location,
                operation,
                message,
            } => {
                assert_eq!(*location, Location::Prod);
                assert_eq!(*operation, "merge");
                assert!(message.contains("untracked"));
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        let prod = promoter.vcs().copy(PROD.as_ref()).unwrap();
        assert!(!prod.dirty);
        assert_eq!(prod.pushes, 0);
    }

    #[tokio::test]
    async fn rejected_push_keeps_local_merge() {
        let vcs = ready_vcs();
        vcs.update(PROD.as_ref(), |s| {
            s.push_error = Some("! [rejected] main -> main (fetch first)".to_string())
        });
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::Push);
        assert!(matches!(
            err.kind,
            FailureKind::PushRejected {
                location: Location::Prod,
                ..
            }
        ));
        let prod = promoter.vcs().copy(PROD.as_ref()).unwrap();
        assert_eq!(prod.merge_commits.len(), 1);
    }

    #[tokio::test]
    async fn rerun_after_success_creates_no_second_merge_commit() {
        let promoter = promoter(ready_vcs());

        let first = promoter.promote().await.unwrap();
        let second = promoter.promote().await.unwrap();

        assert!(first.created_merge_commit());
        assert!(!second.created_merge_commit());
        assert_eq!(second.merge, MergeOutcome::AlreadyUpToDate);
        assert_eq!(second.completed, Step::ALL.to_vec());

        let prod = promoter.vcs().copy(PROD.as_ref()).unwrap();
        assert_eq!(prod.merge_commits.len(), 1);
        assert_eq!(prod.pushes, 2);
    }

    #[tokio::test]
    async fn missing_working_copy_reports_query_failure() {
        let vcs = InMemoryVcs::new().with_copy(PROD, CopyState::on_branch("main"));
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(err.step, Step::CheckDevBranch);
        assert!(matches!(
            err.kind,
            FailureKind::Vcs {
                location: Location::Dev,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn error_message_names_step_and_location() {
        let vcs = ready_vcs();
        vcs.update(PROD.as_ref(), |s| s.dirty = true);
        let promoter = promoter(vcs);

        let err = promoter.promote().await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "promotion aborted at check-prod-clean: production working copy has uncommitted changes"
        );
    }

    #[tokio::test]
    async fn promote_rejects_invalid_config_before_touching_copies() {
        let vcs = ready_vcs();
        let config = PromoteConfig::new(DEV, DEV);

        let err = promote(vcs, &config).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn promote_wraps_pipeline_failures() {
        let vcs = ready_vcs();
        vcs.update(DEV.as_ref(), |s| s.branch = "main".to_string());

        let err = promote(vcs, &config()).await.unwrap_err();
        match err {
            Error::Promote(e) => assert_eq!(e.step, Step::CheckDevBranch),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
