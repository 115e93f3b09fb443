//! Branch Promoter - promote a development branch into production
//!
//! This library checks two working copies of the same repository (one on
//! the development branch, one on the production branch), brings both up to
//! date with the shared remote, merges development into production with an
//! explicit merge commit, and pushes the result. Any failed check stops the
//! run immediately.

pub mod config;
pub mod error;
pub mod vcs;
pub mod workflow;

pub use config::{ConfigIssue, PromoteConfig, ValidationResult};
pub use error::{Error, FailureKind, PromoteError, Result};
pub use vcs::{GitCli, InMemoryVcs, MergeOutcome, VcsError, VersionControl};
pub use workflow::{promote, Location, PromotionReport, Promoter, Step, WorkingCopy};
