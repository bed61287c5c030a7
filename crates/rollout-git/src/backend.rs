//! Git backend trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rollout_core::Result;

/// Name and email recorded on a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::new("rollout-bot", "rollout-bot@localhost")
    }
}

/// The git operations a rollout performs on its working copy.
///
/// Failures are reported with the rollout error taxonomy: `PullFailed` for
/// a failed pull, `NonFastForward`/`PushRejected`/`PushFailed` for a failed
/// push and `Git` for everything else.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Whether `dir` already holds a repository.
    async fn is_repository(&self, dir: &Path) -> bool;

    /// Clone `url` into `dest`, restricted to `reference` when one is given.
    async fn clone_repo(&self, url: &str, dest: &Path, reference: Option<&str>) -> Result<()>;

    /// Point `remote` at `url`.
    async fn set_remote_url(&self, workdir: &Path, remote: &str, url: &str) -> Result<()>;

    /// Set a repository-local configuration value.
    async fn set_config(&self, workdir: &Path, key: &str, value: &str) -> Result<()>;

    /// Names of the local branches.
    async fn local_branches(&self, workdir: &Path) -> Result<Vec<String>>;

    /// Name of the checked out branch.
    async fn current_branch(&self, workdir: &Path) -> Result<String>;

    /// Whether the working tree has no changes, untracked files included.
    async fn is_clean(&self, workdir: &Path) -> Result<bool>;

    /// Stage `paths` (relative to `workdir`), deletions included.
    async fn add(&self, workdir: &Path, paths: &[PathBuf]) -> Result<()>;

    /// Commit the staged changes.
    async fn commit(&self, workdir: &Path, message: &str, author: &Signature) -> Result<()>;

    /// Forced pull of `branch` from `remote` with rebase semantics.
    async fn pull_rebase(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()>;

    /// Push `branch` to `remote`.
    async fn push(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()>;
}
