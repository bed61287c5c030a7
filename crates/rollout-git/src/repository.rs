//! The working copy of a manifest repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rollout_core::retry::{self, RetryOptions};
use rollout_core::{Error, ExecContext, GitCredential, Result};
use tracing::{debug, info, instrument};

use crate::backend::{GitBackend, Signature};

/// Remote every rollout pulls from and pushes to.
pub const REMOTE: &str = "origin";

/// Where to clone from.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub url: String,
    /// Branch or tag to restrict the clone to. `None` follows the remote HEAD.
    pub reference: Option<String>,
}

impl CloneOptions {
    pub fn new(url: impl Into<String>, reference: &str) -> Self {
        // Platforms report a floating revision as HEAD or leave it empty
        let reference = match reference {
            "" | "HEAD" => None,
            r => Some(r.to_string()),
        };
        Self {
            url: url.into(),
            reference,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitOptions {
    /// Paths to stage, relative to the root. Empty stages everything.
    pub paths: Vec<PathBuf>,
    pub message: String,
    pub author: Signature,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            message: "rollout: update deployment manifest".to_string(),
            author: Signature::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PushOptions {
    pub retry: RetryOptions,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            retry: RetryOptions::new(
                std::time::Duration::from_secs(1),
                std::time::Duration::from_secs(15),
            ),
        }
    }
}

/// Errors the push loop retries: a conflict or a transient pull/push failure.
fn is_retriable_push_error(err: &Error) -> bool {
    matches!(
        err,
        Error::NonFastForward(_) | Error::PullFailed(_) | Error::PushFailed(_)
    )
}

/// A local working copy bound to one invocation.
pub struct Repository {
    backend: Arc<dyn GitBackend>,
    root: PathBuf,
    branch: String,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("branch", &self.branch)
            .finish()
    }
}

impl Repository {
    /// Clone `options.url` into `dest`, or reopen `dest` if it already holds
    /// a repository.
    ///
    /// Pulls are then configured to rebase on every local branch.
    #[instrument(skip(backend, dest, options), fields(dest = %dest.display()))]
    pub async fn clone(
        backend: Arc<dyn GitBackend>,
        dest: &Path,
        options: &CloneOptions,
    ) -> Result<Self> {
        if backend.is_repository(dest).await {
            info!("reopening existing working copy");
        } else {
            info!(reference = ?options.reference, "cloning manifest repository");
            backend
                .clone_repo(&options.url, dest, options.reference.as_deref())
                .await?;
        }

        let branch = backend.current_branch(dest).await?;

        backend.set_config(dest, "pull.rebase", "true").await?;
        for local in backend.local_branches(dest).await? {
            backend
                .set_config(dest, &format!("branch.{}.rebase", local), "true")
                .await?;
        }

        debug!(branch = %branch, "working copy ready");

        Ok(Self {
            backend,
            root: dest.to_path_buf(),
            branch,
        })
    }

    /// Embed `credential` into the `origin` URL.
    pub async fn authenticate(&self, url: &str, credential: &GitCredential) -> Result<()> {
        if credential.is_empty() {
            return Ok(());
        }
        self.backend
            .set_remote_url(&self.root, REMOTE, &credential.apply_to_url(url))
            .await
    }

    /// Path of the working copy.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Branch the working copy tracks.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Stage and commit. A clean working tree is not an error: nothing is
    /// committed and `false` is returned.
    #[instrument(skip(self, options), fields(root = %self.root.display()))]
    pub async fn commit(&self, options: &CommitOptions) -> Result<bool> {
        if self.backend.is_clean(&self.root).await? {
            info!("working tree clean, nothing to commit");
            return Ok(false);
        }

        self.backend.add(&self.root, &options.paths).await?;
        self.backend
            .commit(&self.root, &options.message, &options.author)
            .await?;

        info!(message = %options.message, "committed manifest changes");
        Ok(true)
    }

    /// Push the branch, pulling with rebase before every attempt.
    ///
    /// Conflicts and transient pull or push failures are retried until the
    /// retry budget runs out, which yields `Error::PushTimeout` carrying the
    /// last failure. Anything else fails immediately.
    #[instrument(skip(self, ctx, options), fields(branch = %self.branch))]
    pub async fn push(&self, ctx: &ExecContext, options: &PushOptions) -> Result<()> {
        let repo = self;

        retry::on_error(ctx, options.retry, is_retriable_push_error, move || async move {
            repo.backend
                .pull_rebase(&repo.root, REMOTE, &repo.branch)
                .await?;
            repo.backend.push(&repo.root, REMOTE, &repo.branch).await
        })
        .await
        .map_err(|e| e.into_error(|last| Error::PushTimeout { last: Box::new(last) }))?;

        info!("pushed manifest changes");
        Ok(())
    }
}
