//! `git` command-line backend.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use rollout_core::{Error, GitCredential, Result};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::{GitBackend, Signature};

/// Runs the `git` binary found on `PATH`.
///
/// Every stderr surfaced in an error has the credential password redacted,
/// since the remote URL embeds it.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    credential: GitCredential,
    committer: Signature,
}

impl GitCli {
    pub fn new(credential: GitCredential) -> Self {
        Self {
            credential,
            committer: Signature::default(),
        }
    }

    /// Identity used for commits created while rebasing.
    pub fn with_committer(mut self, committer: Signature) -> Self {
        self.committer = committer;
        self
    }

    fn command(&self, workdir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_COMMITTER_NAME", &self.committer.name)
            .env("GIT_COMMITTER_EMAIL", &self.committer.email)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn output(&self, mut cmd: Command) -> Result<Output> {
        let output = cmd.output().await?;
        Ok(output)
    }

    fn stderr(&self, output: &Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr);
        self.credential.redact(stderr.trim())
    }

    /// Run a command, mapping a non-zero exit to `Error::Git`.
    async fn run<I, S>(&self, workdir: Option<&Path>, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(workdir);
        cmd.args(args);
        let output = self.output(cmd).await?;

        if !output.status.success() {
            return Err(Error::Git(self.stderr(&output)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Classify a failed push from git's stderr.
pub fn classify_push_error(stderr: &str) -> Error {
    let lower = stderr.to_lowercase();

    if lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || lower.contains("[rejected]")
    {
        return Error::NonFastForward(stderr.to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("403")
        || lower.contains("[remote rejected]")
        || lower.contains("protected branch")
    {
        return Error::PushRejected(stderr.to_string());
    }

    Error::PushFailed(stderr.to_string())
}

#[async_trait]
impl GitBackend for GitCli {
    async fn is_repository(&self, dir: &Path) -> bool {
        if !dir.join(".git").exists() {
            return false;
        }
        self.run(Some(dir), ["rev-parse", "--git-dir"]).await.is_ok()
    }

    async fn clone_repo(&self, url: &str, dest: &Path, reference: Option<&str>) -> Result<()> {
        let auth_url = self.credential.apply_to_url(url);

        let mut cmd = self.command(None);
        cmd.arg("clone");
        if let Some(reference) = reference {
            cmd.args(["--branch", reference, "--single-branch"]);
        }
        cmd.arg(&auth_url).arg(dest);

        let output = self.output(cmd).await?;
        if !output.status.success() {
            // Don't log stderr, it may echo the remote URL
            warn!("git clone failed");
            return Err(Error::Git(self.stderr(&output)));
        }

        Ok(())
    }

    async fn set_remote_url(&self, workdir: &Path, remote: &str, url: &str) -> Result<()> {
        self.run(Some(workdir), ["remote", "set-url", remote, url])
            .await
            .map(|_| ())
    }

    async fn set_config(&self, workdir: &Path, key: &str, value: &str) -> Result<()> {
        self.run(Some(workdir), ["config", key, value]).await.map(|_| ())
    }

    async fn local_branches(&self, workdir: &Path) -> Result<Vec<String>> {
        let out = self
            .run(
                Some(workdir),
                ["for-each-ref", "--format=%(refname:short)", "refs/heads/"],
            )
            .await?;

        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn current_branch(&self, workdir: &Path) -> Result<String> {
        let branch = self
            .run(Some(workdir), ["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;

        if branch.is_empty() || branch == "HEAD" {
            return Err(Error::Git(
                "working copy is not on a branch (detached HEAD)".to_string(),
            ));
        }

        Ok(branch)
    }

    async fn is_clean(&self, workdir: &Path) -> Result<bool> {
        let status = self.run(Some(workdir), ["status", "--porcelain"]).await?;
        Ok(status.is_empty())
    }

    async fn add(&self, workdir: &Path, paths: &[PathBuf]) -> Result<()> {
        let mut cmd = self.command(Some(workdir));
        cmd.args(["add", "--all", "--"]);
        if paths.is_empty() {
            cmd.arg(".");
        } else {
            cmd.args(paths);
        }

        let output = self.output(cmd).await?;
        if !output.status.success() {
            return Err(Error::Git(self.stderr(&output)));
        }

        Ok(())
    }

    async fn commit(&self, workdir: &Path, message: &str, author: &Signature) -> Result<()> {
        let mut cmd = self.command(Some(workdir));
        cmd.env("GIT_AUTHOR_NAME", &author.name)
            .env("GIT_AUTHOR_EMAIL", &author.email)
            .env("GIT_COMMITTER_NAME", &author.name)
            .env("GIT_COMMITTER_EMAIL", &author.email)
            .args(["commit", "--no-verify", "-m", message]);

        let output = self.output(cmd).await?;
        if !output.status.success() {
            return Err(Error::Git(self.stderr(&output)));
        }

        Ok(())
    }

    async fn pull_rebase(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()> {
        let mut cmd = self.command(Some(workdir));
        cmd.args(["pull", "--rebase", "--force", remote, branch]);

        let output = self.output(cmd).await?;
        if !output.status.success() {
            let stderr = self.stderr(&output);

            // A failed rebase leaves the working copy mid-operation
            if let Err(e) = self.run(Some(workdir), ["rebase", "--abort"]).await {
                debug!(error = %e, "no rebase to abort");
            }

            return Err(Error::PullFailed(stderr));
        }

        Ok(())
    }

    async fn push(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let mut cmd = self.command(Some(workdir));
        cmd.args(["push", "--porcelain", remote, &refspec]);

        let output = self.output(cmd).await?;
        if !output.status.success() {
            // --porcelain reports ref status on stdout
            let stdout = self
                .credential
                .redact(String::from_utf8_lossy(&output.stdout).trim());
            let stderr = self.stderr(&output);
            let combined = format!("{}\n{}", stdout, stderr);
            return Err(classify_push_error(combined.trim()));
        }

        Ok(())
    }
}
