//! Rollout orchestrator - runs one invocation end to end.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use rollout_config::RolloutConfig;
use rollout_core::platform::ReleasePlatform;
use rollout_core::renderer::{KustomizeParams, RenderOptions, RenderParams, Renderer};
use rollout_core::{
    ExecContext, GitCredential, ImageDefinition, Release, ReleaseRequest, ReleaseSet, RequestId,
    Result,
};
use rollout_deployer::{ManagerOptions, ReleaseManager, WatchOptions};
use rollout_git::{CloneOptions, CommitOptions, GitBackend, PushOptions, Repository, Signature};
use rollout_renderer::RESTARTED_AT_ANNOTATION;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// What to roll out.
#[derive(Debug, Clone)]
pub struct RolloutRequest {
    /// Selector matching the releases to update.
    pub releases: ReleaseRequest,
    pub image: ImageDefinition,
    /// Stamp a restart annotation so unchanged images roll too.
    pub restart: bool,
}

/// Event emitted while a rollout runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutEvent {
    Resolved { releases: Vec<String> },
    Rendered { release: String },
    Committed { created: bool },
    Pushed,
    SyncStarted { releases: usize },
    Completed { success: bool },
}

/// Outcome of a successful rollout.
#[derive(Debug)]
pub struct RolloutReport {
    pub request_id: RequestId,
    pub releases: Vec<Release>,
    /// False when the manifests already matched and nothing was committed.
    pub committed: bool,
}

/// Composes resolution, rendering, the manifest commit and the release sync.
#[derive(Clone)]
pub struct RolloutOrchestrator {
    platform: Arc<dyn ReleasePlatform>,
    git: Arc<dyn GitBackend>,
    renderer: Arc<dyn Renderer>,
    config: RolloutConfig,
    credential: GitCredential,
}

impl RolloutOrchestrator {
    pub fn new(
        platform: Arc<dyn ReleasePlatform>,
        git: Arc<dyn GitBackend>,
        renderer: Arc<dyn Renderer>,
        config: RolloutConfig,
    ) -> Self {
        Self {
            platform,
            git,
            renderer,
            config,
            credential: GitCredential::default(),
        }
    }

    /// Credential embedded into the manifest remote after cloning.
    pub fn with_credential(mut self, credential: GitCredential) -> Self {
        self.credential = credential;
        self
    }

    /// Options handed to the release manager, derived from the configuration.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            sync_retry: self.config.sync_retry(),
            watch: WatchOptions {
                timeout: self.config.timeouts.watch,
                max_retry_unknown: self.config.retry.max_unknown,
            },
            max_concurrency: self.config.concurrency,
        }
    }

    /// Start a rollout, returning a channel of events and a handle to get the final result.
    ///
    /// Cancelling `cancel` stops the rollout at the next suspension point.
    /// The scratch working copy is removed on every exit path.
    pub fn execute(
        &self,
        request: RolloutRequest,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<RolloutEvent>,
        tokio::task::JoinHandle<Result<RolloutReport>>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let request_id = RequestId::new();
            let span = info_span!("rollout", request_id = %request_id);

            let result = this
                .execute_inner(request_id, request, cancel, &tx)
                .instrument(span)
                .await;

            let _ = tx
                .send(RolloutEvent::Completed {
                    success: result.is_ok(),
                })
                .await;
            result
        });

        (rx, handle)
    }

    /// Internal execution logic
    async fn execute_inner(
        &self,
        request_id: RequestId,
        request: RolloutRequest,
        cancel: CancellationToken,
        tx: &mpsc::Sender<RolloutEvent>,
    ) -> Result<RolloutReport> {
        let ctx = ExecContext::with_cancel(self.config.timeouts.invocation, cancel);
        let manager = ReleaseManager::new(self.platform.clone(), self.manager_options());

        let releases = ctx
            .guard("resolving releases", manager.list_releases(&request.releases))
            .await?;
        let _ = tx
            .send(RolloutEvent::Resolved {
                releases: releases.ids().into_iter().map(String::from).collect(),
            })
            .await;

        let workspace = tempfile::Builder::new().prefix("rollout-").tempdir()?;
        let dest = workspace.path().join("manifests");

        let clone = CloneOptions::new(releases.git_url(), releases.git_revision());
        let repo = ctx
            .guard(
                "cloning manifest repository",
                Repository::clone(self.git.clone(), &dest, &clone),
            )
            .await?;
        ctx.guard(
            "configuring manifest remote",
            repo.authenticate(releases.git_url(), &self.credential),
        )
        .await?;

        let options = self.render_options(request.restart);
        for release in &releases {
            ctx.guard(
                "rendering manifests",
                self.render(&repo, release, &request.image, &options),
            )
            .await?;
            let _ = tx
                .send(RolloutEvent::Rendered {
                    release: release.id.clone(),
                })
                .await;
        }

        let commit = CommitOptions {
            paths: changed_paths(&releases),
            message: format!("rollout({}): update deployment manifest", request_id),
            author: Signature::new(&self.config.committer.name, &self.config.committer.email),
        };
        let committed = ctx
            .guard("committing manifest changes", repo.commit(&commit))
            .await?;
        let _ = tx.send(RolloutEvent::Committed { created: committed }).await;

        if committed {
            let push = PushOptions {
                retry: self.config.push_retry(),
            };
            repo.push(&ctx, &push).await?;
            let _ = tx.send(RolloutEvent::Pushed).await;
        } else {
            warn!("manifests unchanged, syncing without a new commit");
        }

        let _ = tx
            .send(RolloutEvent::SyncStarted {
                releases: releases.len(),
            })
            .await;

        if let Err(e) = manager.sync_releases(&ctx, &releases).await {
            error!(error = %e, "rollout failed");
            return Err(e);
        }

        info!(releases = releases.len(), committed, "rollout complete");

        Ok(RolloutReport {
            request_id,
            releases: releases.into_iter().collect(),
            committed,
        })
    }

    async fn render(
        &self,
        repo: &Repository,
        release: &Release,
        image: &ImageDefinition,
        options: &RenderOptions,
    ) -> Result<()> {
        let params = RenderParams::Kustomize(KustomizeParams {
            kustomization_ref: self.config.kustomize.file_ref.clone(),
            image_reference_name: self.config.kustomize.image_ref.clone(),
            image_name: image.name.clone(),
            image_tag: image.tag.clone(),
        });

        let workdir = repo.root().join(&release.git_path);
        let name = if release.name.is_empty() {
            &release.id
        } else {
            &release.name
        };

        self.renderer
            .render(&workdir, name, &params, options)
            .await
    }

    fn render_options(&self, restart: bool) -> RenderOptions {
        let mut annotations = BTreeMap::new();
        if restart {
            annotations.insert(
                RESTARTED_AT_ANNOTATION.to_string(),
                chrono::Utc::now().to_rfc3339(),
            );
        }
        RenderOptions {
            annotations,
            namespace: None,
        }
    }
}

/// Paths to stage. A release rooted at the repository top stages everything.
fn changed_paths(releases: &ReleaseSet) -> Vec<PathBuf> {
    if releases
        .iter()
        .any(|r| r.git_path.is_empty() || r.git_path == ".")
    {
        return Vec::new();
    }
    let mut paths: Vec<PathBuf> = releases.iter().map(|r| PathBuf::from(&r.git_path)).collect();
    paths.sort();
    paths.dedup();
    paths
}
