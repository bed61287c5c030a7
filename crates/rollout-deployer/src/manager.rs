//! Release manager: resolution, sync trigger and fail-fast fan-out.

use std::sync::Arc;
use std::time::Duration;

use rollout_core::platform::{ConvergenceEvent, ReleasePlatform};
use rollout_core::retry::{self, RetryOptions};
use rollout_core::{Error, ExecContext, Release, ReleaseRequest, ReleaseSet, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::resolver::{resolve, to_release};
use crate::watch::{SyncCondition, WatchOptions, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Retry budget for a busy platform refusing the sync trigger.
    pub sync_retry: RetryOptions,
    pub watch: WatchOptions,
    /// Releases synced at the same time.
    pub max_concurrency: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            sync_retry: RetryOptions::new(Duration::from_secs(1), Duration::from_secs(900)),
            watch: WatchOptions::default(),
            max_concurrency: 4,
        }
    }
}

/// Drives releases on one platform.
pub struct ReleaseManager {
    platform: Arc<dyn ReleasePlatform>,
    options: ManagerOptions,
}

impl ReleaseManager {
    pub fn new(platform: Arc<dyn ReleasePlatform>, options: ManagerOptions) -> Self {
        Self { platform, options }
    }

    /// Every release matching the request.
    pub async fn list_releases(&self, request: &ReleaseRequest) -> Result<ReleaseSet> {
        resolve(self.platform.as_ref(), request).await
    }

    /// One release by platform identifier.
    pub async fn get_release(&self, request: &ReleaseRequest, id: &str) -> Result<Release> {
        let app = self.platform.get_application(id, false).await?;
        Ok(to_release(request, &app))
    }

    /// Trigger a sync and wait for convergence.
    pub async fn sync_release(&self, ctx: &ExecContext, release: &Release) -> Result<()> {
        sync_one(self.platform.as_ref(), ctx, release, &self.options).await
    }

    /// Sync every release of the set, at most `max_concurrency` at a time.
    ///
    /// The first failure cancels every sibling and is returned as
    /// `Error::ReleaseFailed` naming the release.
    #[instrument(skip(self, ctx, releases), fields(releases = releases.len()))]
    pub async fn sync_releases(&self, ctx: &ExecContext, releases: &ReleaseSet) -> Result<()> {
        let group = ctx.child();
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for release in releases {
            let platform = self.platform.clone();
            let release = release.clone();
            let ctx = group.clone();
            let semaphore = semaphore.clone();
            let options = self.options;

            tasks.spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = ctx.cancellation().cancelled() => Err(Error::Cancelled),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => {
                            let _permit = permit; // Hold until complete
                            sync_one(platform.as_ref(), &ctx, &release, &options).await
                        }
                        Err(_) => Err(Error::Cancelled),
                    },
                };
                (release.id, result)
            });
        }

        let mut failure: Option<Error> = None;

        while let Some(joined) = tasks.join_next().await {
            let (id, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    group.cancel();
                    if failure.is_none() {
                        failure = Some(Error::Internal(format!("sync task failed: {}", e)));
                    }
                    continue;
                }
            };

            match result {
                Ok(()) => info!(release = %id, "release synced"),
                Err(err) if failure.is_none() => {
                    group.cancel();
                    failure = Some(match err {
                        // Only the caller cancels before any release failed
                        Error::Cancelled => Error::Cancelled,
                        err => {
                            error!(release = %id, error = %err, "release failed, cancelling the others");
                            Error::ReleaseFailed {
                                release: id,
                                source: Box::new(err),
                            }
                        }
                    });
                }
                Err(err) => debug!(release = %id, error = %err, "release stopped"),
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn is_platform_busy(err: &Error) -> bool {
    matches!(err, Error::AnotherSyncInProgress(_))
}

#[instrument(skip(platform, ctx, release, options), fields(release = %release.id))]
async fn sync_one(
    platform: &dyn ReleasePlatform,
    ctx: &ExecContext,
    release: &Release,
    options: &ManagerOptions,
) -> Result<()> {
    info!(revision = %release.git_revision, "triggering sync");

    retry::on_error(ctx, options.sync_retry, is_platform_busy, move || {
        platform.sync(&release.id, &release.git_revision)
    })
    .await
    .map_err(|e| {
        e.into_error(|last| Error::SyncTimeout {
            release: release.id.clone(),
            last: Box::new(last),
        })
    })?;

    let mut condition = SyncCondition::new();
    watch(
        platform,
        ctx,
        &release.id,
        &release.git_revision,
        &options.watch,
        |event: &ConvergenceEvent| condition.check(event),
    )
    .await
}
