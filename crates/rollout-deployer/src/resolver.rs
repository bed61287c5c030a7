//! Release resolution from label selectors.

use rollout_core::platform::{Application, ReleasePlatform};
use rollout_core::{ImageDefinition, Release, ReleaseRequest, ReleaseSet, Result};
use tracing::{debug, info};

/// Map a matched application to a release using the request's label getters.
pub fn to_release(request: &ReleaseRequest, app: &Application) -> Release {
    let image = app
        .images
        .first()
        .and_then(|i| i.parse::<ImageDefinition>().ok())
        .unwrap_or_default();

    Release {
        id: app.name.clone(),
        name: request.release_from(&app.labels),
        cluster: request.cluster_from(&app.labels),
        environment: request.environment_from(&app.labels),
        image,
        git_url: app.source.repo_url.clone(),
        git_path: app.source.path.clone(),
        git_revision: app.source.target_revision.clone(),
    }
}

/// Query the platform and build a validated release set.
///
/// Fails with `NoReleasesFound` on an empty match and `InconsistentSource`
/// when the matches do not share one repository and revision.
pub async fn resolve(platform: &dyn ReleasePlatform, request: &ReleaseRequest) -> Result<ReleaseSet> {
    let selector = request.selector();
    let apps = platform.list_applications(selector).await?;
    debug!(selector = %selector, matched = apps.len(), "selector query answered");

    let releases = apps.iter().map(|app| to_release(request, app)).collect();
    let set = ReleaseSet::new(selector, releases)?;

    info!(
        selector = %selector,
        releases = ?set.ids(),
        git_url = %set.git_url(),
        git_revision = %set.git_revision(),
        "releases resolved"
    );

    Ok(set)
}
