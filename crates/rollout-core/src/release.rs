//! Release types for GitOps rollouts.
//!
//! A Release is one platform-managed deployment instance of an application
//! (an Argo CD Application, for example) in a specific cluster/environment.
//! Releases are rebuilt on every resolution and never mutated.

use serde::{Deserialize, Serialize};

use crate::image::ImageDefinition;
use crate::{Error, Result};

/// Release sync status as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Live state matches the target revision
    Synced,
    /// Live state differs from the target revision
    OutOfSync,
    /// Status could not be determined
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::OutOfSync => write!(f, "out_of_sync"),
            SyncStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Release health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    /// All resources are healthy
    Healthy,
    /// Some resources are progressing
    Progressing,
    /// Some resources are suspended
    Suspended,
    /// Some resources are missing
    Missing,
    /// Some resources are degraded
    Degraded,
    /// Unknown health status
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Progressing => write!(f, "progressing"),
            HealthStatus::Suspended => write!(f, "suspended"),
            HealthStatus::Missing => write!(f, "missing"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Phase of the platform operation (sync) currently attached to a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationPhase {
    Running,
    Terminating,
    Failed,
    Error,
    Succeeded,
}

impl OperationPhase {
    /// Whether the operation ended in failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, OperationPhase::Failed | OperationPhase::Error)
    }
}

impl std::fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationPhase::Running => write!(f, "running"),
            OperationPhase::Terminating => write!(f, "terminating"),
            OperationPhase::Failed => write!(f, "failed"),
            OperationPhase::Error => write!(f, "error"),
            OperationPhase::Succeeded => write!(f, "succeeded"),
        }
    }
}

/// A managed resource the platform failed to reconcile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    /// Kubernetes API group (e.g., "apps", "")
    pub group: String,
    /// Resource kind (e.g., "Deployment", "Service")
    pub kind: String,
    pub name: String,
    pub namespace: String,
    /// Platform-supplied message for this resource
    pub message: String,
}

/// One platform-managed deployment instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Platform identifier (the Application name)
    pub id: String,
    pub name: String,
    pub cluster: String,
    pub environment: String,
    /// Image currently reported by the platform
    pub image: ImageDefinition,
    /// Manifest repository URL
    pub git_url: String,
    /// Path of the release manifests inside the repository
    pub git_path: String,
    /// Branch or ref the platform tracks
    pub git_revision: String,
}

impl Release {
    /// `{GitURL, GitRevision}`, the pair every member of a set must share.
    pub fn source(&self) -> String {
        format!("{}@{}", self.git_url, self.git_revision)
    }
}

/// Releases resolved from one selector.
///
/// Never empty, and every member shares the same `{git_url, git_revision}`:
/// a single source commit fans out to every deploy target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseSet {
    releases: Vec<Release>,
}

impl ReleaseSet {
    /// Validate and wrap a resolution result.
    pub fn new(selector: &str, releases: Vec<Release>) -> Result<Self> {
        let Some(first) = releases.first() else {
            return Err(Error::NoReleasesFound {
                selector: selector.to_string(),
            });
        };

        for release in &releases[1..] {
            if release.git_url != first.git_url || release.git_revision != first.git_revision {
                return Err(Error::InconsistentSource {
                    expected: first.source(),
                    found: release.source(),
                    release: release.id.clone(),
                });
            }
        }

        Ok(Self { releases })
    }

    pub fn git_url(&self) -> &str {
        &self.releases[0].git_url
    }

    pub fn git_revision(&self) -> &str {
        &self.releases[0].git_revision
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Release> {
        self.releases.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.releases.iter().map(|r| r.id.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a ReleaseSet {
    type Item = &'a Release;
    type IntoIter = std::slice::Iter<'a, Release>;

    fn into_iter(self) -> Self::IntoIter {
        self.releases.iter()
    }
}

impl IntoIterator for ReleaseSet {
    type Item = Release;
    type IntoIter = std::vec::IntoIter<Release>;

    fn into_iter(self) -> Self::IntoIter {
        self.releases.into_iter()
    }
}
