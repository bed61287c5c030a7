//! Release platform trait and the platform's view of an application.
//!
//! Platforms (Argo CD, for example) own the live state of releases; the
//! engine queries them, triggers reconciliation, and consumes a push-based
//! feed of convergence events.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::release::{HealthStatus, OperationPhase, ResourceFailure, SyncStatus};

/// Where an application's manifests come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSource {
    pub repo_url: String,
    pub path: String,
    pub target_revision: String,
}

/// An object matched by a selector query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub source: ApplicationSource,
    /// Images reported in the platform's status summary
    pub images: Vec<String>,
}

/// One event from the convergence feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceEvent {
    pub sync_status: SyncStatus,
    pub health_status: HealthStatus,
    /// Message attached to the health status, if any
    pub health_message: Option<String>,
    /// Phase of the current or last operation
    pub operation_phase: Option<OperationPhase>,
    pub operation_message: Option<String>,
    pub failed_resources: Vec<ResourceFailure>,
}

impl ConvergenceEvent {
    pub fn new(sync_status: SyncStatus, health_status: HealthStatus) -> Self {
        Self {
            sync_status,
            health_status,
            ..Default::default()
        }
    }
}

/// Trait for release platforms.
#[async_trait]
pub trait ReleasePlatform: Send + Sync {
    /// Name of this platform.
    fn name(&self) -> &'static str;

    /// All applications matching a label selector.
    async fn list_applications(&self, selector: &str) -> Result<Vec<Application>>;

    /// A single application. `refresh` asks the platform to re-read the
    /// live and desired state before answering.
    async fn get_application(&self, name: &str, refresh: bool) -> Result<Application>;

    /// Trigger reconciliation. A busy platform answers with
    /// `Error::AnotherSyncInProgress`.
    async fn sync(&self, name: &str, revision: &str) -> Result<()>;

    /// Convergence feed for one (application, target revision) pair.
    /// The stream ending means the feed closed.
    async fn watch(
        &self,
        name: &str,
        revision: &str,
    ) -> Result<BoxStream<'static, ConvergenceEvent>>;
}
