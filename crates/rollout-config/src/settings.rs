//! Rollout settings and their defaults.

use std::time::Duration;

use rollout_core::retry::RetryOptions;
use serde::{Deserialize, Serialize};

/// Everything an invocation can be tuned with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Renderer profile (`kustomize`).
    pub profile: String,
    /// Label keys used to select releases.
    pub selectors: SelectorKeys,
    pub kustomize: KustomizeConfig,
    /// Identity recorded on manifest commits.
    pub committer: CommitterConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    /// Releases synced at the same time.
    pub concurrency: usize,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            profile: "kustomize".to_string(),
            selectors: SelectorKeys::default(),
            kustomize: KustomizeConfig::default(),
            committer: CommitterConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            concurrency: 4,
        }
    }
}

impl RolloutConfig {
    pub fn push_retry(&self) -> RetryOptions {
        RetryOptions::new(self.retry.push_interval, self.timeouts.push)
    }

    pub fn sync_retry(&self) -> RetryOptions {
        RetryOptions::new(self.retry.sync_interval, self.timeouts.sync)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorKeys {
    pub release: String,
    pub environment: String,
    pub cluster: String,
}

impl Default for SelectorKeys {
    fn default() -> Self {
        Self {
            release: "platform.rollout.dev/release".to_string(),
            environment: "platform.rollout.dev/environment".to_string(),
            cluster: "platform.rollout.dev/cluster".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KustomizeConfig {
    /// Kustomization file inside each release directory.
    pub file_ref: String,
    /// `images[].name` entry managed by rollouts.
    pub image_ref: String,
}

impl Default for KustomizeConfig {
    fn default() -> Self {
        Self {
            file_ref: "kustomization.yaml".to_string(),
            image_ref: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitterConfig {
    pub name: String,
    pub email: String,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            name: "rollout-bot".to_string(),
            email: "rollout-bot@localhost".to_string(),
        }
    }
}

/// Deadlines. Inner timeouts are capped by `invocation` at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub invocation: Duration,
    pub push: Duration,
    pub sync: Duration,
    pub watch: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            invocation: Duration::from_secs(30 * 60),
            push: Duration::from_secs(15),
            sync: Duration::from_secs(15 * 60),
            watch: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub push_interval: Duration,
    pub sync_interval: Duration,
    /// Consecutive `Unknown` statuses tolerated while watching.
    pub max_unknown: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            push_interval: Duration::from_secs(1),
            sync_interval: Duration::from_secs(1),
            max_unknown: 5,
        }
    }
}
