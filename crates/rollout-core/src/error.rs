//! Error types for the rollout engine.
//!
//! Every retry boundary classifies errors by matching on these variants,
//! so new failure modes get their own variant instead of a message.

use std::time::Duration;

use thiserror::Error;

use crate::release::ResourceFailure;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no releases found for selector '{selector}'")]
    NoReleasesFound { selector: String },

    #[error(
        "releases do not share one source: '{expected}' vs '{found}' (release '{release}')"
    )]
    InconsistentSource {
        expected: String,
        found: String,
        release: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("failed to pull from remote repository: {0}")]
    PullFailed(String),

    #[error("failed to push to remote repository: {0}")]
    PushFailed(String),

    #[error("push rejected as non-fast-forward: {0}")]
    NonFastForward(String),

    #[error("push rejected by remote: {0}")]
    PushRejected(String),

    #[error("timed out pushing to remote repository")]
    PushTimeout {
        #[source]
        last: Box<Error>,
    },

    #[error("another operation is already in progress: {0}")]
    AnotherSyncInProgress(String),

    #[error("timed out triggering sync for release '{release}'")]
    SyncTimeout {
        release: String,
        #[source]
        last: Box<Error>,
    },

    #[error("sync failed, reason: {reason} ({} failed resources)", .resources.len())]
    SyncFailed {
        reason: String,
        resources: Vec<ResourceFailure>,
    },

    #[error("status unknown: {0}")]
    StatusUnknown(String),

    #[error("health status degraded: {0}")]
    HealthDegraded(String),

    #[error("watch for release '{release}' timed out after {timeout:?}")]
    WatchTimeout { release: String, timeout: Duration },

    #[error("platform request failed: {0}")]
    Platform(String),

    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("release '{release}' failed")]
    ReleaseFailed {
        release: String,
        #[source]
        source: Box<Error>,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_timeout_exposes_last_error() {
        let err = Error::PushTimeout {
            last: Box::new(Error::NonFastForward("fetch first".to_string())),
        };

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.to_string(),
            "push rejected as non-fast-forward: fetch first"
        );
    }

    #[test]
    fn test_sync_failed_message_counts_resources() {
        let err = Error::SyncFailed {
            reason: "one or more objects failed to apply".to_string(),
            resources: vec![ResourceFailure::default(), ResourceFailure::default()],
        };

        assert!(err.to_string().ends_with("(2 failed resources)"));
    }
}
