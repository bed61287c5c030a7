//! Rollout orchestration.
//!
//! Composes one invocation: resolve the releases, clone the manifest
//! repository into a scratch directory, render every release, commit once,
//! push, then sync every release to convergence.

pub mod orchestrator;

pub use orchestrator::{RolloutEvent, RolloutOrchestrator, RolloutReport, RolloutRequest};
