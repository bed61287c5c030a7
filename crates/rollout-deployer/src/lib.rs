//! Release platforms and the release manager.
//!
//! Provides:
//! - Argo CD (REST API) platform client
//! - Release resolution from label selectors
//! - The convergence watch state machine
//! - `ReleaseManager`: sync trigger with retry and fail-fast fan-out

pub mod argocd;
pub mod manager;
pub mod resolver;
pub mod watch;

pub use argocd::{ArgoCdClient, ArgoCdConfig};
pub use manager::{ManagerOptions, ReleaseManager};
pub use resolver::resolve;
pub use watch::{SyncCondition, Verdict, WatchOptions, WatchState, sync_condition};

pub use rollout_core::platform::{Application, ConvergenceEvent, ReleasePlatform};
