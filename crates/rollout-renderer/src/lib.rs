//! Manifest renderers for the rollout engine.
//!
//! Provides renderer implementations:
//! - Kustomize (image override plus common annotations)

pub mod kustomize;

use std::sync::Arc;

use rollout_core::renderer::Renderer;
use rollout_core::{Error, Result};

pub use kustomize::KustomizeRenderer;
pub use rollout_core::renderer::{KustomizeParams, RenderOptions, RenderParams};

/// Annotation stamped by `--restart` to force a rollout of unchanged images.
pub const RESTARTED_AT_ANNOTATION: &str = "rollout.dev/restartedAt";

/// Renderer for a profile name.
pub fn renderer_for(profile: &str) -> Result<Arc<dyn Renderer>> {
    match profile {
        "kustomize" => Ok(Arc::new(KustomizeRenderer::new())),
        other => Err(Error::InvalidInput(format!(
            "unsupported renderer profile '{}'",
            other
        ))),
    }
}
