//! Renderer trait and render parameters.
//!
//! A renderer edits the manifests of one release inside the working copy.
//! The engine only looks at success or failure.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Parameters for the kustomize profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KustomizeParams {
    /// Kustomization file name relative to the release directory.
    pub kustomization_ref: String,
    /// `images[].name` entry to update.
    pub image_reference_name: String,
    pub image_name: String,
    pub image_tag: String,
}

/// Renderer-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderParams {
    Kustomize(KustomizeParams),
}

/// Options common to every renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Extra annotations to stamp on every rendered object.
    pub annotations: BTreeMap<String, String>,
    /// Namespace override, if the profile supports one.
    pub namespace: Option<String>,
}

/// Trait for manifest renderers.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Profile name of this renderer.
    fn name(&self) -> &'static str;

    /// Render the manifests of `release_name` found under `workdir`.
    async fn render(
        &self,
        workdir: &Path,
        release_name: &str,
        params: &RenderParams,
        options: &RenderOptions,
    ) -> Result<()>;
}
