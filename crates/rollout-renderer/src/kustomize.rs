//! Kustomize renderer.
//!
//! Rewrites the kustomization file of one release in place: the managed
//! `images` entry gets the new name and tag, render annotations are merged
//! into `commonAnnotations`.

use std::path::Path;

use async_trait::async_trait;
use rollout_core::renderer::{KustomizeParams, RenderOptions, RenderParams, Renderer};
use rollout_core::{Error, Result};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct KustomizeRenderer;

impl KustomizeRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for KustomizeRenderer {
    fn name(&self) -> &'static str {
        "kustomize"
    }

    async fn render(
        &self,
        workdir: &Path,
        release_name: &str,
        params: &RenderParams,
        options: &RenderOptions,
    ) -> Result<()> {
        let RenderParams::Kustomize(params) = params;
        let path = workdir.join(&params.kustomization_ref);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::RenderFailed(format!(
                    "kustomization file not found: {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let rendered = apply(&content, params, options)
            .map_err(|e| Error::RenderFailed(format!("{}: {}", path.display(), e)))?;

        tokio::fs::write(&path, rendered).await?;

        info!(
            release = %release_name,
            file = %path.display(),
            image = %format!("{}:{}", params.image_name, params.image_tag),
            "kustomization rendered"
        );
        Ok(())
    }
}

/// Apply the image override and annotations to a kustomization document.
pub fn apply(
    content: &str,
    params: &KustomizeParams,
    options: &RenderOptions,
) -> std::result::Result<String, String> {
    let mut doc: Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| "kustomization is not a mapping".to_string())?;

    set_image(root, params)?;

    if !options.annotations.is_empty() {
        let annotations = child_mapping(root, "commonAnnotations")?;
        for (key, value) in &options.annotations {
            annotations.insert(Value::from(key.as_str()), Value::from(value.as_str()));
        }
    }

    if let Some(namespace) = &options.namespace {
        root.insert(Value::from("namespace"), Value::from(namespace.as_str()));
    }

    serde_yaml::to_string(&doc).map_err(|e| e.to_string())
}

fn set_image(root: &mut Mapping, params: &KustomizeParams) -> std::result::Result<(), String> {
    let images = root
        .entry(Value::from("images"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if images.is_null() {
        *images = Value::Sequence(Vec::new());
    }
    let images = images
        .as_sequence_mut()
        .ok_or_else(|| "'images' is not a list".to_string())?;

    let existing = images.iter_mut().find_map(|entry| {
        let entry = entry.as_mapping_mut()?;
        let matches = entry.get("name").and_then(Value::as_str) == Some(params.image_reference_name.as_str());
        matches.then_some(entry)
    });

    match existing {
        Some(entry) => {
            debug!(reference = %params.image_reference_name, "updating image entry");
            entry.insert(Value::from("newName"), Value::from(params.image_name.as_str()));
            entry.insert(Value::from("newTag"), Value::from(params.image_tag.as_str()));
        }
        None => {
            debug!(reference = %params.image_reference_name, "adding image entry");
            let mut entry = Mapping::new();
            entry.insert(Value::from("name"), Value::from(params.image_reference_name.as_str()));
            entry.insert(Value::from("newName"), Value::from(params.image_name.as_str()));
            entry.insert(Value::from("newTag"), Value::from(params.image_tag.as_str()));
            images.push(Value::Mapping(entry));
        }
    }

    Ok(())
}

fn child_mapping<'a>(root: &'a mut Mapping, key: &str) -> std::result::Result<&'a mut Mapping, String> {
    let child = root
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if child.is_null() {
        *child = Value::Mapping(Mapping::new());
    }
    child
        .as_mapping_mut()
        .ok_or_else(|| format!("'{}' is not a mapping", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const KUSTOMIZATION: &str = r#"apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
resources:
  - ../../base
images:
  - name: main
    newName: ghcr.io/acme/api
    newTag: v1.0.0
  - name: sidecar
    newTag: "2.3"
"#;

    fn params(tag: &str) -> KustomizeParams {
        KustomizeParams {
            kustomization_ref: "kustomization.yaml".to_string(),
            image_reference_name: "main".to_string(),
            image_name: "ghcr.io/acme/api".to_string(),
            image_tag: tag.to_string(),
        }
    }

    fn image<'a>(doc: &'a Value, name: &str) -> &'a Value {
        doc["images"]
            .as_sequence()
            .unwrap()
            .iter()
            .find(|i| i["name"].as_str() == Some(name))
            .unwrap()
    }

    #[test]
    fn test_updates_managed_image_only() {
        let out = apply(KUSTOMIZATION, &params("v1.1.0"), &RenderOptions::default()).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();

        assert_eq!(image(&doc, "main")["newTag"].as_str(), Some("v1.1.0"));
        assert_eq!(image(&doc, "main")["newName"].as_str(), Some("ghcr.io/acme/api"));
        assert_eq!(image(&doc, "sidecar")["newTag"].as_str(), Some("2.3"));
        assert_eq!(doc["resources"][0].as_str(), Some("../../base"));
        assert!(doc.get("commonAnnotations").is_none());
    }

    #[test]
    fn test_appends_missing_image_entry() {
        let content = "resources:\n  - deployment.yaml\n";
        let out = apply(content, &params("v2"), &RenderOptions::default()).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();

        assert_eq!(doc["images"].as_sequence().unwrap().len(), 1);
        assert_eq!(image(&doc, "main")["newTag"].as_str(), Some("v2"));
    }

    #[test]
    fn test_merges_annotations_and_namespace() {
        let content = "commonAnnotations:\n  team: payments\n";
        let options = RenderOptions {
            annotations: BTreeMap::from([(
                "rollout.dev/restartedAt".to_string(),
                "2026-10-19T10:00:00Z".to_string(),
            )]),
            namespace: Some("payments".to_string()),
        };

        let out = apply(content, &params("v3"), &options).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();

        assert_eq!(doc["commonAnnotations"]["team"].as_str(), Some("payments"));
        assert_eq!(
            doc["commonAnnotations"]["rollout.dev/restartedAt"].as_str(),
            Some("2026-10-19T10:00:00Z")
        );
        assert_eq!(doc["namespace"].as_str(), Some("payments"));
    }

    #[test]
    fn test_rejects_non_list_images() {
        let result = apply("images: main\n", &params("v1"), &RenderOptions::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_render_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kustomization.yaml");
        std::fs::write(&path, KUSTOMIZATION).unwrap();

        KustomizeRenderer::new()
            .render(
                dir.path(),
                "api",
                &RenderParams::Kustomize(params("v9")),
                &RenderOptions::default(),
            )
            .await
            .unwrap();

        let doc: Value = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(image(&doc, "main")["newTag"].as_str(), Some("v9"));
    }

    #[tokio::test]
    async fn test_render_missing_file() {
        let dir = tempfile::tempdir().unwrap();

        let result = KustomizeRenderer::new()
            .render(
                dir.path(),
                "api",
                &RenderParams::Kustomize(params("v9")),
                &RenderOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(Error::RenderFailed(_))));
    }
}
