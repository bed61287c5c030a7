//! Rollout configuration parsing.
//!
//! ```kdl
//! profile "kustomize"
//! selectors {
//!     release "platform.rollout.dev/release"
//!     environment "platform.rollout.dev/environment"
//!     cluster "platform.rollout.dev/cluster"
//! }
//! kustomize file-ref="kustomization.yaml" image-ref="main"
//! committer name="rollout-bot" email="rollout-bot@localhost"
//! timeouts {
//!     invocation 1800
//!     push 15
//!     sync 900
//!     watch 900
//! }
//! retry {
//!     push-interval 1
//!     sync-interval 1
//!     max-unknown 5
//! }
//! concurrency 4
//! ```
//!
//! Durations are whole seconds. Every node is optional.

use crate::settings::RolloutConfig;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rollout.kdl";

/// Parse a rollout configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<RolloutConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = RolloutConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }

        match name {
            "profile" => {
                config.profile = get_first_string_arg(node)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| ConfigError::MissingField("profile name".to_string()))?;
            }
            "selectors" => {
                for child in child_nodes(node) {
                    let key = get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!("selectors.{}", child.name().value()))
                    })?;
                    match child.name().value() {
                        "release" => config.selectors.release = key,
                        "environment" => config.selectors.environment = key,
                        "cluster" => config.selectors.cluster = key,
                        _ => {}
                    }
                }
            }
            "kustomize" => {
                if let Some(file_ref) = get_string_prop(node, "file-ref") {
                    config.kustomize.file_ref = file_ref;
                }
                if let Some(image_ref) = get_string_prop(node, "image-ref") {
                    config.kustomize.image_ref = image_ref;
                }
            }
            "committer" => {
                if let Some(name) = get_string_prop(node, "name") {
                    config.committer.name = name;
                }
                if let Some(email) = get_string_prop(node, "email") {
                    config.committer.email = email;
                }
            }
            "timeouts" => {
                for child in child_nodes(node) {
                    let field = format!("timeouts.{}", child.name().value());
                    let value = get_duration_arg(child, &field)?;
                    match child.name().value() {
                        "invocation" => config.timeouts.invocation = value,
                        "push" => config.timeouts.push = value,
                        "sync" => config.timeouts.sync = value,
                        "watch" => config.timeouts.watch = value,
                        _ => {}
                    }
                }
            }
            "retry" => {
                for child in child_nodes(node) {
                    let field = format!("retry.{}", child.name().value());
                    match child.name().value() {
                        "push-interval" => {
                            config.retry.push_interval = get_duration_arg(child, &field)?
                        }
                        "sync-interval" => {
                            config.retry.sync_interval = get_duration_arg(child, &field)?
                        }
                        "max-unknown" => {
                            config.retry.max_unknown = get_int_arg(child, &field)?
                                .try_into()
                                .map_err(|_| invalid(&field, "out of range"))?;
                        }
                        _ => {}
                    }
                }
            }
            "concurrency" => {
                let value = get_int_arg(node, "concurrency")?;
                if value == 0 {
                    return Err(invalid("concurrency", "must be at least 1"));
                }
                config.concurrency = value
                    .try_into()
                    .map_err(|_| invalid("concurrency", "out of range"))?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_config(path: &Path) -> ConfigResult<RolloutConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load `path` when given, else `rollout.kdl` when present, else defaults.
pub fn load_or_default(path: Option<&Path>) -> ConfigResult<RolloutConfig> {
    match path {
        Some(path) => load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                load_config(default_path)
            } else {
                Ok(RolloutConfig::default())
            }
        }
    }
}

// Helper functions for extracting values from KDL nodes

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn child_nodes(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|c| c.nodes().iter())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_int_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?
        .value();

    let int = value
        .as_integer()
        .ok_or_else(|| invalid(field, "expected an integer"))?;

    u64::try_from(int).map_err(|_| invalid(field, "must not be negative"))
}

fn get_duration_arg(node: &KdlNode, field: &str) -> ConfigResult<Duration> {
    let secs = get_int_arg(node, field)?;
    if secs == 0 {
        return Err(invalid(field, "must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
