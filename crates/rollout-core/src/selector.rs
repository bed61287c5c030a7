//! Label selector requests.
//!
//! A [`ReleaseRequest`] carries the selector expression sent to the platform
//! plus the reverse lookups that read release, environment and cluster back
//! out of the labels of any matched object.

use std::collections::HashMap;

/// Reads one label back from a matched object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGetter {
    key: String,
}

impl LabelGetter {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value for this key, or an empty string when the label is absent.
    pub fn get(&self, labels: &HashMap<String, String>) -> String {
        labels.get(&self.key).cloned().unwrap_or_default()
    }
}

/// An immutable selector request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseRequest {
    selector: String,
    release: Option<LabelGetter>,
    environment: Option<LabelGetter>,
    cluster: Option<LabelGetter>,
}

impl ReleaseRequest {
    pub fn builder() -> ReleaseRequestBuilder {
        ReleaseRequestBuilder::default()
    }

    /// Comma-joined `key=value` expression; empty means unrestricted.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn release_from(&self, labels: &HashMap<String, String>) -> String {
        Self::read(&self.release, labels)
    }

    pub fn environment_from(&self, labels: &HashMap<String, String>) -> String {
        Self::read(&self.environment, labels)
    }

    pub fn cluster_from(&self, labels: &HashMap<String, String>) -> String {
        Self::read(&self.cluster, labels)
    }

    fn read(getter: &Option<LabelGetter>, labels: &HashMap<String, String>) -> String {
        getter
            .as_ref()
            .map(|g| g.get(labels))
            .unwrap_or_default()
    }
}

/// Builder for [`ReleaseRequest`].
///
/// Each dimension binds its reverse getter to `key` even when `value` is
/// empty; only non-empty values restrict the selector.
#[derive(Debug, Clone, Default)]
pub struct ReleaseRequestBuilder {
    release: Option<(LabelGetter, String)>,
    environment: Option<(LabelGetter, String)>,
    cluster: Option<(LabelGetter, String)>,
}

impl ReleaseRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.release = Some((LabelGetter::new(key), value.into()));
        self
    }

    pub fn environment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment = Some((LabelGetter::new(key), value.into()));
        self
    }

    pub fn cluster(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cluster = Some((LabelGetter::new(key), value.into()));
        self
    }

    pub fn build(self) -> ReleaseRequest {
        // release -> environment -> cluster
        let selector = [&self.release, &self.environment, &self.cluster]
            .into_iter()
            .flatten()
            .filter(|(_, value)| !value.is_empty())
            .map(|(getter, value)| format!("{}={}", getter.key(), value))
            .collect::<Vec<_>>()
            .join(",");

        ReleaseRequest {
            selector,
            release: self.release.map(|(g, _)| g),
            environment: self.environment.map(|(g, _)| g),
            cluster: self.cluster.map(|(g, _)| g),
        }
    }
}
