//! Container image references.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Tag used when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// A container image split into repository name and tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub name: String,
    pub tag: String,
}

impl ImageDefinition {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

impl Default for ImageDefinition {
    fn default() -> Self {
        Self::new("", DEFAULT_TAG)
    }
}

impl std::fmt::Display for ImageDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Parses `name[:tag]`. A reference with more than one `:` is rejected,
/// so registries with an explicit port are not accepted.
impl std::str::FromStr for ImageDefinition {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::new(*name, DEFAULT_TAG)),
            [name, tag] if !name.is_empty() && !tag.is_empty() => Ok(Self::new(*name, *tag)),
            _ => Err(Error::InvalidInput(format!(
                "invalid image '{}', expected <image-name>[:<tag>]",
                s
            ))),
        }
    }
}
