//! KDL configuration parsing for the rollout engine.
//!
//! This crate handles:
//! - The optional `rollout.kdl` file
//! - Documented defaults for every setting

pub mod error;
pub mod parse;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use parse::{DEFAULT_CONFIG_FILE, load_config, load_or_default, parse_config};
pub use settings::{
    CommitterConfig, KustomizeConfig, RetryConfig, RolloutConfig, SelectorKeys, TimeoutConfig,
};
