//! CLI command implementations.

pub mod exec;

use std::path::Path;

use anyhow::{Context, Result};

pub fn validate(path: &Path) -> Result<()> {
    let config = rollout_config::load_config(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;

    println!("Configuration is valid");
    println!("  profile:     {}", config.profile);
    println!("  concurrency: {}", config.concurrency);
    println!("  invocation:  {}s", config.timeouts.invocation.as_secs());
    Ok(())
}

pub fn version() {
    println!("rollout {}", env!("CARGO_PKG_VERSION"));
}
