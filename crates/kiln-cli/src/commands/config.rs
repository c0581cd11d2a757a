//! Configuration display command.

use anyhow::{Context, Result};
use kiln_config::KilnConfig;

/// Prints the merged configuration.
pub fn show(config: &KilnConfig) -> Result<()> {
    let rendered = config.to_toml().context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
