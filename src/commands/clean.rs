//! Clean command - removes build artifacts.

use anyhow::Result;

use crate::clean;
use crate::config::Config;
use crate::environment::BuildLayout;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// mkarchiso work and output directories (default)
    Outputs,
    /// The whole build directory, repository cache included
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    let layout = BuildLayout::from_config(config);
    match target {
        CleanTarget::Outputs => clean::clean_outputs(&layout),
        CleanTarget::All => clean::clean_all(&layout),
    }
}
