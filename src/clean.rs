//! Build directory cleaning.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::environment::BuildLayout;

/// Remove mkarchiso's work and output directories. The repository cache
/// and the adapted template stay.
pub fn clean_outputs(layout: &BuildLayout) -> Result<()> {
    let mut cleaned = false;
    for dir in [layout.work_dir(), layout.out_dir()] {
        cleaned |= remove_dir(&dir)?;
    }

    if cleaned {
        println!("Clean complete (repository cache preserved).");
    } else {
        println!("No build outputs to clean.");
    }
    Ok(())
}

/// Remove the whole build directory.
pub fn clean_all(layout: &BuildLayout) -> Result<()> {
    if remove_dir(&layout.root)? {
        println!("\nFull clean complete.");
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}

fn remove_dir(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    println!("Removing {}...", dir.display());
    fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    Ok(true)
}
