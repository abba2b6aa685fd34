//! Show command - displays information.

use anyhow::Result;

use crate::aur::find_package_files;
use crate::config::Config;
use crate::environment::BuildLayout;
use crate::image::find_iso;
use crate::packages::read_package_list;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the state of the build directory
    Status,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Status => {
            let layout = BuildLayout::from_config(config);
            if !layout.root.exists() {
                println!("No build directory at {}", layout.root.display());
                return Ok(());
            }

            println!("Build directory: {}", layout.root.display());
            let packages_file = layout.packages_file();
            if packages_file.exists() {
                println!("  Package list:  {} entries", read_package_list(&packages_file)?.len());
            }
            println!(
                "  Repository:    {} package file(s) in {}",
                find_package_files(&layout.repo_cache())?.len(),
                layout.repo_cache().display()
            );
            println!(
                "  Index:         {}",
                if layout.repo_db().exists() { "present" } else { "missing" }
            );
            match find_iso(&layout.out_dir())? {
                Some(iso) => println!("  ISO:           {}", iso.display()),
                None => println!("  ISO:           not built"),
            }
        }
    }
    Ok(())
}
