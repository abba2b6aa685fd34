//! Build directory layout and lifecycle.
//!
//! The build directory is an archiso profile: the template tree plus the
//! pacman configs this tool generates. The local repository lives under
//! `airootfs/root/<repo>/` so the booted image finds it at `/root/<repo>/`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::copy_dir_merge;
use crate::config::Config;
use crate::packages::PACKAGES_FILE;

/// Reflector units shipped by archiso that would rewrite the mirrorlist at boot.
const REFLECTOR_UNITS: [&str; 2] = [
    "airootfs/etc/systemd/system/reflector.service.d/archiso.conf",
    "airootfs/etc/systemd/system/multi-user.target.wants/reflector.service",
];

/// Fixed paths inside a build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub root: PathBuf,
    pub repo_name: String,
}

impl BuildLayout {
    pub fn new(root: &Path, repo_name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            repo_name: repo_name.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.build_dir, &config.repo_name)
    }

    /// Temporary pacman database used while syncing.
    pub fn tmp_db(&self) -> PathBuf {
        self.root.join("tmp.pacdb")
    }

    pub fn airootfs(&self) -> PathBuf {
        self.root.join("airootfs")
    }

    /// Local repository, as seen from the host.
    pub fn repo_cache(&self) -> PathBuf {
        self.airootfs().join("root").join(&self.repo_name)
    }

    /// Local repository, as seen from inside the booted image.
    pub fn image_repo_path(&self) -> String {
        format!("/root/{}/", self.repo_name)
    }

    pub fn repo_db(&self) -> PathBuf {
        self.repo_cache().join(format!("{}.db.tar.gz", self.repo_name))
    }

    pub fn sync_conf(&self) -> PathBuf {
        self.root.join("pacman.sync.conf")
    }

    pub fn build_conf(&self) -> PathBuf {
        self.root.join("pacman.build.conf")
    }

    /// pacman.conf shipped with the template.
    pub fn template_conf(&self) -> PathBuf {
        self.root.join("pacman.conf")
    }

    /// pacman.conf installed into the image.
    pub fn image_conf(&self) -> PathBuf {
        self.airootfs().join("etc/pacman.conf")
    }

    pub fn packages_file(&self) -> PathBuf {
        self.root.join(PACKAGES_FILE)
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.airootfs().join("root/resources")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn test_disk(&self) -> PathBuf {
        self.root.join("test.qcow2")
    }
}

/// Owns the build directory on disk.
pub struct BuildEnvironment {
    layout: BuildLayout,
    templates: PathBuf,
    rebuild_requested: bool,
}

impl BuildEnvironment {
    pub fn new(layout: BuildLayout, templates: &Path, rebuild_requested: bool) -> Self {
        Self {
            layout,
            templates: templates.to_path_buf(),
            rebuild_requested,
        }
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    /// Whether [`reset`](Self::reset) should run: on request, or when no
    /// previous build exists.
    pub fn needs_reset(&self) -> bool {
        self.rebuild_requested || !self.layout.root.exists()
    }

    /// Delete and recreate the build directory.
    pub fn reset(&self) -> Result<()> {
        let root = &self.layout.root;
        log::info!("Setting up a new build directory in {}", root.display());
        if root.exists() {
            fs::remove_dir_all(root)
                .with_context(|| format!("Failed to remove {}", root.display()))?;
        }
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create {}", root.display()))?;
        Ok(())
    }

    /// Reset while keeping the repository cache, which is parked in `stash`
    /// for the duration of the wipe.
    pub fn reset_preserving_cache(&self, stash: &Path) -> Result<()> {
        let cache = self.layout.repo_cache();
        let parked = stash.join(&self.layout.repo_name);
        let saved = cache.is_dir();

        if saved {
            if parked.exists() {
                fs::remove_dir_all(&parked)?;
            }
            fs::create_dir_all(stash)?;
            log::info!("Moving {} aside to {}", cache.display(), parked.display());
            crate::common::copy_recursive(&cache, &parked)?;
        }

        self.reset()?;

        if saved {
            log::info!("Restoring repository cache to {}", cache.display());
            crate::common::copy_recursive(&parked, &cache)?;
            fs::remove_dir_all(&parked)?;
        }
        Ok(())
    }

    /// The template's own package list, untouched by earlier runs.
    pub fn default_packages_file(&self, template_name: &str) -> PathBuf {
        self.templates.join(template_name).join(PACKAGES_FILE)
    }

    /// Merge-copy an archiso template into the build directory.
    ///
    /// Paths that already exist are left alone, so manual edits survive a
    /// re-run. Also creates the temporary database and repository cache
    /// directories.
    pub fn materialize_template(&self, template_name: &str) -> Result<()> {
        let src = self.templates.join(template_name);
        if !src.is_dir() {
            anyhow::bail!(
                "archiso template '{}' not found at {}",
                template_name,
                src.display()
            );
        }

        log::info!(
            "Copying archiso template {} into {}",
            template_name,
            self.layout.root.display()
        );
        let created = copy_dir_merge(&src, &self.layout.root)?;
        log::debug!("{} template entries created", created);

        fs::create_dir_all(self.layout.tmp_db())?;
        fs::create_dir_all(self.layout.repo_cache())?;
        Ok(())
    }

    /// Remove the reflector units so the image keeps the mirrorlist we ship.
    ///
    /// Returns how many files were removed.
    pub fn disable_periodic_mirror_refresh(&self) -> Result<usize> {
        let mut removed = 0;
        for unit in REFLECTOR_UNITS {
            let path = self.layout.root.join(unit);
            if path.symlink_metadata().is_ok() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                log::info!("Removed reflector unit {} from the image", unit);
                removed += 1;
            } else if self.rebuild_requested {
                log::warn!("Reflector unit {} not present in template", unit);
            }
        }
        Ok(removed)
    }
}
