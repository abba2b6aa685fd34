//! Package download and local repository index.

use anyhow::Result;
use std::path::PathBuf;

use crate::aur::find_package_files;
use crate::environment::BuildLayout;
use crate::error::OfflineError;
use crate::process::{Cmd, CommandRunner};

pub struct RepositorySyncOrchestrator<'a> {
    runner: &'a dyn CommandRunner,
    layout: &'a BuildLayout,
    verbose: bool,
}

impl<'a> RepositorySyncOrchestrator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, layout: &'a BuildLayout, verbose: bool) -> Self {
        Self {
            runner,
            layout,
            verbose,
        }
    }

    /// Download `packages` and their dependencies into the repository cache.
    ///
    /// `local_files` are source-built packages already in the cache; they
    /// are not in any sync database, so they go through `-Uw`, which pulls
    /// their dependencies the same way.
    pub fn sync(&self, packages: &[String], local_files: &[PathBuf]) -> Result<()> {
        let sync_conf = self.layout.sync_conf();

        if self.verbose {
            log::info!(
                "Synchronizing packages using: pacman --noconfirm --config {} -Syw {}",
                sync_conf.display(),
                packages.join(" ")
            );
        } else {
            log::info!(
                "Synchronizing {} packages (this might take a while)",
                packages.len()
            );
        }

        let result = Cmd::new("pacman")
            .args(["--noconfirm", "--config"])
            .arg_path(&sync_conf)
            .arg("-Syw")
            .args(packages)
            .stream(self.verbose)
            .allow_fail()
            .run_with(self.runner)?;
        if !result.success() {
            return Err(OfflineError::Sync {
                code: result.code(),
                stderr: result.stderr_trimmed().to_string(),
            }
            .into());
        }

        if local_files.is_empty() {
            return Ok(());
        }

        log::info!(
            "Downloading dependencies of {} source-built package file(s)",
            local_files.len()
        );
        let mut cmd = Cmd::new("pacman")
            .args(["--noconfirm", "--config"])
            .arg_path(&sync_conf)
            .arg("-Uw");
        for file in local_files {
            cmd = cmd.arg_path(file);
        }
        let result = cmd.stream(self.verbose).allow_fail().run_with(self.runner)?;
        if !result.success() {
            return Err(OfflineError::Sync {
                code: result.code(),
                stderr: result.stderr_trimmed().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Regenerate the repository database over every cached package.
    pub fn rebuild_index(&self) -> Result<()> {
        let cache = self.layout.repo_cache();
        let files = find_package_files(&cache)?;
        log::info!(
            "Creating repository database {} over {} package(s)",
            self.layout.repo_db().display(),
            files.len()
        );

        let mut cmd = Cmd::new("repo-add").arg_path(&self.layout.repo_db());
        for file in &files {
            cmd = cmd.arg_path(file);
        }
        let result = cmd.stream(self.verbose).allow_fail().run_with(self.runner)?;
        if !result.success() {
            return Err(OfflineError::Index {
                code: result.code(),
                stderr: result.stderr_trimmed().to_string(),
            }
            .into());
        }
        Ok(())
    }
}
