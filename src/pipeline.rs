//! The offline build pipeline.
//!
//! Phases run strictly in order: build directory, sync configuration,
//! package lists, AUR builds, package sync and repository index, then the
//! image itself. Host interaction goes through the injected runner, prompt
//! and mirror source.

use anyhow::Result;
use std::path::PathBuf;

use crate::aur::{cached_packages, SourceBuildOrchestrator, SourceBuildReport};
use crate::config::{split_words, Config};
use crate::environment::{BuildEnvironment, BuildLayout};
use crate::image::{archinstall_autorun, check_autorun, ImageBuildOrchestrator, StagingReport};
use crate::mirrors::{MirrorResolver, MirrorSource};
use crate::packages::{PackageIndex, PackageListing, PacmanIndex};
use crate::process::CommandRunner;
use crate::prompt::Prompt;
use crate::repo::RepositorySyncOrchestrator;
use crate::sandbox::SandboxUserManager;
use crate::timing::Timer;

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub iso: PathBuf,
    /// Contents of the written package list.
    pub packages: Vec<String>,
    /// Servers used for syncing (empty for copied or local configs).
    pub mirrors: Vec<String>,
    pub source_builds: SourceBuildReport,
    pub resources: StagingReport,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    prompt: &'a dyn Prompt,
    mirrors: &'a dyn MirrorSource,
    index: Option<&'a dyn PackageIndex>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn CommandRunner,
        prompt: &'a dyn Prompt,
        mirrors: &'a dyn MirrorSource,
    ) -> Self {
        Self {
            config,
            runner,
            prompt,
            mirrors,
            index: None,
        }
    }

    /// Check package names against `index` instead of pacman.
    pub fn with_index(mut self, index: &'a dyn PackageIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn run(&self) -> Result<PipelineOutcome> {
        let config = self.config;
        if let Some(command) = &config.autorun {
            check_autorun(command)?;
        }

        let env = BuildEnvironment::new(
            BuildLayout::from_config(config),
            &config.host.archiso_configs,
            config.rebuild,
        );
        let layout = env.layout();

        let timer = Timer::start("Build directory");
        self.prepare_environment(&env)?;
        timer.finish();

        let timer = Timer::start("Sync configuration");
        let mirrors = MirrorResolver::new(layout, &config.host, self.mirrors, self.prompt)
            .resolve(&config.mirrors)?;
        timer.finish();

        let mut listing = self.package_listing(&env)?;
        let mut aur = PackageListing::new();
        aur.set(config.aur_packages.iter().cloned())?;

        let source_builds = if aur.is_empty() {
            SourceBuildReport::default()
        } else {
            let timer = Timer::start("AUR builds");
            let report = self.build_sources(layout, aur.names())?;
            timer.finish();
            report
        };

        let timer = Timer::start("Package sync");
        let repo = RepositorySyncOrchestrator::new(self.runner, layout, config.verbose);
        let mut local_files = source_builds.artifacts.clone();
        for name in &source_builds.cached {
            local_files.extend(cached_packages(&layout.repo_cache(), name)?);
        }
        repo.sync(listing.names(), &local_files)?;

        let mut built = PackageListing::new();
        built.set(source_builds.available(aur.names()))?;
        listing.append(&built);
        listing.write_to(&layout.packages_file())?;

        repo.rebuild_index()?;
        timer.finish();

        let timer = Timer::start("Image preparation");
        let image = ImageBuildOrchestrator::new(self.runner, layout, config.verbose);
        image.patch_final_config(config.mirrors.is_copy())?;
        let resources = self.stage_content(&image)?;
        timer.finish();

        if config.breakpoint {
            self.prompt.pause("before mkarchiso")?;
        }

        let timer = Timer::start("mkarchiso");
        let iso = image.invoke_builder()?;
        timer.finish();
        log::info!("ISO has been created: {}", iso.display());

        Ok(PipelineOutcome {
            iso,
            packages: listing.names().to_vec(),
            mirrors,
            source_builds,
            resources,
        })
    }

    fn prepare_environment(&self, env: &BuildEnvironment) -> Result<()> {
        if env.needs_reset() {
            if self.config.save_cache {
                env.reset_preserving_cache(&self.config.host.cache_stash)?;
            } else {
                env.reset()?;
            }
        } else {
            log::info!(
                "Reusing build directory {} (use --rebuild to start over)",
                env.layout().root.display()
            );
        }
        env.materialize_template(&self.config.template)?;
        env.disable_periodic_mirror_refresh()?;
        Ok(())
    }

    /// Template defaults followed by the operator's packages.
    ///
    /// Defaults come from the template rather than the build directory, whose
    /// list was rewritten by the previous run.
    fn package_listing(&self, env: &BuildEnvironment) -> Result<PackageListing> {
        let layout = env.layout();
        let mut requested = self.config.packages.clone();
        if requested.is_empty() && self.config.interactive {
            let answer = self
                .prompt
                .ask("Additional packages to include (space separated, empty for none): ")?;
            requested = split_words(&answer);
        }

        let mut user = PackageListing::new();
        if self.config.validate_packages && !requested.is_empty() {
            match self.index {
                Some(index) => user.set_checked(requested, index)?,
                None => {
                    let index = PacmanIndex::new(self.runner, &layout.sync_conf());
                    user.set_checked(requested, &index)?;
                }
            }
        } else {
            user.set(requested)?;
        }

        let mut listing =
            PackageListing::from_template(&env.default_packages_file(&self.config.template))?;
        log::info!(
            "Package list: {} from the template, {} requested",
            listing.size(),
            user.size()
        );
        listing.append(&user);
        Ok(listing)
    }

    /// Build AUR packages inside a sandbox that is always torn down.
    fn build_sources(&self, layout: &BuildLayout, packages: &[String]) -> Result<SourceBuildReport> {
        let manager = SandboxUserManager::new(self.runner, &self.config.host);
        let user = manager.open(&self.config.aur_user)?;

        let built = SourceBuildOrchestrator::new(
            self.runner,
            &user,
            &layout.repo_cache(),
            &self.config.aur_snapshot_url,
        )
        .force_rebuild(self.config.rebuild && !self.config.save_cache)
        .verbose(self.config.verbose)
        .build_all(packages);

        if let Err(e) = manager.close(&user) {
            if built.is_ok() {
                return Err(e);
            }
            log::error!("{:#}", e);
        }

        let report = built?;
        if !report.skipped.is_empty() {
            log::warn!(
                "{} AUR package(s) skipped: {}",
                report.skipped.len(),
                report
                    .skipped
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(report)
    }

    /// Resources, archinstall, autorun and the customization script.
    fn stage_content(&self, image: &ImageBuildOrchestrator) -> Result<StagingReport> {
        let config = self.config;
        let resources = image.stage_external_resources(&config.resources)?;

        let archinstall = config.archinstall || !config.profiles.is_empty();
        if archinstall {
            image.stage_archinstall(&config.archinstall_git_url, &config.ai_branch)?;
            image.stage_profiles(&config.profiles)?;
        }

        match (&config.autorun, archinstall) {
            (Some(command), _) => image.inject_autorun(command)?,
            (None, true) => image.inject_autorun(&archinstall_autorun())?,
            (None, false) => {}
        }

        if let Some(script) = &config.customize {
            image.install_customize_script(script)?;
        }
        Ok(resources)
    }
}
