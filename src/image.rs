//! Final image assembly: pacman configs restricted to the embedded
//! repository, extra content in the image's `/root`, and the mkarchiso run.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::{copy_recursive, make_executable, write_file_with_dirs};
use crate::environment::BuildLayout;
use crate::error::OfflineError;
use crate::pacman_conf::{PacmanConf, Section, UPSTREAM_REPOS};
use crate::process::{Cmd, CommandRunner};

/// Where archiso picks up the legacy customization hook.
const CUSTOMIZE_SCRIPT: &str = "airootfs/root/customize_airootfs.sh";
const ARCHINSTALL_DIR: &str = "archinstall-git";

/// How an external resource descriptor is staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Git(String),
    Download(String),
    Local(PathBuf),
}

impl ResourceKind {
    /// Classify a descriptor; `None` for shapes that are not understood.
    pub fn parse(descriptor: &str) -> Option<Self> {
        let d = descriptor.trim();
        if d.is_empty() {
            None
        } else if d.starts_with("git://") || d.ends_with(".git") {
            Some(ResourceKind::Git(d.to_string()))
        } else if d.starts_with("https://") {
            Some(ResourceKind::Download(d.to_string()))
        } else if d.starts_with('/') {
            Some(ResourceKind::Local(PathBuf::from(d)))
        } else {
            None
        }
    }
}

/// Result of staging resources; skipped entries carry the reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub staged: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

pub struct ImageBuildOrchestrator<'a> {
    runner: &'a dyn CommandRunner,
    layout: &'a BuildLayout,
    verbose: bool,
}

impl<'a> ImageBuildOrchestrator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, layout: &'a BuildLayout, verbose: bool) -> Self {
        Self {
            runner,
            layout,
            verbose,
        }
    }

    /// Write the build-time config and the image's `/etc/pacman.conf`, both
    /// reading only from the embedded repository.
    ///
    /// With `keep_upstream` (copy mirror mode) the template's other sections
    /// survive and only the conflicting repository blocks are replaced.
    pub fn patch_final_config(&self, keep_upstream: bool) -> Result<()> {
        let template = self.layout.template_conf();
        let text = fs::read_to_string(&template)
            .with_context(|| format!("Failed to read {}", template.display()))?;
        let repo = self.layout.repo_name.as_str();

        let mut base = PacmanConf::parse(&text);
        if keep_upstream {
            base.retain_sections(|s| !s.is(repo) && !UPSTREAM_REPOS.iter().any(|r| s.is(r)));
        } else {
            base.retain_sections(|s| s.is("options"));
        }

        let host_repo = format!("{}/", self.layout.repo_cache().display());
        let mut build = base.clone();
        build.push(Section::local_repo(repo, &host_repo));
        let build_conf = self.layout.build_conf();
        log::info!("Writing build configuration {}", build_conf.display());
        fs::write(&build_conf, build.render())
            .with_context(|| format!("Failed to write {}", build_conf.display()))?;

        let mut image = base;
        image.push(Section::local_repo(repo, &self.layout.image_repo_path()));
        log::info!("Patching image pacman.conf to only use the local repository");
        write_file_with_dirs(self.layout.image_conf(), image.render())?;
        Ok(())
    }

    /// Copy, download or clone each descriptor into `/root/resources`.
    /// Nothing here is fatal.
    pub fn stage_external_resources(&self, descriptors: &[String]) -> Result<StagingReport> {
        let mut report = StagingReport::default();
        if descriptors.is_empty() {
            return Ok(report);
        }

        let dest = self.layout.resources_dir();
        fs::create_dir_all(&dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        log::info!("Gathering {} resource(s)", descriptors.len());

        for descriptor in descriptors {
            let outcome = match ResourceKind::parse(descriptor) {
                None => Err("not a recognized URL or absolute path".to_string()),
                Some(kind) => self.stage_one(&kind, &dest)?,
            };
            match outcome {
                Ok(()) => report.staged.push(descriptor.clone()),
                Err(reason) => {
                    log::error!("Resource {} skipped: {}", descriptor, reason);
                    report.skipped.push((descriptor.clone(), reason));
                }
            }
        }
        Ok(report)
    }

    fn stage_one(&self, kind: &ResourceKind, dest: &Path) -> Result<std::result::Result<(), String>> {
        match kind {
            ResourceKind::Git(url) => {
                let clone = Cmd::new("git")
                    .arg("clone")
                    .arg(url)
                    .dir(dest)
                    .allow_fail()
                    .run_with(self.runner)?;
                if clone.success() {
                    Ok(Ok(()))
                } else {
                    Ok(Err(format!("git clone failed: {}", clone.stderr_trimmed())))
                }
            }
            ResourceKind::Download(url) => {
                let target = dest.join(download_name(url));
                let fetch = Cmd::new("curl")
                    .args(["-fsSL", "-o"])
                    .arg_path(&target)
                    .arg(url)
                    .allow_fail()
                    .run_with(self.runner)?;
                if fetch.success() {
                    Ok(Ok(()))
                } else {
                    let _ = fs::remove_file(&target);
                    Ok(Err(format!("download failed: {}", fetch.stderr_trimmed())))
                }
            }
            ResourceKind::Local(path) => {
                let Some(name) = path.file_name() else {
                    return Ok(Err("path has no file name".to_string()));
                };
                if !path.exists() {
                    return Ok(Err("path does not exist".to_string()));
                }
                match copy_recursive(path, &dest.join(name)) {
                    Ok(()) => Ok(Ok(())),
                    Err(e) => Ok(Err(format!("copy failed: {:#}", e))),
                }
            }
        }
    }

    /// Clone archinstall into the image's `/root`. A failed clone is fatal.
    pub fn stage_archinstall(&self, git_url: &str, branch: &str) -> Result<()> {
        let root = self.layout.airootfs().join("root");
        let target = root.join(ARCHINSTALL_DIR);
        if target.join(".git").exists() {
            log::info!("archinstall already present at {}", target.display());
            return Ok(());
        }

        log::info!("Cloning archinstall ({}) into the image", branch);
        fs::create_dir_all(&root)?;
        Cmd::new("git")
            .args(["clone", "-b", branch, git_url, ARCHINSTALL_DIR])
            .dir(&root)
            .error_msg("Failed to clone archinstall")
            .run_with(self.runner)?;
        Ok(())
    }

    /// Copy archinstall profiles into the cloned tree. Missing files are
    /// logged and skipped. Returns how many were copied.
    pub fn stage_profiles(&self, profiles: &[PathBuf]) -> Result<usize> {
        let dest = self
            .layout
            .airootfs()
            .join("root")
            .join(ARCHINSTALL_DIR)
            .join("profiles");
        let mut copied = 0;

        for profile in profiles {
            let Some(name) = profile.file_name().filter(|_| profile.is_file()) else {
                log::error!("Profile {} does not exist, skipping", profile.display());
                continue;
            };
            fs::create_dir_all(&dest)?;
            log::info!("Copying profile {} into archinstall", profile.display());
            fs::copy(profile, dest.join(name))
                .with_context(|| format!("Failed to copy profile {}", profile.display()))?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Run `command` at login on the first virtual terminal when no
    /// display server is attached.
    pub fn inject_autorun(&self, command: &str) -> Result<()> {
        check_autorun(command)?;
        let zprofile = self.layout.airootfs().join("root/.zprofile");
        log::info!("Installing autorun in {}", zprofile.display());
        write_file_with_dirs(&zprofile, autorun_snippet(command))
    }

    /// Install a customization script run by archiso while building the
    /// image. Returns false when the script does not exist.
    pub fn install_customize_script(&self, script: &Path) -> Result<bool> {
        if !script.is_file() {
            log::error!("Customization script {} does not exist, skipping", script.display());
            return Ok(false);
        }
        let target = self.layout.root.join(CUSTOMIZE_SCRIPT);
        log::info!("Copying customization script {} into the image", script.display());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(script, &target)
            .with_context(|| format!("Failed to copy {}", script.display()))?;
        make_executable(&target)?;
        Ok(true)
    }

    /// Run mkarchiso and return the produced image.
    pub fn invoke_builder(&self) -> Result<PathBuf> {
        log::info!("Creating ISO (this will take time)");
        let result = Cmd::new("mkarchiso")
            .arg("-C")
            .arg_path(&self.layout.build_conf())
            .arg("-v")
            .arg("-w")
            .arg_path(&self.layout.work_dir())
            .arg("-o")
            .arg_path(&self.layout.out_dir())
            .arg_path(&self.layout.root)
            .dir(&self.layout.root)
            .stream(self.verbose)
            .allow_fail()
            .run_with(self.runner)?;
        if !result.success() {
            if !result.stderr.is_empty() {
                log::error!("{}", result.stderr_trimmed());
            }
            return Err(OfflineError::ImageBuild {
                code: result.code(),
            }
            .into());
        }

        match find_iso(&self.layout.out_dir())? {
            Some(iso) => Ok(iso),
            None => bail!(
                "mkarchiso succeeded but no ISO was found in {}",
                self.layout.out_dir().display()
            ),
        }
    }
}

/// Autorun commands are embedded in a double-quoted `sh -c` argument.
pub fn check_autorun(command: &str) -> Result<()> {
    if command.contains('"') {
        return Err(OfflineError::Autorun(command.to_string()).into());
    }
    Ok(())
}

/// The `.zprofile` body for an autorun command.
pub fn autorun_snippet(command: &str) -> String {
    format!(
        "[[ -z $DISPLAY && $XDG_VTNR -eq 1 ]] && sh -c \"{}\"\n",
        command
    )
}

/// Autorun command that starts the cloned archinstall's guided installer.
pub fn archinstall_autorun() -> String {
    format!("cd /root/{} && python -m archinstall", ARCHINSTALL_DIR)
}

/// Newest `.iso` in `dir`.
pub fn find_iso(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut isos: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "iso").unwrap_or(false))
        .map(|p| {
            let mtime = fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            (mtime, p)
        })
        .collect();
    isos.sort();
    Ok(isos.pop().map(|(_, p)| p))
}

fn download_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let after_host = without_scheme
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or("");
    after_host
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("resource")
        .to_string()
}
