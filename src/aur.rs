//! AUR source builds.
//!
//! Each package is fetched as a snapshot tarball, built with makepkg as the
//! sandbox user, and the resulting packages are moved into the local
//! repository. A package that fails at any step is logged and skipped; the
//! rest of the run carries on.

use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::common::move_file;
use crate::process::{Cmd, CommandRunner};
use crate::sandbox::SandboxUser;

/// Binary package suffixes recognised in the repository.
pub const PACKAGE_SUFFIXES: [&str; 2] = [".pkg.tar.zst", ".pkg.tar.xz"];

/// Why a source package did not make it into the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Fetch(String),
    Extract(String),
    Build(i32),
    NoArtifact,
    Relocate(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Fetch(e) => write!(f, "snapshot download failed: {}", e),
            SkipReason::Extract(e) => write!(f, "snapshot extraction failed: {}", e),
            SkipReason::Build(code) => write!(f, "makepkg exited with code {}", code),
            SkipReason::NoArtifact => write!(f, "makepkg produced no package file"),
            SkipReason::Relocate(e) => write!(f, "could not move package into repository: {}", e),
        }
    }
}

/// Outcome of the source-build phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceBuildReport {
    /// Built during this run.
    pub built: Vec<String>,
    /// Already in the repository cache.
    pub cached: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    /// Package files moved into the repository by this run.
    pub artifacts: Vec<PathBuf>,
}

impl SourceBuildReport {
    /// Names that are available in the repository, in request order.
    pub fn available(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|name| self.built.contains(name) || self.cached.contains(name))
            .cloned()
            .collect()
    }
}

pub struct SourceBuildOrchestrator<'a> {
    runner: &'a dyn CommandRunner,
    user: &'a SandboxUser,
    repo_cache: PathBuf,
    snapshot_url: String,
    force_rebuild: bool,
    verbose: bool,
}

impl<'a> SourceBuildOrchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        user: &'a SandboxUser,
        repo_cache: &Path,
        snapshot_url: &str,
    ) -> Self {
        Self {
            runner,
            user,
            repo_cache: repo_cache.to_path_buf(),
            snapshot_url: snapshot_url.trim_end_matches('/').to_string(),
            force_rebuild: false,
            verbose: false,
        }
    }

    pub fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn snapshot_url_for(&self, package: &str) -> String {
        format!("{}/{}.tar.gz", self.snapshot_url, package)
    }

    /// Build every package, never failing on a single package.
    ///
    /// Errors are returned only for problems outside any one package
    /// (e.g. an unreadable repository directory).
    pub fn build_all(&self, packages: &[String]) -> Result<SourceBuildReport> {
        let mut report = SourceBuildReport::default();
        fs::create_dir_all(&self.repo_cache)
            .with_context(|| format!("Failed to create {}", self.repo_cache.display()))?;

        for package in packages {
            if !self.force_rebuild && !cached_packages(&self.repo_cache, package)?.is_empty() {
                log::info!("AUR package {} already in repository, skipping build", package);
                report.cached.push(package.clone());
                continue;
            }

            log::info!("Building AUR package {}", package);
            match self.build_one(package)? {
                Ok(artifacts) => {
                    report.built.push(package.clone());
                    report.artifacts.extend(artifacts);
                }
                Err(reason) => {
                    log::error!(
                        "Could not build {}: {}. Continuing with the remaining packages.",
                        package,
                        reason
                    );
                    report.skipped.push((package.clone(), reason));
                }
            }
        }

        Ok(report)
    }

    /// Outer error: host problem. Inner error: this package is skipped.
    fn build_one(&self, package: &str) -> Result<std::result::Result<Vec<PathBuf>, SkipReason>> {
        let home = &self.user.home;
        let archive = home.join(format!("{}.tar.gz", package));
        let build_dir = home.join(package);

        if let Err(reason) = self.fetch(package, &archive)? {
            self.cleanup(&archive, &build_dir);
            return Ok(Err(reason));
        }

        let extract = Cmd::as_user(&self.user.name, "tar")
            .arg("--directory")
            .arg_path(home)
            .arg("-xzf")
            .arg_path(&archive)
            .allow_fail()
            .run_with(self.runner)?;
        if !extract.success() {
            self.cleanup(&archive, &build_dir);
            return Ok(Err(SkipReason::Extract(extract.stderr_trimmed().to_string())));
        }

        self.import_keys(&build_dir)?;

        let build = Cmd::as_user(&self.user.name, "makepkg")
            .args(["--clean", "--cleanbuild", "--force", "--noconfirm", "--syncdeps"])
            .dir(&build_dir)
            .stream(self.verbose)
            .allow_fail()
            .run_with(self.runner)?;
        if !build.success() {
            if !build.stderr.is_empty() {
                log::error!("{}", build.stderr_trimmed());
            }
            self.cleanup(&archive, &build_dir);
            return Ok(Err(SkipReason::Build(build.code())));
        }

        let produced = find_package_files(&build_dir)?;
        if produced.is_empty() {
            self.cleanup(&archive, &build_dir);
            return Ok(Err(SkipReason::NoArtifact));
        }

        let mut moved = Vec::new();
        for file in produced {
            let Some(name) = file.file_name() else { continue };
            let target = self.repo_cache.join(name);
            if let Err(e) = move_file(&file, &target) {
                self.discard(&moved);
                self.cleanup(&archive, &build_dir);
                return Ok(Err(SkipReason::Relocate(e.to_string())));
            }
            moved.push(target.clone());

            let chown = Cmd::new("chown")
                .arg("root:root")
                .arg_path(&target)
                .allow_fail()
                .run_with(self.runner)?;
            if !chown.success() {
                self.discard(&moved);
                self.cleanup(&archive, &build_dir);
                return Ok(Err(SkipReason::Relocate(format!(
                    "chown {}: {}",
                    target.display(),
                    chown.stderr_trimmed()
                ))));
            }
            log::info!("Added {} to the repository", target.display());
        }

        self.cleanup(&archive, &build_dir);
        Ok(Ok(moved))
    }

    fn fetch(&self, package: &str, archive: &Path) -> Result<std::result::Result<(), SkipReason>> {
        let url = self.snapshot_url_for(package);
        let fetch = Cmd::new("curl")
            .args(["-fsSL", "-o"])
            .arg_path(archive)
            .arg(&url)
            .allow_fail()
            .run_with(self.runner)?;
        if !fetch.success() {
            return Ok(Err(SkipReason::Fetch(format!(
                "{} ({})",
                url,
                fetch.stderr_trimmed()
            ))));
        }

        let chown = Cmd::new("chown")
            .arg(&self.user.name)
            .arg_path(archive)
            .allow_fail()
            .run_with(self.runner)?;
        if !chown.success() {
            return Ok(Err(SkipReason::Fetch(format!(
                "could not hand {} to {}: {}",
                archive.display(),
                self.user.name,
                chown.stderr_trimmed()
            ))));
        }
        Ok(Ok(()))
    }

    /// Import the PKGBUILD's signing keys into the build user's keyring.
    fn import_keys(&self, build_dir: &Path) -> Result<()> {
        let pkgbuild = build_dir.join("PKGBUILD");
        let Ok(text) = fs::read_to_string(&pkgbuild) else {
            log::warn!("No readable PKGBUILD at {}", pkgbuild.display());
            return Ok(());
        };

        for key in extract_pgp_keys(&text) {
            log::info!("Adding GPG key {} for {}", key, self.user.name);
            let recv = Cmd::as_user(&self.user.name, "gpg")
                .arg("--recv-keys")
                .arg(&key)
                .allow_fail()
                .run_with(self.runner)?;
            if !recv.success() {
                log::warn!("Could not import GPG key {}: {}", key, recv.stderr_trimmed());
            }
        }
        Ok(())
    }

    /// Drop a partially relocated package so it is not mistaken for cached.
    fn discard(&self, moved: &[PathBuf]) {
        for file in moved {
            let _ = fs::remove_file(file);
        }
    }

    fn cleanup(&self, archive: &Path, build_dir: &Path) {
        let _ = fs::remove_dir_all(build_dir);
        let _ = fs::remove_file(archive);
    }
}

fn pgp_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)validpgpkeys\s*=\s*\(([^)]*)\)").expect("validpgpkeys pattern")
    })
}

fn fingerprint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9A-Fa-f]{40}\b").expect("fingerprint pattern"))
}

/// Fingerprints declared in `validpgpkeys=(...)`, in order, without duplicates.
pub fn extract_pgp_keys(pkgbuild: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for block in pgp_block_re().captures_iter(pkgbuild) {
        for m in fingerprint_re().find_iter(&block[1]) {
            let key = m.as_str().to_uppercase();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn is_package_file(name: &str) -> bool {
    PACKAGE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Package files directly inside `dir`, sorted.
pub fn find_package_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(is_package_file)
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// `name-pkgver-pkgrel-arch.pkg.tar.*` → `name`.
pub fn package_name_from_file(file_name: &str) -> Option<&str> {
    let stem = PACKAGE_SUFFIXES
        .iter()
        .find_map(|s| file_name.strip_suffix(s))?;
    let mut cut = stem;
    for _ in 0..3 {
        cut = &cut[..cut.rfind('-')?];
    }
    (!cut.is_empty()).then_some(cut)
}

/// Cached package files belonging to `package`.
pub fn cached_packages(repo_cache: &Path, package: &str) -> Result<Vec<PathBuf>> {
    Ok(find_package_files(repo_cache)?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(package_name_from_file)
                == Some(package)
        })
        .collect())
}
