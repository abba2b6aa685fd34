//! Sync-time pacman configuration.
//!
//! Produces `pacman.sync.conf` in the build directory, either by copying the
//! host configuration or by resolving mirrors for a region from the Arch
//! mirror status directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::config::{HostPaths, MirrorMode};
use crate::environment::BuildLayout;
use crate::error::OfflineError;
use crate::pacman_conf::{PacmanConf, Section, UPSTREAM_REPOS};
use crate::process::{Cmd, CommandRunner};
use crate::prompt::Prompt;

/// Suffix appended to a mirror base URL to form a pacman `Server` entry.
const REPO_PATH: &str = "$repo/os/$arch";

/// The `urls` array of `https://archlinux.org/mirrors/status/json/`.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorStatus {
    #[serde(default)]
    pub urls: Vec<MirrorUrl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorUrl {
    pub url: String,
    pub protocol: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub active: bool,
}

impl MirrorStatus {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse mirror status JSON")
    }

    fn usable(&self) -> impl Iterator<Item = &MirrorUrl> {
        self.urls
            .iter()
            .filter(|m| m.active && matches!(m.protocol.as_str(), "http" | "https"))
    }

    /// Sorted, de-duplicated list of country names with usable mirrors.
    pub fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self
            .usable()
            .map(|m| m.country.clone())
            .filter(|c| !c.is_empty())
            .collect();
        regions.sort();
        regions.dedup();
        regions
    }

    /// Server entries for a region, matched by country name or code.
    pub fn servers_for(&self, region: &str) -> Vec<String> {
        self.usable()
            .filter(|m| {
                m.country.eq_ignore_ascii_case(region) || m.country_code.eq_ignore_ascii_case(region)
            })
            .map(|m| {
                let base = if m.url.ends_with('/') {
                    m.url.clone()
                } else {
                    format!("{}/", m.url)
                };
                format!("{}{}", base, REPO_PATH)
            })
            .collect()
    }
}

/// Source of the mirror directory.
pub trait MirrorSource {
    fn mirror_status(&self) -> Result<MirrorStatus>;
}

/// Fetches the mirror directory with curl.
pub struct RemoteMirrorStatus<'a> {
    runner: &'a dyn CommandRunner,
    url: String,
}

impl<'a> RemoteMirrorStatus<'a> {
    pub fn new(runner: &'a dyn CommandRunner, url: &str) -> Self {
        Self {
            runner,
            url: url.to_string(),
        }
    }
}

impl MirrorSource for RemoteMirrorStatus<'_> {
    fn mirror_status(&self) -> Result<MirrorStatus> {
        let result = Cmd::new("curl")
            .arg("-fsSL")
            .arg(&self.url)
            .allow_fail()
            .run_with(self.runner)?;
        if !result.success() {
            return Err(OfflineError::Fetch {
                url: self.url.clone(),
                reason: result.stderr_trimmed().to_string(),
            }
            .into());
        }
        MirrorStatus::parse(&result.stdout)
    }
}

pub struct MirrorResolver<'a> {
    layout: &'a BuildLayout,
    host: &'a HostPaths,
    source: &'a dyn MirrorSource,
    prompt: &'a dyn Prompt,
}

impl<'a> MirrorResolver<'a> {
    pub fn new(
        layout: &'a BuildLayout,
        host: &'a HostPaths,
        source: &'a dyn MirrorSource,
        prompt: &'a dyn Prompt,
    ) -> Self {
        Self {
            layout,
            host,
            source,
            prompt,
        }
    }

    /// Write the sync-time config for `mode`. Returns the servers used
    /// (empty when the host config or a local mirror is used).
    pub fn resolve(&self, mode: &MirrorMode) -> Result<Vec<String>> {
        let (text, servers) = match mode {
            MirrorMode::Copy => (self.copy_host_config()?, Vec::new()),
            MirrorMode::Region(region) => {
                let servers = self.region_servers(region.as_deref())?;
                (self.generate(&servers).render(), servers)
            }
            MirrorMode::Server(url) => {
                let servers = vec![url.clone()];
                (self.generate(&servers).render(), servers)
            }
            MirrorMode::Local(path) => (self.local_mirror(path).render(), Vec::new()),
        };

        let target = self.layout.sync_conf();
        log::info!("Writing sync configuration {}", target.display());
        fs::write(&target, text)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(servers)
    }

    fn region_servers(&self, region: Option<&str>) -> Result<Vec<String>> {
        log::info!("Getting mirror list from the mirror directory");
        let status = self.source.mirror_status()?;

        let region = match region {
            Some(r) => r.to_string(),
            None => self
                .prompt
                .select_region(&status.regions())?
                .ok_or_else(|| {
                    OfflineError::Requirement(
                        "A mirror region is required (use --mirrors=<region>)".to_string(),
                    )
                })?,
        };

        let servers = status.servers_for(&region);
        if servers.is_empty() {
            return Err(OfflineError::Requirement(format!(
                "No active HTTP(S) mirrors found for region '{}'",
                region
            ))
            .into());
        }
        log::info!("Resolved {} mirrors for {}", servers.len(), region);
        Ok(servers)
    }

    fn options(&self) -> Section {
        Section::options(&self.layout.tmp_db(), &self.layout.repo_cache())
    }

    fn generate(&self, servers: &[String]) -> PacmanConf {
        let mut conf = PacmanConf::new();
        conf.push(self.options());
        for repo in UPSTREAM_REPOS {
            conf.push(Section::servers(repo, servers));
        }
        conf
    }

    fn local_mirror(&self, path: &Path) -> PacmanConf {
        let mut conf = PacmanConf::new();
        conf.push(self.options());
        conf.push(Section::local_repo("localrepo", &path.display().to_string()));
        for repo in UPSTREAM_REPOS {
            conf.push(Section::include(repo, "/etc/pacman.d/mirrorlist"));
        }
        conf
    }

    fn copy_host_config(&self) -> Result<String> {
        let host_conf = &self.host.pacman_conf;
        let text = fs::read_to_string(host_conf)
            .with_context(|| format!("Failed to read {}", host_conf.display()))?;
        Ok(rewrite_path_directives(
            &text,
            &self.layout.tmp_db(),
            &self.layout.repo_cache(),
        ))
    }
}

/// Point `DBPath` and `CacheDir` (active or commented out) into the build
/// directory. Every other line is copied verbatim; nothing is added when
/// the directives are absent.
pub fn rewrite_path_directives(text: &str, db_path: &Path, cache_dir: &Path) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        match directive_key(line) {
            Some("DBPath") => out.push_str(&format!("DBPath      = {}", db_path.display())),
            Some("CacheDir") => out.push_str(&format!("CacheDir    = {}", cache_dir.display())),
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn directive_key(line: &str) -> Option<&'static str> {
    let body = line.trim_start().trim_start_matches('#').trim_start();
    for key in ["DBPath", "CacheDir"] {
        if let Some(rest) = body.strip_prefix(key) {
            if rest.trim_start().starts_with('=') {
                return Some(key);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"{
        "urls": [
            {"url": "https://ftp.lysator.liu.se/pub/archlinux/", "protocol": "https", "country": "Sweden", "country_code": "SE", "active": true},
            {"url": "http://ftp.acc.umu.se/mirror/archlinux", "protocol": "http", "country": "Sweden", "country_code": "SE", "active": true},
            {"url": "rsync://ftp.acc.umu.se/mirror/archlinux/", "protocol": "rsync", "country": "Sweden", "country_code": "SE", "active": true},
            {"url": "https://dead.example.se/arch/", "protocol": "https", "country": "Sweden", "country_code": "SE", "active": false},
            {"url": "https://mirror.example.de/arch/", "protocol": "https", "country": "Germany", "country_code": "DE", "active": true}
        ]
    }"#;

    #[test]
    fn test_servers_for_region_filters_protocol_and_activity() {
        let status = MirrorStatus::parse(STATUS).unwrap();
        assert_eq!(
            status.servers_for("sweden"),
            vec![
                "https://ftp.lysator.liu.se/pub/archlinux/$repo/os/$arch",
                "http://ftp.acc.umu.se/mirror/archlinux/$repo/os/$arch",
            ]
        );
        assert_eq!(status.servers_for("DE").len(), 1);
        assert!(status.servers_for("Narnia").is_empty());
    }

    #[test]
    fn test_regions_sorted_unique() {
        let status = MirrorStatus::parse(STATUS).unwrap();
        assert_eq!(status.regions(), vec!["Germany", "Sweden"]);
    }

    #[test]
    fn test_rewrite_path_directives() {
        let host = "[options]\n#RootDir     = /\n#DBPath      = /var/lib/pacman/\nCacheDir = /var/cache/pacman/pkg/\nHoldPkg = pacman\n# CacheDir is documented here\n";
        let out = rewrite_path_directives(host, Path::new("/b/tmp.pacdb"), Path::new("/b/cache"));
        assert_eq!(
            out,
            "[options]\n#RootDir     = /\nDBPath      = /b/tmp.pacdb\nCacheDir    = /b/cache\nHoldPkg = pacman\n# CacheDir is documented here\n"
        );
    }

    #[test]
    fn test_rewrite_without_directives_injects_nothing() {
        let host = "[options]\nHoldPkg = pacman\n\n[core]\nInclude = /etc/pacman.d/mirrorlist\n";
        let out = rewrite_path_directives(host, Path::new("/b/db"), Path::new("/b/cache"));
        assert_eq!(out, host);
    }
}
