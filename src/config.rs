//! Configuration management for archoffline.
//!
//! Defaults come from environment variables (a `.env` file is loaded into
//! the environment by `main` via dotenvy). CLI flags are applied on top by
//! the `build` command. The resulting [`Config`] is passed explicitly to
//! every pipeline component.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BUILD_DIR: &str = "./archiso_offline/";
pub const DEFAULT_REPO_NAME: &str = "localrepo";
pub const DEFAULT_TEMPLATE: &str = "releng";
pub const DEFAULT_AUR_USER: &str = "aoffline_usr";
pub const DEFAULT_MIRROR_STATUS_URL: &str = "https://archlinux.org/mirrors/status/json/";
pub const DEFAULT_AUR_SNAPSHOT_URL: &str = "https://aur.archlinux.org/cgit/aur.git/snapshot";
pub const DEFAULT_ARCHINSTALL_GIT_URL: &str = "https://github.com/archlinux/archinstall.git";
pub const DEFAULT_AI_BRANCH: &str = "master";

/// Where the sync-time pacman configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorMode {
    /// Copy the host pacman.conf, redirecting DBPath/CacheDir.
    Copy,
    /// Resolve mirrors for a region; `None` prompts for one.
    Region(Option<String>),
    /// A single hard-coded repository server.
    Server(String),
    /// A locally stored mirror (`file://` URL or absolute path).
    Local(PathBuf),
}

impl MirrorMode {
    /// Interpret the `--mirrors` value.
    pub fn parse(value: Option<&str>) -> Self {
        let value = match value.map(str::trim) {
            None | Some("") => return MirrorMode::Region(None),
            Some(v) => v,
        };

        if value == "copy" {
            MirrorMode::Copy
        } else if let Some(path) = value.strip_prefix("file://") {
            MirrorMode::Local(PathBuf::from(path))
        } else if value.starts_with('/') {
            MirrorMode::Local(PathBuf::from(value))
        } else if value.starts_with("https://") || value.starts_with("http://") {
            MirrorMode::Server(value.to_string())
        } else {
            MirrorMode::Region(Some(value.to_string()))
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, MirrorMode::Copy)
    }
}

/// Host-global locations the pipeline reads or mutates.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub sudoers: PathBuf,
    pub sudoers_d: PathBuf,
    /// Parent of user home directories.
    pub home_root: PathBuf,
    pub pacman_conf: PathBuf,
    /// Directory holding archiso templates (`releng`, `baseline`, ...).
    pub archiso_configs: PathBuf,
    /// Where `--save-cache` parks the repository cache during a reset.
    pub cache_stash: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sudoers: PathBuf::from("/etc/sudoers"),
            sudoers_d: PathBuf::from("/etc/sudoers.d"),
            home_root: PathBuf::from("/home"),
            pacman_conf: PathBuf::from("/etc/pacman.conf"),
            archiso_configs: PathBuf::from("/usr/share/archiso/configs"),
            cache_stash: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("archoffline"),
        }
    }
}

impl HostPaths {
    pub fn home_of(&self, user: &str) -> PathBuf {
        self.home_root.join(user)
    }
}

/// archoffline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute build directory.
    pub build_dir: PathBuf,
    /// Name of the repository embedded in the image.
    pub repo_name: String,
    /// archiso template to adapt.
    pub template: String,
    pub mirrors: MirrorMode,
    /// Packages added on top of the template's package list.
    pub packages: Vec<String>,
    /// AUR packages built from source.
    pub aur_packages: Vec<String>,
    /// Sandbox account used for AUR builds.
    pub aur_user: String,
    pub rebuild: bool,
    pub save_cache: bool,
    pub breakpoint: bool,
    pub verbose: bool,
    pub boot: bool,
    /// Ask for missing inputs on the terminal.
    pub interactive: bool,
    /// Check package names against the package index.
    pub validate_packages: bool,
    pub archinstall: bool,
    pub ai_branch: String,
    pub profiles: Vec<PathBuf>,
    pub resources: Vec<String>,
    pub customize: Option<PathBuf>,
    pub autorun: Option<String>,
    pub mirror_status_url: String,
    pub aur_snapshot_url: String,
    pub archinstall_git_url: String,
    pub host: HostPaths,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from a set of variables, falling back to defaults.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| -> String {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let mut host = HostPaths::default();
        if let Some(dir) = vars.get("ARCHOFFLINE_ARCHISO_CONFIGS") {
            host.archiso_configs = PathBuf::from(dir);
        }

        let validate_packages = vars
            .get("ARCHOFFLINE_VALIDATE_PACKAGES")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Self {
            build_dir: absolute(Path::new(&get("ARCHOFFLINE_BUILD_DIR", DEFAULT_BUILD_DIR))),
            repo_name: get("ARCHOFFLINE_REPO", DEFAULT_REPO_NAME),
            template: get("ARCHOFFLINE_TEMPLATE", DEFAULT_TEMPLATE),
            mirrors: MirrorMode::parse(vars.get("ARCHOFFLINE_MIRRORS").map(String::as_str)),
            packages: Vec::new(),
            aur_packages: Vec::new(),
            aur_user: get("ARCHOFFLINE_AUR_USER", DEFAULT_AUR_USER),
            rebuild: false,
            save_cache: false,
            breakpoint: false,
            verbose: false,
            boot: false,
            interactive: false,
            validate_packages,
            archinstall: false,
            ai_branch: DEFAULT_AI_BRANCH.to_string(),
            profiles: Vec::new(),
            resources: Vec::new(),
            customize: None,
            autorun: None,
            mirror_status_url: get("ARCHOFFLINE_MIRROR_STATUS_URL", DEFAULT_MIRROR_STATUS_URL),
            aur_snapshot_url: get("ARCHOFFLINE_AUR_SNAPSHOT_URL", DEFAULT_AUR_SNAPSHOT_URL),
            archinstall_git_url: DEFAULT_ARCHINSTALL_GIT_URL.to_string(),
            host,
        }
    }

    /// Override the build directory (made absolute).
    pub fn set_build_dir(&mut self, dir: &Path) {
        self.build_dir = absolute(dir);
    }

    /// Whether the run needs the AUR sandbox.
    pub fn wants_source_builds(&self) -> bool {
        !self.aur_packages.is_empty()
    }

    /// Whether any step will call git.
    pub fn wants_git(&self) -> bool {
        self.archinstall
            || !self.profiles.is_empty()
            || self
                .resources
                .iter()
                .any(|r| r.starts_with("git://") || r.ends_with(".git"))
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  BUILD_DIR:          {}", self.build_dir.display());
        println!("  REPO:               {}", self.repo_name);
        println!("  TEMPLATE:           {}", self.template);
        println!("  MIRRORS:            {:?}", self.mirrors);
        println!("  AUR_USER:           {}", self.aur_user);
        println!("  VALIDATE_PACKAGES:  {}", self.validate_packages);
        println!("  MIRROR_STATUS_URL:  {}", self.mirror_status_url);
        println!("  AUR_SNAPSHOT_URL:   {}", self.aur_snapshot_url);
        println!("  ARCHISO_CONFIGS:    {}", self.host.archiso_configs.display());
        let template = self.host.archiso_configs.join(&self.template);
        if template.is_dir() {
            println!("  Template: FOUND ({})", template.display());
        } else {
            println!("  Template: NOT FOUND (install archiso)");
        }
    }
}

/// Split a space separated package argument.
pub fn split_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Split a `;` separated resource list, dropping empty entries.
pub fn split_resources(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a `,` separated profile list, dropping empty entries.
pub fn split_profiles(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path.strip_prefix("./").unwrap_or(path)),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_mirror_mode_parse() {
        assert_eq!(MirrorMode::parse(None), MirrorMode::Region(None));
        assert_eq!(MirrorMode::parse(Some("  ")), MirrorMode::Region(None));
        assert_eq!(MirrorMode::parse(Some("copy")), MirrorMode::Copy);
        assert_eq!(
            MirrorMode::parse(Some("Sweden")),
            MirrorMode::Region(Some("Sweden".into()))
        );
        assert_eq!(
            MirrorMode::parse(Some("file:///srv/mirror")),
            MirrorMode::Local(PathBuf::from("/srv/mirror"))
        );
        assert_eq!(
            MirrorMode::parse(Some("/srv/mirror")),
            MirrorMode::Local(PathBuf::from("/srv/mirror"))
        );
        assert_eq!(
            MirrorMode::parse(Some("https://mirror.example/$repo/os/$arch")),
            MirrorMode::Server("https://mirror.example/$repo/os/$arch".into())
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new());
        assert!(config.build_dir.is_absolute());
        assert!(config.build_dir.ends_with("archiso_offline"));
        assert_eq!(config.repo_name, "localrepo");
        assert_eq!(config.template, "releng");
        assert_eq!(config.aur_user, "aoffline_usr");
        assert!(config.validate_packages);
        assert_eq!(config.mirrors, MirrorMode::Region(None));
    }

    #[test]
    fn test_vars_override_defaults() {
        let mut vars = HashMap::new();
        vars.insert("ARCHOFFLINE_BUILD_DIR".into(), "/srv/iso".into());
        vars.insert("ARCHOFFLINE_REPO".into(), "offline".into());
        vars.insert("ARCHOFFLINE_VALIDATE_PACKAGES".into(), "0".into());
        vars.insert("ARCHOFFLINE_ARCHISO_CONFIGS".into(), "/opt/configs".into());

        let config = Config::from_vars(&vars);
        assert_eq!(config.build_dir, PathBuf::from("/srv/iso"));
        assert_eq!(config.repo_name, "offline");
        assert!(!config.validate_packages);
        assert_eq!(config.host.archiso_configs, PathBuf::from("/opt/configs"));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        std::env::set_var("ARCHOFFLINE_TEMPLATE", "baseline");
        let config = Config::load();
        std::env::remove_var("ARCHOFFLINE_TEMPLATE");
        assert_eq!(config.template, "baseline");
    }

    #[test]
    fn test_split_helpers() {
        assert_eq!(split_words(" nano  wget "), vec!["nano", "wget"]);
        assert_eq!(
            split_resources("https://a/b.txt;;/local/file ; "),
            vec!["https://a/b.txt", "/local/file"]
        );
        assert_eq!(
            split_profiles("a.py,,b.py"),
            vec![PathBuf::from("a.py"), PathBuf::from("b.py")]
        );
    }

    #[test]
    fn test_wants_git() {
        let mut config = Config::from_vars(&HashMap::new());
        assert!(!config.wants_git());
        config.resources = vec!["https://example.com/repo.git".into()];
        assert!(config.wants_git());
    }
}
