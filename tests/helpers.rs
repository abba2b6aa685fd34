//! Shared test utilities for archoffline tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tempfile::TempDir;

use archoffline::config::{Config, HostPaths, MirrorMode};
use archoffline::mirrors::{MirrorSource, MirrorStatus};
use archoffline::packages::PackageIndex;
use archoffline::process::{Cmd, CommandResult, CommandRunner};
use archoffline::prompt::Prompt;

pub const TEMPLATE_PACKAGES: &str = "# Base system\nbase\nlinux\n\narchiso\n";

pub const TEMPLATE_PACMAN_CONF: &str = "\
[options]
HoldPkg     = pacman glibc
Architecture = auto
ParallelDownloads = 5
SigLevel    = Required DatabaseOptional

[core]
Include = /etc/pacman.d/mirrorlist

[extra]
Include = /etc/pacman.d/mirrorlist
";

pub const MIRROR_STATUS: &str = r#"{
    "urls": [
        {"url": "https://ftp.lysator.liu.se/pub/archlinux/", "protocol": "https", "country": "Sweden", "country_code": "SE", "active": true},
        {"url": "https://mirror.osbeck.com/archlinux/", "protocol": "https", "country": "Sweden", "country_code": "SE", "active": true},
        {"url": "rsync://ftp.acc.umu.se/mirror/archlinux/", "protocol": "rsync", "country": "Sweden", "country_code": "SE", "active": true},
        {"url": "https://mirror.example.de/arch/", "protocol": "https", "country": "Germany", "country_code": "DE", "active": true}
    ]
}"#;

/// Temporary host: archiso template, sudoers, home root, host pacman.conf.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    /// Stand-in for `/usr/share/archiso/configs`.
    pub configs: PathBuf,
    pub build_dir: PathBuf,
    pub host: HostPaths,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let configs = root.join("configs");
        let releng = configs.join("releng");
        let units = releng.join("airootfs/etc/systemd/system");
        fs::create_dir_all(units.join("reflector.service.d")).unwrap();
        fs::create_dir_all(units.join("multi-user.target.wants")).unwrap();
        fs::write(units.join("reflector.service.d/archiso.conf"), "[Service]\n").unwrap();
        fs::write(
            units.join("multi-user.target.wants/reflector.service"),
            "[Unit]\n",
        )
        .unwrap();
        fs::write(releng.join("packages.x86_64"), TEMPLATE_PACKAGES).unwrap();
        fs::write(releng.join("pacman.conf"), TEMPLATE_PACMAN_CONF).unwrap();
        fs::write(releng.join("profiledef.sh"), "iso_name=\"archlinux\"\n").unwrap();

        let etc = root.join("etc");
        fs::create_dir_all(etc.join("sudoers.d")).unwrap();
        fs::write(etc.join("sudoers"), "root ALL=(ALL:ALL) ALL\n").unwrap();
        fs::write(
            etc.join("pacman.conf"),
            "[options]\n#DBPath      = /var/lib/pacman/\n#CacheDir    = /var/cache/pacman/pkg/\nHoldPkg = pacman\n\n[core]\nInclude = /etc/pacman.d/mirrorlist\n",
        )
        .unwrap();
        fs::create_dir_all(root.join("home")).unwrap();

        let host = HostPaths {
            sudoers: etc.join("sudoers"),
            sudoers_d: etc.join("sudoers.d"),
            home_root: root.join("home"),
            pacman_conf: etc.join("pacman.conf"),
            archiso_configs: configs.clone(),
            cache_stash: root.join("stash"),
        };

        Self {
            _temp_dir: temp_dir,
            build_dir: root.join("build"),
            root,
            configs,
            host,
        }
    }

    /// Defaults pointed at this environment, Sweden mirrors.
    pub fn config(&self) -> Config {
        let mut config = Config::from_vars(&HashMap::new());
        config.set_build_dir(&self.build_dir);
        config.host = self.host.clone();
        config.mirrors = MirrorMode::Region(Some("Sweden".to_string()));
        config
    }
}

/// One recorded command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl Invocation {
    pub fn line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Runs `tool`, directly or through `sudo -u`.
    pub fn runs(&self, tool: &str) -> bool {
        self.program == tool || (self.program == "sudo" && self.args.get(3).map(String::as_str) == Some(tool))
    }

    /// Argument following `flag`.
    pub fn after(&self, flag: &str) -> Option<&str> {
        let pos = self.args.iter().position(|a| a == flag)?;
        self.args.get(pos + 1).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// The program could not be started at all.
    pub spawn_error: bool,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Self {
            code,
            stderr: stderr.to_string(),
            ..Self::default()
        }
    }

    pub fn not_found() -> Self {
        Self {
            spawn_error: true,
            ..Self::default()
        }
    }
}

type Handler = Box<dyn Fn(&Invocation) -> Option<Reply>>;

/// Records every command and answers from handlers; unmatched commands
/// succeed with no output.
pub struct ScriptedRunner {
    calls: RefCell<Vec<Invocation>>,
    handlers: Vec<Handler>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            handlers: Vec::new(),
        }
    }

    /// A host where builds succeed: tar unpacks a PKGBUILD, makepkg leaves
    /// a package file, mkarchiso writes an ISO. Handlers added later are
    /// consulted first.
    pub fn happy_host() -> Self {
        Self::new()
            .on(|inv| {
                if !inv.runs("tar") {
                    return None;
                }
                let dir = PathBuf::from(inv.after("--directory")?);
                let archive = inv.after("-xzf")?;
                let name = Path::new(archive)
                    .file_name()?
                    .to_str()?
                    .strip_suffix(".tar.gz")?
                    .to_string();
                fs::create_dir_all(dir.join(&name)).unwrap();
                fs::write(dir.join(&name).join("PKGBUILD"), format!("pkgname={}\n", name)).unwrap();
                Some(Reply::ok())
            })
            .on(|inv| {
                if !inv.runs("makepkg") {
                    return None;
                }
                let dir = inv.dir.clone()?;
                let name = dir.file_name()?.to_str()?.to_string();
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join(format!("{}-1.0-1-x86_64.pkg.tar.zst", name)), "pkg").unwrap();
                Some(Reply::ok())
            })
            .on(|inv| {
                if inv.program != "mkarchiso" {
                    return None;
                }
                let out = PathBuf::from(inv.after("-o")?);
                fs::create_dir_all(&out).unwrap();
                fs::write(out.join("archlinux-2026.10.16-x86_64.iso"), "iso").unwrap();
                Some(Reply::ok())
            })
    }

    pub fn on(mut self, handler: impl Fn(&Invocation) -> Option<Reply> + 'static) -> Self {
        self.handlers.insert(0, Box::new(handler));
        self
    }

    /// Fail every invocation of `tool` with `code`.
    pub fn failing(self, tool: &'static str, code: i32) -> Self {
        self.on(move |inv| inv.runs(tool).then(|| Reply::fail(code, &format!("{} failed", tool))))
    }

    /// Make every invocation of `tool` fail to start.
    pub fn unstartable(self, tool: &'static str) -> Self {
        self.on(move |inv| inv.runs(tool).then(Reply::not_found))
    }

    /// Report `user` as absent from the account database.
    pub fn without_user(self, user: &'static str) -> Self {
        self.on(move |inv| {
            (inv.program == "id" && inv.args.first().map(String::as_str) == Some(user))
                .then(|| Reply::fail(1, &format!("id: '{}': no such user", user)))
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Invocation::line).collect()
    }

    /// Index of the first call running `tool`.
    pub fn position(&self, tool: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|c| c.runs(tool))
    }

    pub fn ran(&self, tool: &str) -> bool {
        self.position(tool).is_some()
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, cmd: &Cmd) -> anyhow::Result<CommandResult> {
        let invocation = Invocation {
            program: cmd.program().to_string(),
            args: cmd.get_args().to_vec(),
            dir: cmd.current_dir().map(Path::to_path_buf),
        };
        let reply = self
            .handlers
            .iter()
            .find_map(|h| h(&invocation))
            .unwrap_or_default();
        self.calls.borrow_mut().push(invocation);

        if reply.spawn_error {
            anyhow::bail!("Failed to execute '{}'. Is it installed?", cmd.program());
        }
        Ok(CommandResult {
            status: ExitStatus::from_raw(reply.code << 8),
            stdout: reply.stdout,
            stderr: reply.stderr,
        })
    }
}

/// Answers prompts from fixed values.
#[derive(Default)]
pub struct FakePrompt {
    pub region: Option<String>,
    pub answer: String,
    pub pauses: RefCell<Vec<String>>,
}

impl Prompt for FakePrompt {
    fn select_region(&self, regions: &[String]) -> anyhow::Result<Option<String>> {
        Ok(self.region.clone().filter(|r| regions.contains(r)))
    }

    fn ask(&self, _question: &str) -> anyhow::Result<String> {
        Ok(self.answer.clone())
    }

    fn pause(&self, label: &str) -> anyhow::Result<()> {
        self.pauses.borrow_mut().push(label.to_string());
        Ok(())
    }
}

pub struct FixtureMirrors;

impl MirrorSource for FixtureMirrors {
    fn mirror_status(&self) -> anyhow::Result<MirrorStatus> {
        MirrorStatus::parse(MIRROR_STATUS)
    }
}

/// Knows every package except the listed ones.
#[derive(Default)]
pub struct FixtureIndex {
    pub unknown: Vec<String>,
}

impl PackageIndex for FixtureIndex {
    fn unknown(&self, names: &[String]) -> anyhow::Result<Vec<String>> {
        Ok(names
            .iter()
            .filter(|n| self.unknown.contains(n))
            .cloned()
            .collect())
    }
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a file contains a specific string.
pub fn assert_file_contains(path: &Path, content: &str) {
    let file_content = fs::read_to_string(path)
        .unwrap_or_else(|_| panic!("Failed to read file: {}", path.display()));
    assert!(
        file_content.contains(content),
        "File {} does not contain '{}'\nActual content:\n{}",
        path.display(),
        content,
        file_content
    );
}

/// Every regular file under `dir`, relative paths, sorted.
pub fn tree(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(dir).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}
