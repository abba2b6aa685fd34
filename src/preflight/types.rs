//! Preflight findings and the report printed before a build.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// The build cannot succeed.
    Fail,
    Warn,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "warn",
        }
    }
}

/// One host or build-directory finding.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(str::to_string),
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Warn, Some(details))
    }
}

/// Arch package providing a host tool, for the install hint.
pub fn providing_package(tool: &str) -> &str {
    match tool {
        "mkarchiso" => "archiso",
        "repo-add" | "makepkg" => "pacman",
        "gpg" => "gnupg",
        "useradd" | "userdel" => "shadow",
        "pkill" => "procps-ng",
        "chown" => "coreutils",
        "qemu-system-x86_64" => "qemu-full",
        other => other,
    }
}

pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
    /// Effective uid the checks ran as.
    pub uid: u32,
    /// Required tools not found in PATH.
    pub missing_tools: Vec<String>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// `pacman -S` line covering every missing tool, if any are missing.
    pub fn install_hint(&self) -> Option<String> {
        if self.missing_tools.is_empty() {
            return None;
        }
        let mut packages: Vec<&str> = Vec::new();
        for tool in &self.missing_tools {
            let package = providing_package(tool);
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
        Some(format!("pacman -S --needed {}", packages.join(" ")))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Host checks (uid {}):", self.uid);
        for check in &self.checks {
            let _ = write!(out, "  [{:>4}] {}", check.status.label(), check.name);
            match &check.details {
                Some(details) => {
                    let _ = writeln!(out, ": {}", details);
                }
                None => out.push('\n'),
            }
        }

        let _ = write!(
            out,
            "\n{} of {} checks passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        match (self.fail_count(), self.warn_count()) {
            (0, 0) => out.push('\n'),
            (0, w) => {
                let _ = writeln!(out, ", {} warning(s)", w);
            }
            (f, w) => {
                let _ = writeln!(out, "; {} failed, {} warning(s). The ISO build would not finish.", f, w);
            }
        }
        if let Some(hint) = self.install_hint() {
            let _ = writeln!(out, "Install missing tools with: {}", hint);
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
