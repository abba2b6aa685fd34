//! Host tool availability checks.

use crate::config::Config;
use crate::process;
use crate::qemu;

use super::types::{CheckResult, CheckStatus};

/// Tools this configuration cannot build without, with package hints.
pub fn required_tools(config: &Config) -> Vec<(&'static str, &'static str, &'static str)> {
    let mut tools = vec![
        ("pacman", "pacman", "Required to download packages"),
        ("repo-add", "pacman", "Required to index the local repository"),
        ("mkarchiso", "archiso", "Required to build the ISO"),
        ("curl", "curl", "Required to fetch mirror lists and snapshots"),
        ("tar", "tar", "Required to unpack AUR snapshots"),
    ];

    if config.wants_git() {
        tools.push(("git", "git", "Required for archinstall and git resources"));
    }

    if config.wants_source_builds() {
        tools.extend([
            ("makepkg", "pacman", "Required to build AUR packages"),
            ("sudo", "sudo", "Required to build as the sandbox user"),
            ("gpg", "gnupg", "Required to import PKGBUILD signing keys"),
            ("useradd", "shadow", "Required to create the sandbox user"),
            ("userdel", "shadow", "Required to remove the sandbox user"),
            ("pkill", "procps-ng", "Required to stop sandbox user processes"),
            ("chown", "coreutils", "Required to hand files to the sandbox user"),
        ]);
    }

    tools
}

/// Check host tools are installed. Also returns the missing required ones.
pub fn check_host_tools(config: &Config) -> (Vec<CheckResult>, Vec<String>) {
    let mut results = Vec::new();
    let mut missing = Vec::new();

    for (tool, package, purpose) in required_tools(config) {
        let result = check_tool_exists(tool, package, purpose, true);
        if result.status == CheckStatus::Fail {
            missing.push(tool.to_string());
        }
        results.push(result);
    }

    let optional_tools = [
        ("qemu-system-x86_64", "qemu-full", "Required for `archoffline run`"),
        ("qemu-img", "qemu-img", "Required for the test disk"),
    ];

    for (tool, package, purpose) in optional_tools {
        results.push(check_tool_exists(tool, package, purpose, false));
    }

    if let Some(path) = qemu::find_ovmf() {
        results.push(CheckResult::pass_with("OVMF firmware", &path.display().to_string()));
    } else {
        results.push(CheckResult::warn(
            "OVMF firmware",
            "Not found. `archoffline run` requires UEFI. Install the edk2-ovmf package.",
        ));
    }

    (results, missing)
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
