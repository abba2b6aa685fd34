//! Build environment checks (privileges, template, build directory, disk space).

use std::path::Path;

use crate::config::Config;
use crate::packages::PACKAGES_FILE;
use crate::process::Cmd;

use super::types::CheckResult;

/// Effective uid of this process.
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// pacman, useradd and the sudoers drop-in all need root.
pub fn check_privilege(uid: u32) -> CheckResult {
    if uid == 0 {
        CheckResult::pass("root privileges")
    } else {
        CheckResult::fail(
            "root privileges",
            &format!("Running as uid {}. Re-run with sudo.", uid),
        )
    }
}

/// Check the template and build directory.
pub fn check_build_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let template = config.host.archiso_configs.join(&config.template);
    if !template.is_dir() {
        results.push(CheckResult::fail(
            "archiso template",
            &format!("{} not found. Install the archiso package.", template.display()),
        ));
    } else {
        for file in [PACKAGES_FILE, "pacman.conf", "profiledef.sh"] {
            let name = format!("{}/{}", config.template, file);
            if template.join(file).is_file() {
                results.push(CheckResult::pass(&name));
            } else {
                results.push(CheckResult::fail(&name, "Not found in template"));
            }
        }
    }

    let existing_ancestor = config
        .build_dir
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or(Path::new("/"));
    let metadata = std::fs::metadata(existing_ancestor);
    match metadata {
        Ok(m) if !m.permissions().readonly() => results.push(CheckResult::pass_with(
            "build directory",
            &config.build_dir.display().to_string(),
        )),
        Ok(_) => results.push(CheckResult::fail(
            "build directory",
            &format!("{} is read-only", existing_ancestor.display()),
        )),
        Err(e) => results.push(CheckResult::fail(
            "build directory",
            &format!("Cannot inspect {}: {}", existing_ancestor.display(), e),
        )),
    }

    // Use df command to avoid a statvfs binding
    if let Ok(result) = Cmd::new("df")
        .args(["--output=avail", "-B1"])
        .arg_path(existing_ancestor)
        .allow_fail()
        .run()
    {
        if result.success() {
            if let Some(free_gb) = parse_df_avail(&result.stdout) {
                results.push(check_disk_space(free_gb));
            }
        }
    }

    results
}

/// Free space below which a build with its embedded repository may not fit.
pub const MIN_FREE_GB: u64 = 10;

fn check_disk_space(free_gb: u64) -> CheckResult {
    if free_gb < MIN_FREE_GB {
        CheckResult::warn(
            "disk space",
            &format!(
                "{}GB free, an offline ISO with its repository needs at least {}GB",
                free_gb, MIN_FREE_GB
            ),
        )
    } else {
        CheckResult::pass_with("disk space", &format!("{}GB free", free_gb))
    }
}

/// Free gigabytes from `df --output=avail -B1` output.
fn parse_df_avail(stdout: &str) -> Option<u64> {
    let bytes: u64 = stdout.lines().nth(1)?.trim().parse().ok()?;
    Some(bytes / (1024 * 1024 * 1024))
}
