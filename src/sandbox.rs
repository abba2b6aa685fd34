//! Unprivileged build user for running untrusted AUR recipes.
//!
//! makepkg refuses to run as root, so builds run as a dedicated account
//! with a password-less sudo grant (needed for `--syncdeps`). Both the
//! account and the grant are created only when missing, and teardown
//! removes exactly what this run created.
//!
//! Grants are written as drop-in files under `/etc/sudoers.d/`. The
//! monolithic `/etc/sudoers` is only read: a grant found there counts as
//! pre-existing and is never modified.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::write_file_mode;
use crate::config::HostPaths;
use crate::error::OfflineError;
use crate::process::{Cmd, CommandRunner};

/// An account used for the duration of the source-build phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxUser {
    pub name: String,
    pub home: PathBuf,
    /// The account was created by this run.
    pub owned_account: bool,
    /// The sudo grant was created by this run.
    pub owned_grant: bool,
}

pub struct SandboxUserManager<'a> {
    runner: &'a dyn CommandRunner,
    host: &'a HostPaths,
}

impl<'a> SandboxUserManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, host: &'a HostPaths) -> Self {
        Self { runner, host }
    }

    /// Make sure the account and its grant exist.
    pub fn open(&self, username: &str) -> Result<SandboxUser> {
        let account_existed = self.ensure_user(username)?;
        let grant_existed = match self.ensure_sudo_grant(username) {
            Ok(existed) => existed,
            Err(e) => {
                if !account_existed {
                    let _ = self.teardown(username, true, false);
                }
                return Err(e);
            }
        };

        Ok(SandboxUser {
            name: username.to_string(),
            home: self.host.home_of(username),
            owned_account: !account_existed,
            owned_grant: !grant_existed,
        })
    }

    /// Undo [`open`](Self::open).
    pub fn close(&self, user: &SandboxUser) -> Result<()> {
        self.teardown(&user.name, user.owned_account, user.owned_grant)
    }

    /// Create the account if missing. Returns whether it already existed.
    pub fn ensure_user(&self, username: &str) -> Result<bool> {
        check_username(username)?;

        let exists = Cmd::new("id")
            .arg(username)
            .allow_fail()
            .run_with(self.runner)?
            .success();
        if exists {
            log::info!("Using existing build user {}", username);
            return Ok(true);
        }

        log::info!("Creating temporary build user {}", username);
        Cmd::new("useradd")
            .args(["-m", "-N", "-s", "/bin/bash", username])
            .error_msg(format!("Failed to create build user {}", username))
            .run_with(self.runner)?;
        Ok(false)
    }

    /// Where this tool writes its grant for `username`.
    pub fn grant_path(&self, username: &str) -> PathBuf {
        self.host.sudoers_d.join(format!("archoffline-{}", username))
    }

    /// Write a password-less grant unless one exists. Returns whether it
    /// already existed.
    pub fn ensure_sudo_grant(&self, username: &str) -> Result<bool> {
        check_username(username)?;

        if self.find_grant(username)?.is_some() {
            log::info!("Using existing sudo grant for {}", username);
            return Ok(true);
        }

        let path = self.grant_path(username);
        log::info!("Creating temporary sudo grant {}", path.display());
        write_file_mode(
            &path,
            format!(
                "# Temporary build grant, removed when the build finishes\n{} ALL=(ALL) NOPASSWD: ALL\n",
                username
            ),
            0o440,
        )?;
        Ok(false)
    }

    /// File holding an active password-less grant for `username`, if any.
    pub fn find_grant(&self, username: &str) -> Result<Option<PathBuf>> {
        let mut candidates = vec![self.host.sudoers.clone()];
        if self.host.sudoers_d.is_dir() {
            let mut drop_ins: Vec<PathBuf> = fs::read_dir(&self.host.sudoers_d)
                .with_context(|| format!("Failed to list {}", self.host.sudoers_d.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_active_drop_in(p))
                .collect();
            drop_ins.sort();
            candidates.extend(drop_ins);
        }

        for path in candidates {
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {}", path.display()))
                }
            };
            if content.lines().any(|line| grants_nopasswd_all(line, username)) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Remove what this run created and nothing else.
    pub fn teardown(&self, username: &str, owned_account: bool, owned_grant: bool) -> Result<()> {
        let mut failures = Vec::new();

        if owned_account {
            log::info!("Removing temporary build user {}", username);
            // gpg-agent and dirmngr outlive makepkg and keep the home busy
            let stop_agents = Cmd::as_user(username, "gpgconf")
                .args(["--kill", "all"])
                .allow_fail()
                .run_with(self.runner);
            if let Err(e) = stop_agents {
                failures.push(format!("gpgconf for {}: {:#}", username, e));
            }
            let kill = Cmd::new("pkill")
                .args(["-KILL", "-u", username])
                .allow_fail()
                .run_with(self.runner);
            if let Err(e) = kill {
                failures.push(format!("pkill for {}: {:#}", username, e));
            }

            match Cmd::new("userdel")
                .args(["--remove", username])
                .allow_fail()
                .run_with(self.runner)
            {
                Ok(userdel) if !userdel.success() => failures.push(format!(
                    "userdel {} exited with {}: {}",
                    username,
                    userdel.code(),
                    userdel.stderr_trimmed()
                )),
                Ok(_) => {}
                Err(e) => failures.push(format!("userdel {}: {:#}", username, e)),
            }

            let home = self.host.home_of(username);
            if home.exists() {
                if let Err(e) = fs::remove_dir_all(&home) {
                    failures.push(format!("failed to remove {}: {}", home.display(), e));
                }
            }
        }

        if owned_grant {
            let path = self.grant_path(username);
            log::info!("Removing temporary sudo grant {}", path.display());
            if let Err(e) = remove_if_present(&path) {
                failures.push(format!("failed to remove {}: {}", path.display(), e));
            }
        }

        if !failures.is_empty() {
            bail!("Sandbox teardown incomplete:\n  {}", failures.join("\n  "));
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// sudo skips drop-ins whose names contain a dot or end in `~`.
fn is_active_drop_in(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| !n.contains('.') && !n.ends_with('~'))
            .unwrap_or(false)
}

fn grants_nopasswd_all(line: &str, username: &str) -> bool {
    let line = line.trim();
    if line.starts_with('#') {
        return false;
    }
    if line.split_whitespace().next() != Some(username) {
        return false;
    }
    line.split("NOPASSWD:")
        .nth(1)
        .map(|rest| rest.trim() == "ALL")
        .unwrap_or(false)
}

fn check_username(username: &str) -> Result<()> {
    let mut chars = username.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    let valid_rest =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if !valid_start || !valid_rest || username.len() > 32 {
        return Err(OfflineError::Requirement(format!(
            "invalid build user name '{}'",
            username
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grants_nopasswd_all() {
        assert!(grants_nopasswd_all("builder ALL=(ALL) NOPASSWD: ALL", "builder"));
        assert!(grants_nopasswd_all("  builder ALL=(ALL:ALL) NOPASSWD:ALL  ", "builder"));
        assert!(!grants_nopasswd_all("# builder ALL=(ALL) NOPASSWD: ALL", "builder"));
        assert!(!grants_nopasswd_all("builder ALL=(ALL) ALL", "builder"));
        assert!(!grants_nopasswd_all("builder ALL=(ALL) NOPASSWD: /usr/bin/pacman", "builder"));
        assert!(!grants_nopasswd_all("builder2 ALL=(ALL) NOPASSWD: ALL", "builder"));
    }

    #[test]
    fn test_check_username() {
        assert!(check_username("aoffline_usr").is_ok());
        assert!(check_username("build-user2").is_ok());
        assert!(check_username("").is_err());
        assert!(check_username("Root").is_err());
        assert!(check_username("evil ALL=(ALL)").is_err());
        assert!(check_username("-x").is_err());
    }

    #[test]
    fn test_is_active_drop_in() {
        let tmp = tempfile::TempDir::new().unwrap();
        let good = tmp.path().join("archoffline-builder");
        let dotted = tmp.path().join("builder.conf");
        let backup = tmp.path().join("builder~");
        for p in [&good, &dotted, &backup] {
            fs::write(p, "").unwrap();
        }
        assert!(is_active_drop_in(&good));
        assert!(!is_active_drop_in(&dotted));
        assert!(!is_active_drop_in(&backup));
    }
}
