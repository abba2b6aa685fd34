//! Package lists: validation, concatenation and the `packages.x86_64` file.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::OfflineError;
use crate::process::{Cmd, CommandRunner};

/// Name of the archiso package list inside the build directory.
pub const PACKAGES_FILE: &str = "packages.x86_64";

/// Accepted package-name syntax: ASCII alphanumerics, `-` and `_`.
pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Something that knows which package names exist.
pub trait PackageIndex {
    /// Return the subset of `names` the index does not know.
    fn unknown(&self, names: &[String]) -> Result<Vec<String>>;
}

/// Ordered, validated list of package names.
///
/// Only replaced wholesale or extended by another listing, so a failed
/// assignment never leaves a partially applied state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageListing {
    names: Vec<String>,
}

impl PackageListing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing read from a template's package file.
    ///
    /// Template entries are taken as-is; only operator input goes through
    /// the name check (stock templates ship names like `memtest86+`).
    pub fn from_template(path: &Path) -> Result<Self> {
        Ok(Self {
            names: read_package_list(path)?,
        })
    }

    /// Replace the contents after checking every name's syntax.
    pub fn set<I, S>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        check_syntax(&values)?;
        self.names = values;
        Ok(())
    }

    /// Like [`set`](Self::set), and also reject names unknown to `index`.
    pub fn set_checked<I, S>(&mut self, values: I, index: &dyn PackageIndex) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        check_syntax(&values)?;

        if !values.is_empty() {
            let unknown = index.unknown(&values)?;
            if !unknown.is_empty() {
                return Err(OfflineError::Validation(format!(
                    "unknown package(s): {}",
                    unknown.join(", ")
                ))
                .into());
            }
        }

        self.names = values;
        Ok(())
    }

    /// Concatenate `other` after the current entries.
    pub fn append(&mut self, other: &PackageListing) {
        self.names.extend(other.names.iter().cloned());
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Serialize as a package list file: one name per line, no comments.
    pub fn to_file_contents(&self) -> String {
        let mut out = String::new();
        for name in &self.names {
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Write the package list file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_file_contents())
            .with_context(|| format!("Failed to write package list {}", path.display()))
    }
}

fn check_syntax(values: &[String]) -> Result<()> {
    let bad: Vec<&str> = values
        .iter()
        .filter(|v| !is_valid_package_name(v))
        .map(String::as_str)
        .collect();

    if !bad.is_empty() {
        return Err(OfflineError::Validation(format!(
            "invalid package name(s): {}",
            bad.iter()
                .map(|b| format!("{:?}", b))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .into());
    }
    Ok(())
}

/// Parse package list text, skipping `#` comments and blank lines.
pub fn parse_package_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read a package list file.
pub fn read_package_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read package list {}", path.display()))?;
    Ok(parse_package_list(&content))
}

/// Package index backed by pacman and the build's sync configuration.
///
/// Refreshes the temporary sync databases, then asks pacman to resolve
/// each name; pacman reports misses as `target not found: <name>`.
pub struct PacmanIndex<'a> {
    runner: &'a dyn CommandRunner,
    sync_conf: PathBuf,
}

impl<'a> PacmanIndex<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sync_conf: &Path) -> Self {
        Self {
            runner,
            sync_conf: sync_conf.to_path_buf(),
        }
    }
}

impl PackageIndex for PacmanIndex<'_> {
    fn unknown(&self, names: &[String]) -> Result<Vec<String>> {
        Cmd::new("pacman")
            .arg("--config")
            .arg_path(&self.sync_conf)
            .arg("-Sy")
            .error_msg("Failed to refresh package databases")
            .run_with(self.runner)?;

        let result = Cmd::new("pacman")
            .arg("--config")
            .arg_path(&self.sync_conf)
            .args(["-Sp", "--print-format", "%n"])
            .args(names)
            .allow_fail()
            .run_with(self.runner)?;

        if result.success() {
            return Ok(Vec::new());
        }

        let missing = parse_targets_not_found(&result.stderr);
        if missing.is_empty() {
            anyhow::bail!(
                "pacman could not resolve the package list (exit code {}):\n{}",
                result.code(),
                result.stderr_trimmed()
            );
        }
        Ok(missing)
    }
}

fn parse_targets_not_found(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .filter_map(|line| line.split("target not found:").nth(1))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct KnownIndex(Vec<&'static str>);

    impl PackageIndex for KnownIndex {
        fn unknown(&self, names: &[String]) -> Result<Vec<String>> {
            Ok(names
                .iter()
                .filter(|n| !self.0.contains(&n.as_str()))
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_name_syntax() {
        assert!(is_valid_package_name("base"));
        assert!(is_valid_package_name("linux-firmware"));
        assert!(is_valid_package_name("python_foo2"));
        assert!(!is_valid_package_name(""));
        assert!(!is_valid_package_name("nano wget"));
        assert!(!is_valid_package_name("vim;rm"));
        assert!(!is_valid_package_name("\"quoted\""));
    }

    #[test]
    fn test_set_preserves_order_in_output() {
        let mut listing = PackageListing::new();
        listing.set(["wget", "base", "nano"]).unwrap();
        assert_eq!(listing.to_file_contents(), "wget\nbase\nnano\n");
    }

    #[test]
    fn test_invalid_set_is_atomic() {
        let mut listing = PackageListing::new();
        listing.set(["base", "nano"]).unwrap();

        let err = listing.set(["wget", "bad name", "vim"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OfflineError>(),
            Some(OfflineError::Validation(_))
        ));
        assert_eq!(listing.names(), &["base", "nano"]);
    }

    #[test]
    fn test_set_checked_rejects_unknown() {
        let index = KnownIndex(vec!["base", "nano"]);
        let mut listing = PackageListing::new();
        listing.set(["base"]).unwrap();

        let err = listing.set_checked(["nano", "nosuchpkg"], &index).unwrap_err();
        assert!(err.to_string().contains("nosuchpkg"));
        assert_eq!(listing.names(), &["base"]);

        listing.set_checked(["nano"], &index).unwrap();
        assert_eq!(listing.names(), &["nano"]);
    }

    #[test]
    fn test_append_concatenates_in_order() {
        let mut a = PackageListing::new();
        a.set(["base", "linux"]).unwrap();
        let mut b = PackageListing::new();
        b.set(["nano", "wget", "git"]).unwrap();

        a.append(&b);
        assert_eq!(a.size(), 5);
        assert_eq!(a.names(), &["base", "linux", "nano", "wget", "git"]);
        assert_eq!(b.size(), 3);
    }

    #[test]
    fn test_from_template_accepts_names_outside_operator_syntax() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(PACKAGES_FILE);
        fs::write(&path, "# Base\nbase\nmemtest86+\nmemtest86+-efi\n").unwrap();

        let listing = PackageListing::from_template(&path).unwrap();
        assert_eq!(listing.names(), &["base", "memtest86+", "memtest86+-efi"]);

        let mut user = PackageListing::new();
        assert!(user.set(["memtest86+"]).is_err());
    }

    #[test]
    fn test_parse_package_list_skips_comments() {
        let content = "# header\nbase\n\n  linux  \n#commented\nnano\n";
        assert_eq!(parse_package_list(content), vec!["base", "linux", "nano"]);
    }

    #[test]
    fn test_parse_targets_not_found() {
        let stderr = "error: target not found: foo\nerror: target not found: bar\n";
        assert_eq!(parse_targets_not_found(stderr), vec!["foo", "bar"]);
        assert!(parse_targets_not_found("error: failed to init").is_empty());
    }
}
