//! Minimal pacman.conf model: an untitled preamble followed by `[section]`
//! blocks, each holding its raw lines.

use std::path::Path;

/// Sections that name the upstream repositories mirrored into the image.
pub const UPSTREAM_REPOS: [&str; 3] = ["core", "extra", "community"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub lines: Vec<String>,
}

impl Section {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// The `[options]` block used for the sync-time config.
    pub fn options(db_path: &Path, cache_dir: &Path) -> Self {
        Self::new("options")
            .line(format!("DBPath      = {}", db_path.display()))
            .line(format!("CacheDir    = {}", cache_dir.display()))
            .line("HoldPkg     = pacman glibc")
            .line("Architecture = auto")
            .line("")
            .line("CheckSpace")
            .line("")
            .line("SigLevel    = Required DatabaseOptional")
            .line("LocalFileSigLevel = Optional")
            .line("")
    }

    /// A repository listing each server in order.
    pub fn servers(name: &str, servers: &[String]) -> Self {
        let mut section = Self::new(name);
        for server in servers {
            section.lines.push(format!("Server = {}", server));
        }
        section.lines.push(String::new());
        section
    }

    /// A repository sourced from an `Include` file.
    pub fn include(name: &str, path: &str) -> Self {
        Self::new(name)
            .line(format!("Include = {}", path))
            .line("")
    }

    /// A trusted repository served from a local directory.
    pub fn local_repo(name: &str, dir: &str) -> Self {
        Self::new(name)
            .line("SigLevel = Optional TrustAll")
            .line(format!("Server = file://{}", dir))
            .line("")
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacmanConf {
    /// Lines before the first section header.
    pub preamble: Vec<String>,
    pub sections: Vec<Section>,
}

impl PacmanConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut conf = Self::new();
        for line in text.lines() {
            if let Some(name) = section_header(line) {
                conf.sections.push(Section::new(name));
                continue;
            }
            match conf.sections.last_mut() {
                Some(section) => section.lines.push(line.to_string()),
                None => conf.preamble.push(line.to_string()),
            }
        }
        conf
    }

    pub fn push(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.is(name))
    }

    pub fn retain_sections<F: FnMut(&Section) -> bool>(&mut self, f: F) {
        self.sections.retain(f);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for line in &section.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn section_header(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
#
# /etc/pacman.conf
#
[options]
HoldPkg     = pacman glibc
Architecture = auto

[core]
Include = /etc/pacman.d/mirrorlist

[Extra]
Include = /etc/pacman.d/mirrorlist
";

    #[test]
    fn test_parse_splits_sections() {
        let conf = PacmanConf::parse(SAMPLE);
        assert_eq!(conf.preamble.len(), 3);
        assert_eq!(conf.sections.len(), 3);
        assert!(conf.section("extra").is_some());
        assert_eq!(
            conf.section("core").unwrap().lines[0],
            "Include = /etc/pacman.d/mirrorlist"
        );
    }

    #[test]
    fn test_render_round_trips_text() {
        let conf = PacmanConf::parse(SAMPLE);
        assert_eq!(conf.render(), SAMPLE);
    }

    #[test]
    fn test_retain_and_push() {
        let mut conf = PacmanConf::parse(SAMPLE);
        conf.retain_sections(|s| !UPSTREAM_REPOS.iter().any(|r| s.is(r)));
        conf.push(Section::local_repo("localrepo", "/root/localrepo/"));

        let text = conf.render();
        assert!(!text.contains("[core]"));
        assert!(!text.contains("[Extra]"));
        assert!(text.contains("[options]"));
        assert!(text.contains("[localrepo]\nSigLevel = Optional TrustAll\nServer = file:///root/localrepo/\n"));
    }

    #[test]
    fn test_servers_section() {
        let section = Section::servers(
            "core",
            &["https://a/$repo/os/$arch".into(), "https://b/$repo/os/$arch".into()],
        );
        assert_eq!(section.lines.len(), 3);
        assert_eq!(section.lines[1], "Server = https://b/$repo/os/$arch");
    }
}
