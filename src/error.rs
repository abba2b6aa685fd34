//! Fatal error classes of the offline build pipeline.
//!
//! Everything here aborts the run. Recoverable problems (a single AUR
//! package failing, a resource that cannot be fetched) are logged and never
//! become an `OfflineError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("this tool requires root privileges (running as uid {uid})")]
    Privilege { uid: u32 },

    #[error("missing required host tool(s): {}", .0.join(", "))]
    MissingDependency(Vec<String>),

    #[error("invalid package list: {0}")]
    Validation(String),

    #[error("{0}")]
    Requirement(String),

    #[error("could not fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("package sync failed (exit code {code}): {stderr}")]
    Sync { code: i32, stderr: String },

    #[error("repository index update failed (exit code {code}): {stderr}")]
    Index { code: i32, stderr: String },

    #[error("image build failed (exit code {code})")]
    ImageBuild { code: i32 },

    #[error("autorun command must not contain a double quote: {0}")]
    Autorun(String),
}
