//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build the offline ISO
//! - `run` - Boot the ISO in QEMU
//! - `clean` - Clean build artifacts
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod build;
pub mod clean;
mod preflight;
mod run;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use preflight::cmd_preflight;
pub use run::cmd_run;
pub use show::cmd_show;
