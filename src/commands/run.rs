//! Run command - boot the ISO in QEMU.

use anyhow::Result;

use crate::config::Config;
use crate::environment::BuildLayout;
use crate::process::{self, SystemRunner};
use crate::qemu;

/// Execute the run command.
pub fn cmd_run(config: &Config) -> Result<()> {
    if !process::exists("qemu-system-x86_64") {
        anyhow::bail!("qemu-system-x86_64 not found. Install the qemu-full package.");
    }
    qemu::run_iso(&SystemRunner, &BuildLayout::from_config(config))
}
