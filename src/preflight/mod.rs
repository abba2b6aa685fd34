//! Preflight checks for an offline build.
//!
//! Validates privileges, host tools and the archiso template before a
//! build starts. Run with `archoffline preflight` to check everything is
//! ready; `build` runs the strict variant first.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::error::OfflineError;

pub use environment::effective_uid;
pub use host_tools::required_tools;
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking privileges...");
    let uid = effective_uid();
    checks.push(environment::check_privilege(uid));

    println!("Checking host tools...");
    let (tool_checks, missing_tools) = host_tools::check_host_tools(config);
    checks.extend(tool_checks);

    println!("Checking build environment...");
    checks.extend(environment::check_build_environment(config));

    println!();

    PreflightReport {
        checks,
        uid,
        missing_tools,
    }
}

/// Run preflight and fail on the first class of problem found.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    report.print();

    if report.uid != 0 {
        return Err(OfflineError::Privilege { uid: report.uid }.into());
    }
    if !report.missing_tools.is_empty() {
        return Err(OfflineError::MissingDependency(report.missing_tools.clone()).into());
    }
    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
