//! Build command - runs the offline build pipeline.

use anyhow::Result;
use std::time::Instant;

use crate::config::Config;
use crate::environment::BuildLayout;
use crate::mirrors::RemoteMirrorStatus;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::preflight;
use crate::process::SystemRunner;
use crate::prompt::TerminalPrompt;
use crate::qemu;

/// Execute the build command.
pub fn cmd_build(config: &Config) -> Result<()> {
    println!("=== Offline Arch ISO Build ===\n");
    let build_start = Instant::now();

    preflight::run_preflight_or_fail(config)?;

    let runner = SystemRunner;
    let prompt = TerminalPrompt;
    let mirrors = RemoteMirrorStatus::new(&runner, &config.mirror_status_url);
    let outcome = Pipeline::new(config, &runner, &prompt, &mirrors).run()?;

    print_summary(&outcome);
    let total = build_start.elapsed().as_secs_f64();
    if total >= 60.0 {
        println!("\n=== Build Complete ({:.1}m) ===", total / 60.0);
    } else {
        println!("\n=== Build Complete ({:.1}s) ===", total);
    }

    if config.boot {
        qemu::run_iso(&runner, &BuildLayout::from_config(config))?;
    } else {
        println!("Boot it with: archoffline run");
    }
    Ok(())
}

fn print_summary(outcome: &PipelineOutcome) {
    println!("\nISO:      {}", outcome.iso.display());
    println!("Packages: {}", outcome.packages.len());
    if !outcome.mirrors.is_empty() {
        println!("Mirrors:  {}", outcome.mirrors.len());
    }

    let aur = &outcome.source_builds;
    if !aur.built.is_empty() || !aur.cached.is_empty() || !aur.skipped.is_empty() {
        println!(
            "AUR:      {} built, {} cached, {} skipped",
            aur.built.len(),
            aur.cached.len(),
            aur.skipped.len()
        );
        for (name, reason) in &aur.skipped {
            eprintln!("[WARN] AUR package {} not included: {}", name, reason);
        }
    }

    for (descriptor, reason) in &outcome.resources.skipped {
        eprintln!("[WARN] Resource {} not included: {}", descriptor, reason);
    }
}
