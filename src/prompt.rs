//! Operator interaction: region selection, extra packages, breakpoints.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

pub trait Prompt {
    /// Pick one region out of `regions`. `None` means nothing was chosen.
    fn select_region(&self, regions: &[String]) -> Result<Option<String>>;

    /// Free-form line of input after `question`.
    fn ask(&self, question: &str) -> Result<String>;

    /// Block until the operator continues.
    fn pause(&self, label: &str) -> Result<()>;
}

/// Reads answers from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_line(&self) -> Result<String> {
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(line.trim().to_string())
    }
}

impl Prompt for TerminalPrompt {
    fn select_region(&self, regions: &[String]) -> Result<Option<String>> {
        if regions.is_empty() {
            return Ok(None);
        }
        println!("Select a mirror region:");
        for (i, region) in regions.iter().enumerate() {
            println!("  {:>3}) {}", i + 1, region);
        }
        print!("Region number or name (empty to abort): ");
        io::stdout().flush()?;

        let answer = self.read_line()?;
        Ok(pick_region(regions, &answer))
    }

    fn ask(&self, question: &str) -> Result<String> {
        print!("{}", question);
        io::stdout().flush()?;
        self.read_line()
    }

    fn pause(&self, label: &str) -> Result<()> {
        print!("Breakpoint: {} (press Enter to continue)", label);
        io::stdout().flush()?;
        self.read_line().map(|_| ())
    }
}

/// Resolve an answer given as a 1-based index or a case-insensitive name.
pub fn pick_region(regions: &[String], answer: &str) -> Option<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| regions.get(i)).cloned();
    }
    regions
        .iter()
        .find(|r| r.eq_ignore_ascii_case(answer))
        .cloned()
}
