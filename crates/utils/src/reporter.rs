//! Human-facing status output.
//!
//! Status lines go to stderr so that command results written to stdout
//! (image lists, tar streams) stay machine readable.

use std::borrow::Cow;
use std::fmt::Display;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Prints prefixed, colored status messages; everything but errors is
/// suppressed in quiet mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    quiet: bool,
}

impl Reporter {
    /// Create a reporter; `quiet` hides everything except errors.
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Whether non-error output is suppressed.
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Informational message.
    pub fn info(&self, msg: impl Display) {
        if !self.quiet {
            anstream::eprintln!("{}", format!("► {msg}").bold().blue());
        }
    }

    /// A step within a longer operation.
    pub fn step(&self, msg: impl Display) {
        if !self.quiet {
            anstream::eprintln!("{}", format!("→ {msg}").cyan());
        }
    }

    /// Completion message.
    pub fn success(&self, msg: impl Display) {
        if !self.quiet {
            anstream::eprintln!("{}", format!("✓ {msg}").bold().green());
        }
    }

    /// Non-fatal problem.
    pub fn warning(&self, msg: impl Display) {
        if !self.quiet {
            anstream::eprintln!("{}", format!("⚠ {msg}").bold().yellow());
        }
    }

    /// A ticking spinner for a blocking operation. Hidden in quiet mode.
    /// Callers should `finish_and_clear()` it when done.
    pub fn spinner(&self, msg: impl Into<Cow<'static, str>>) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}
