//! Shared plumbing for the cli-onprem crates: process entry, logging
//! setup, subprocess helpers and console status output. Keep this to
//! things that depend only on the standard library and small "core" crates.

mod command;
pub use command::*;
mod reporter;
pub use reporter::*;
mod tracing_util;
pub use tracing_util::*;

/// The name of our binary
pub const NAME: &str = "cli-onprem";

/// Run the real entrypoint from `main`; on error print the full context
/// chain and exit with status 1.
pub fn run_main<F>(f: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    use std::io::Write as _;

    use owo_colors::OwoColorize;

    if let Err(e) = f() {
        let mut stderr = anstream::stderr();
        // Don't panic if writing fails.
        let _ = writeln!(stderr, "{}{:#}", "error: ".red(), e);
        std::process::exit(1);
    }
}
