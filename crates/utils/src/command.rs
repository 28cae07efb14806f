use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Execute the child process, capturing stderr. Stdout is inherited.
    /// A non-zero exit is an error carrying the captured stderr.
    fn run_capture_stderr(&mut self) -> Result<()>;

    /// Execute the child process with all stdio inherited.
    fn run_inherited(&mut self) -> Result<()>;

    /// Execute the child process, returning its stdout as a string.
    fn run_get_string(&mut self) -> Result<String>;

    /// Execute the child process, capturing stdout and stderr.
    /// Unlike the other helpers this does not check the exit status.
    fn output_checked_spawn(&mut self) -> Result<Output>;

    /// The command and its arguments, shell-quoted for display.
    fn to_string_pretty(&self) -> String;
}

/// Render the tail of a child's stderr, for inclusion in error messages.
fn stderr_tail(stderr: &[u8]) -> String {
    const MAX_LINES: usize = 20;
    let stderr = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let skip = lines.len().saturating_sub(MAX_LINES);
    lines[skip..].join("\n")
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", self.to_string_pretty());
        self
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        let cmdline = self.to_string_pretty();
        let output = self
            .log_debug()
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Spawning {cmdline}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "{cmdline} failed ({}): {}",
                output.status,
                stderr_tail(&output.stderr)
            );
        }
        Ok(())
    }

    fn run_inherited(&mut self) -> Result<()> {
        let cmdline = self.to_string_pretty();
        let status = self
            .log_debug()
            .status()
            .with_context(|| format!("Spawning {cmdline}"))?;
        if !status.success() {
            anyhow::bail!("{cmdline} failed: {status}");
        }
        Ok(())
    }

    fn run_get_string(&mut self) -> Result<String> {
        let cmdline = self.to_string_pretty();
        let output = self
            .output_checked_spawn()
            .with_context(|| format!("Spawning {cmdline}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "{cmdline} failed ({}): {}",
                output.status,
                stderr_tail(&output.stderr)
            );
        }
        String::from_utf8(output.stdout).with_context(|| format!("Parsing output of {cmdline}"))
    }

    fn output_checked_spawn(&mut self) -> Result<Output> {
        let output = self
            .log_debug()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(output)
    }

    fn to_string_pretty(&self) -> String {
        std::iter::once(self.get_program())
            .chain(self.get_args())
            .map(|a| {
                let a = a.to_string_lossy();
                shlex::try_quote(&a)
                    .map(|q| q.into_owned())
                    .unwrap_or_else(|_| a.into_owned())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
