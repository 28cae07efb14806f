//! `docker-tar save`: pull an image and write it to a tar archive.

use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use dialoguer::Confirm;
use fn_error_context::context;
use onprem_imageref::{Arch, ImageReference};
use onprem_utils::{CommandRunExt, Reporter};

use crate::cli::SaveOpts;
use crate::pull::Puller;

const DOCKER: &str = "docker";

/// Fail early with install instructions if the docker CLI is missing.
pub(crate) fn ensure_docker_installed() -> Result<()> {
    which::which(DOCKER).map(|_| ()).map_err(|_| {
        anyhow::anyhow!(
            "Docker CLI is not installed. See https://docs.docker.com/engine/install/"
        )
    })
}

/// Fail with a hint if the daemon does not answer `docker info`.
#[context("Checking the Docker daemon")]
pub(crate) fn check_docker_daemon() -> Result<()> {
    let output = Command::new(DOCKER)
        .arg("info")
        .output_checked_spawn()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!("docker info: {stderr}");
        anyhow::bail!(
            "The Docker daemon is not running.\n\n\
             Start Docker Desktop, or on Linux run: sudo systemctl start docker"
        );
    }
    Ok(())
}

/// Whether `reference` is already in local image storage.
pub(crate) fn image_exists(reference: &str) -> Result<bool> {
    let status = Command::new(DOCKER)
        .args(["inspect", "--type=image", reference])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .log_debug()
        .status()
        .context("Spawning docker inspect")?;
    Ok(status.success())
}

/// Run `pull` through `docker`. The error is docker's stderr and nothing
/// else, since retry classification and user advice both key off its
/// wording; the command line is only logged. Progress output is swallowed
/// so it never mixes with a tar stream on stdout.
fn run_pull(mut docker: Command, reference: &str, platform: Option<&str>) -> Result<()> {
    docker.arg("pull");
    if let Some(platform) = platform {
        docker.args(["--platform", platform]);
    }
    docker.arg(reference);
    let output = docker
        .output_checked_spawn()
        .context("Spawning docker")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            anyhow::bail!("docker pull failed: {}", output.status);
        }
        anyhow::bail!("{stderr}");
    }
    Ok(())
}

/// A single `docker pull`.
fn pull_image(reference: &str, platform: Option<&str>) -> Result<()> {
    run_pull(Command::new(DOCKER), reference, platform)
}

fn save_image(reference: &str, output: &Utf8Path) -> Result<()> {
    Command::new(DOCKER)
        .args(["save", "-o", output.as_str(), reference])
        .run_capture_stderr()
        .with_context(|| format!("Saving {reference} to {output}"))
}

fn save_image_to_stdout(reference: &str) -> Result<()> {
    Command::new(DOCKER)
        .args(["save", reference])
        .run_capture_stderr()
        .with_context(|| format!("Streaming {reference} to stdout"))
}

/// Turn docker's stderr into a message telling the user what to do.
pub(crate) fn describe_docker_error(stderr: &str, reference: &str) -> String {
    let lower = stderr.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has(&["denied", "unauthorized"]) {
        format!(
            "Access to image {reference} was denied.\n\n\
             To fix:\n  \
             1. For a private registry, log in first: docker login\n  \
             2. Check the image name and tag\n  \
             3. Check your permissions on the organization/repository"
        )
    } else if has(&["not found", "manifest unknown"]) {
        format!(
            "Image {reference} was not found.\n\n\
             To fix:\n  \
             1. Check the image name for typos\n  \
             2. Check that the tag exists\n  \
             3. Check that the registry is correct"
        )
    } else if has(&["timeout", "network", "connection", "lookup"]) {
        format!(
            "Network error while downloading {reference}.\n\n\
             To fix:\n  \
             1. Check your internet connection\n  \
             2. Check VPN or proxy settings\n  \
             3. Check registry status, e.g. https://status.docker.com\n  \
             4. Try again later"
        )
    } else if has(&["no space", "disk full"]) {
        format!(
            "Not enough disk space to store {reference}.\n\n\
             To fix:\n  \
             1. Free up disk space\n  \
             2. Remove unused images and containers: docker system prune -a"
        )
    } else {
        format!("Image operation failed: {reference}\n\nDetails:\n{stderr}")
    }
}

/// Where the archive goes: inside `output` if it is a directory, at
/// `output` otherwise, or in the current directory.
fn resolve_output_path(output: Option<&Utf8Path>, filename: &str) -> Utf8PathBuf {
    match output {
        Some(dir) if dir.is_dir() => dir.join(filename),
        Some(path) => path.to_owned(),
        None => Utf8PathBuf::from(filename),
    }
}

/// Run `docker-tar save`.
#[context("Saving {}", opts.reference)]
pub(crate) fn save(opts: &SaveOpts, reporter: &Reporter) -> Result<()> {
    let arch = Arch::from_platform(&opts.arch)?;
    let platform = arch.platform();
    let reference = ImageReference::parse(&opts.reference);
    let path = resolve_output_path(opts.output.as_deref(), &reference.tar_filename(arch));
    tracing::debug!("Parsed {} as {reference}; target {path}", opts.reference);

    if opts.dry_run {
        if opts.stdout {
            reporter.info(format!("[dry run] Would stream {} to stdout", opts.reference));
        } else {
            reporter.info(format!("[dry run] Would save {} to {path}", opts.reference));
        }
        return Ok(());
    }

    if !opts.stdout && path.exists() && !opts.force {
        reporter.warning(format!("{path} already exists"));
        let overwrite = Confirm::new()
            .with_prompt("Overwrite it?")
            .default(false)
            .interact()?;
        if !overwrite {
            reporter.warning("Cancelled");
            return Ok(());
        }
    }

    ensure_docker_installed()?;
    check_docker_daemon()?;

    if opts.no_pull {
        if !image_exists(&opts.reference)? {
            anyhow::bail!("{} is not available locally and --no-pull was given", opts.reference);
        }
        reporter.step(format!("Using local image {}", opts.reference));
    } else if image_exists(&opts.reference)? {
        reporter.step(format!("Image {} already present locally", opts.reference));
    } else {
        let pb = reporter.spinner(format!("Pulling {} ({platform})", opts.reference));
        let report = Puller::new(pull_image).pull(&opts.reference, Some(&platform));
        pb.finish_and_clear();
        if !report.success {
            anyhow::bail!("{}", describe_docker_error(&report.message, &opts.reference));
        }
        reporter.step(format!("Pulled {}", opts.reference));
    }

    if opts.stdout {
        save_image_to_stdout(&opts.reference)?;
        return Ok(());
    }

    let pb = reporter.spinner(format!("Saving to {path}"));
    let r = save_image(&opts.reference, &path);
    pb.finish_and_clear();
    r?;
    reporter.success(format!("Saved {} to {path}", opts.reference));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_denied() {
        for stderr in [
            "Error: denied: requested access to the resource is denied",
            "Error: unauthorized: authentication required",
        ] {
            let msg = describe_docker_error(stderr, "private/image:latest");
            assert!(msg.contains("denied"), "{msg}");
            assert!(msg.contains("docker login"), "{msg}");
            assert!(msg.contains("private/image:latest"), "{msg}");
        }
    }

    #[test]
    fn test_describe_not_found() {
        for stderr in [
            "Error: manifest for nginx:nonexistent not found",
            "Error: manifest unknown: manifest unknown",
        ] {
            let msg = describe_docker_error(stderr, "nginx:nonexistent");
            assert!(msg.contains("was not found"), "{msg}");
            assert!(msg.contains("tag exists"), "{msg}");
        }
    }

    #[test]
    fn test_describe_network() {
        for stderr in [
            "Error: net/http: request canceled while waiting for connection (Client.Timeout exceeded)",
            "Error: Get https://registry-1.docker.io/v2/: dial tcp: lookup registry-1.docker.io: no such host",
        ] {
            let msg = describe_docker_error(stderr, "redis:alpine");
            assert!(msg.starts_with("Network error"), "{msg}");
            assert!(msg.contains("VPN or proxy"), "{msg}");
            assert!(msg.contains("redis:alpine"), "{msg}");
        }
    }

    #[test]
    fn test_describe_disk_full() {
        let msg = describe_docker_error(
            "Error: failed to register layer: write /var/lib/docker: no space left on device",
            "postgres:14",
        );
        assert!(msg.contains("disk space"), "{msg}");
        assert!(msg.contains("docker system prune"), "{msg}");
        assert!(msg.contains("postgres:14"), "{msg}");
    }

    #[test]
    fn test_describe_fallback_keeps_stderr() {
        let msg = describe_docker_error("Error: some unknown error occurred", "myapp:v1.0");
        similar_asserts::assert_eq!(
            msg,
            "Image operation failed: myapp:v1.0\n\nDetails:\nError: some unknown error occurred"
                .to_string()
        );
    }

    /// A `docker` stand-in that prints `stderr` and exits 1.
    fn failing_docker(stderr: &str) -> Command {
        let mut c = Command::new("sh");
        c.args(["-c", &format!("echo '{stderr}' >&2; exit 1"), "docker"]);
        c
    }

    #[test]
    fn test_pull_error_is_stderr_only() {
        let e = run_pull(
            failing_docker("Error response from daemon: manifest unknown"),
            "ghcr.io/acme/timeout-exporter:v1",
            Some("linux/amd64"),
        )
        .unwrap_err();
        assert_eq!(
            format!("{e:#}"),
            "Error response from daemon: manifest unknown"
        );
    }

    #[test]
    fn test_reference_does_not_make_failure_transient() {
        let mut sleeps = 0;
        let report = Puller::new(|reference: &str, platform: Option<&str>| {
            run_pull(
                failing_docker("Error response from daemon: manifest unknown"),
                reference,
                platform,
            )
        })
        .with_sleep(|_| sleeps += 1)
        .pull("ghcr.io/acme/timeout-exporter:v1", Some("linux/amd64"));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(sleeps, 0);
        assert!(!report.success);
        let msg = describe_docker_error(&report.message, "ghcr.io/acme/timeout-exporter:v1");
        assert!(msg.contains("was not found"), "{msg}");
    }

    #[test]
    fn test_docker_timeout_is_retried() {
        let mut sleeps = 0;
        let report = Puller::new(|reference: &str, platform: Option<&str>| {
            run_pull(
                failing_docker("net/http: TLS handshake timeout"),
                reference,
                platform,
            )
        })
        .with_sleep(|_| sleeps += 1)
        .pull("nginx:latest", None);
        assert_eq!(report.attempts.len(), 4);
        assert_eq!(sleeps, 3);
        assert_eq!(report.message, "net/http: TLS handshake timeout");
    }

    #[test]
    fn test_resolve_output_path() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        assert_eq!(
            resolve_output_path(Some(dir), "nginx__latest__amd64.tar"),
            dir.join("nginx__latest__amd64.tar")
        );
        let file = dir.join("custom.tar");
        assert_eq!(resolve_output_path(Some(&file), "x.tar"), file);
        assert_eq!(
            resolve_output_path(None, "x.tar"),
            Utf8PathBuf::from("x.tar")
        );
        Ok(())
    }
}
