//! `fatpack`: split a file or directory into checksummed chunks that fit
//! on size-limited media, and put it back together.
//!
//! A pack directory `<name>.pack/` holds:
//!
//! - `parts/0000.part`, `parts/0001.part`, ...: the chunks of a gzipped tar
//! - `manifest.sha256`: `sha256sum` output for every part
//! - `restore.sh`: a standalone script that verifies, merges and unpacks
//! - `<N>_MB`: an empty marker naming the total size

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::process::Command;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use indoc::indoc;
use onprem_utils::{CommandRunExt, Reporter};
use regex::Regex;

use crate::cli::{PackOpts, RestoreOpts};

/// Chunk size used unless one is given.
pub(crate) const DEFAULT_CHUNK_SIZE: &str = "3G";

const PACK_SUFFIX: &str = ".pack";
const PARTS_DIR: &str = "parts";
const ARCHIVE: &str = "archive.tar.gz";
const MANIFEST: &str = "manifest.sha256";
const RESTORE_SCRIPT_NAME: &str = "restore.sh";

/// Shipped inside every pack; needs only a POSIX shell and coreutils.
const RESTORE_SCRIPT: &str = indoc! {r#"
    #!/usr/bin/env sh
    set -eu

    PURGE=0
    [ "${1:-}" = "--purge" ] && PURGE=1

    PACK_DIR="$(basename "$(pwd)")"

    printf "> Verifying parts...\n"
    sha256sum -c manifest.sha256

    printf "> Merging parts...\n"
    cat parts/* > archive.tar.gz

    printf "> Extracting...\n"
    cd ..
    tar --no-same-owner -xzvf "$PACK_DIR/archive.tar.gz"

    printf "> Cleaning up...\n"
    cd "$PACK_DIR"
    rm -f archive.tar.gz

    if [ "$PURGE" -eq 1 ]; then
      printf "> Removing pack directory (--purge)...\n"
      cd ..
      rm -rf "$PACK_DIR"
    fi

    printf "Restore complete\n"
"#};

/// Accept what `split -b` accepts in the forms we document: a byte count
/// with an optional K, M, G or T suffix.
pub(crate) fn validate_chunk_size(size: &str) -> Result<()> {
    let re = Regex::new(r"^[0-9]+[KMGT]?$")?;
    if !re.is_match(size) {
        anyhow::bail!("Invalid chunk size {size:?}; expected e.g. 3G, 500M or 1024");
    }
    Ok(())
}

/// Rename `split` output (`aa`, `ab`, ...) to `0000.part`, `0001.part`, ...
/// preserving order.
#[context("Renaming parts in {parts_dir}")]
fn renumber_parts(parts_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut parts = Vec::new();
    for entry in parts_dir.read_dir_utf8()? {
        parts.push(entry?.into_path());
    }
    parts.sort();
    let mut renamed = Vec::with_capacity(parts.len());
    for (i, part) in parts.into_iter().enumerate() {
        let target = parts_dir.join(format!("{i:04}.part"));
        if part != target {
            std::fs::rename(&part, &target)?;
        }
        renamed.push(target);
    }
    Ok(renamed)
}

/// Write `manifest.sha256` with paths relative to the pack directory.
#[context("Writing {MANIFEST}")]
fn write_manifest(pack_dir: &Utf8Path, parts: &[Utf8PathBuf]) -> Result<()> {
    let mut cmd = Command::new("sha256sum");
    cmd.current_dir(pack_dir);
    for part in parts {
        let rel = part.strip_prefix(pack_dir)?;
        cmd.arg(rel.as_str());
    }
    let manifest = cmd.run_get_string()?;
    std::fs::write(pack_dir.join(MANIFEST), manifest)?;
    Ok(())
}

#[context("Writing {RESTORE_SCRIPT_NAME}")]
fn write_restore_script(pack_dir: &Utf8Path) -> Result<()> {
    let path = pack_dir.join(RESTORE_SCRIPT_NAME);
    std::fs::write(&path, RESTORE_SCRIPT)?;
    std::fs::set_permissions(&path, Permissions::from_mode(0o755))?;
    Ok(())
}

/// The first field of `du -m` output.
fn parse_du_megabytes(output: &str) -> Result<u64> {
    output
        .split_whitespace()
        .next()
        .context("Empty du output")?
        .parse()
        .with_context(|| format!("Parsing du output {output:?}"))
}

fn write_size_marker(pack_dir: &Utf8Path) -> Result<Utf8PathBuf> {
    let du = Command::new("du")
        .args(["-m", pack_dir.as_str()])
        .run_get_string()?;
    let marker = pack_dir.join(format!("{}_MB", parse_du_megabytes(&du)?));
    std::fs::write(&marker, "").with_context(|| format!("Writing {marker}"))?;
    Ok(marker)
}

/// `tar` creating a gzipped `archive` of `parent/basename`, storing paths
/// relative to `parent`. No `-v`: stdout is inherited.
fn archive_command(archive: &Utf8Path, parent: &Utf8Path, basename: &str) -> Command {
    let mut cmd = Command::new("tar");
    cmd.args(["-czf", archive.as_str(), "-C", parent.as_str(), basename]);
    cmd
}

/// Run `fatpack pack`.
#[context("Packing {}", opts.path)]
pub(crate) fn pack(opts: &PackOpts, reporter: &Reporter) -> Result<()> {
    validate_chunk_size(&opts.chunk_size)?;
    if !opts.path.exists() {
        anyhow::bail!("{} does not exist", opts.path);
    }
    let input = opts.path.canonicalize_utf8()?;
    let basename = input
        .file_name()
        .with_context(|| format!("{input} has no file name"))?;
    let parent = input.parent().unwrap_or(Utf8Path::new("/"));

    let pack_dir = Utf8PathBuf::from(format!("{basename}{PACK_SUFFIX}"));
    let parts_dir = pack_dir.join(PARTS_DIR);
    let archive = pack_dir.join(ARCHIVE);

    if pack_dir.exists() {
        reporter.warning(format!("{pack_dir} already exists, removing it"));
        std::fs::remove_dir_all(&pack_dir).with_context(|| format!("Removing {pack_dir}"))?;
    }
    reporter.step(format!("Creating {pack_dir}"));
    std::fs::create_dir_all(&parts_dir).with_context(|| format!("Creating {parts_dir}"))?;

    let pb = reporter.spinner(format!("Compressing {basename}"));
    let r = archive_command(&archive, parent, basename).run_capture_stderr();
    pb.finish_and_clear();
    r.context("Compressing")?;

    reporter.step(format!("Splitting into {} chunks", opts.chunk_size));
    let parts_prefix = format!("{parts_dir}/");
    Command::new("split")
        .args(["-b", opts.chunk_size.as_str(), archive.as_str(), parts_prefix.as_str()])
        .run_capture_stderr()
        .context("Splitting")?;
    let parts = renumber_parts(&parts_dir)?;
    std::fs::remove_file(&archive).with_context(|| format!("Removing {archive}"))?;
    tracing::info!("Split {basename} into {} parts", parts.len());

    reporter.step("Writing integrity manifest");
    write_manifest(&pack_dir, &parts)?;
    reporter.step("Writing restore script");
    write_restore_script(&pack_dir)?;
    let marker = write_size_marker(&pack_dir)?;
    tracing::debug!("Size marker {marker}");

    reporter.success(format!("Packed into {pack_dir}"));
    reporter.info(format!(
        "To restore: cd {pack_dir} && ./{RESTORE_SCRIPT_NAME}"
    ));
    Ok(())
}

/// Run `fatpack restore`.
#[context("Restoring {}", opts.pack_dir)]
pub(crate) fn restore(opts: &RestoreOpts, reporter: &Reporter) -> Result<()> {
    if !opts.pack_dir.is_dir() {
        anyhow::bail!("{} does not exist or is not a directory", opts.pack_dir);
    }
    if !opts.pack_dir.join(RESTORE_SCRIPT_NAME).exists() {
        anyhow::bail!("No {RESTORE_SCRIPT_NAME} in {}", opts.pack_dir);
    }

    reporter.step("Running restore script");
    let mut cmd = Command::new(format!("./{RESTORE_SCRIPT_NAME}"));
    cmd.current_dir(&opts.pack_dir);
    if opts.purge {
        cmd.arg("--purge");
    }
    cmd.run_inherited()?;
    reporter.success("Restore complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_command() {
        let cmd = archive_command(
            Utf8Path::new("data.pack/archive.tar.gz"),
            Utf8Path::new("/srv"),
            "data",
        );
        assert_eq!(cmd.get_program(), "tar");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(
            args,
            ["-czf", "data.pack/archive.tar.gz", "-C", "/srv", "data"]
        );
    }

    #[test]
    fn test_validate_chunk_size() {
        for ok in ["3G", "500M", "1024", "10K", "1T"] {
            assert!(validate_chunk_size(ok).is_ok(), "{ok}");
        }
        for bad in ["", "G", "3g", "3GB", "1.5G", "-1M", "3 G"] {
            assert!(validate_chunk_size(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_restore_script() {
        assert!(RESTORE_SCRIPT.starts_with("#!/usr/bin/env sh\nset -eu\n"));
        assert!(RESTORE_SCRIPT.contains("sha256sum -c manifest.sha256"));
        assert!(RESTORE_SCRIPT.contains("cat parts/* > archive.tar.gz"));
        assert!(RESTORE_SCRIPT.contains("tar --no-same-owner -xzvf \"$PACK_DIR/archive.tar.gz\""));
        assert!(RESTORE_SCRIPT.contains(r#"[ "${1:-}" = "--purge" ] && PURGE=1"#));
        assert!(RESTORE_SCRIPT.contains("rm -rf \"$PACK_DIR\""));
    }

    #[test]
    fn test_write_restore_script_mode() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        write_restore_script(dir)?;
        let path = dir.join(RESTORE_SCRIPT_NAME);
        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        similar_asserts::assert_eq!(std::fs::read_to_string(&path)?, RESTORE_SCRIPT.to_string());
        Ok(())
    }

    #[test]
    fn test_renumber_parts() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        for (name, body) in [("ab", "2"), ("aa", "1"), ("ac", "3")] {
            std::fs::write(dir.join(name), body)?;
        }
        let parts = renumber_parts(dir)?;
        let names: Vec<&str> = parts.iter().filter_map(|p| p.file_name()).collect();
        assert_eq!(names, ["0000.part", "0001.part", "0002.part"]);
        assert_eq!(std::fs::read_to_string(dir.join("0000.part"))?, "1");
        assert_eq!(std::fs::read_to_string(dir.join("0002.part"))?, "3");
        Ok(())
    }

    #[test]
    fn test_parse_du() -> Result<()> {
        assert_eq!(parse_du_megabytes("42\tfoo.pack\n")?, 42);
        assert!(parse_du_megabytes("").is_err());
        assert!(parse_du_megabytes("abc foo").is_err());
        Ok(())
    }

    #[test]
    fn test_restore_requires_script() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        let opts = RestoreOpts {
            pack_dir: dir.to_owned(),
            purge: false,
        };
        let e = restore(&opts, &Reporter::new(true)).unwrap_err();
        assert!(format!("{e:#}").contains("No restore.sh"));

        let missing = RestoreOpts {
            pack_dir: dir.join("nope.pack"),
            purge: false,
        };
        assert!(restore(&missing, &Reporter::new(true)).is_err());
        Ok(())
    }
}
