//! `scan directory`: count what is under a directory.

use anyhow::{Context, Result};
use camino::Utf8Path;
use comfy_table::{presets, Table};
use fn_error_context::context;
use onprem_utils::Reporter;

use crate::cli::ScanOpts;

/// Totals for one directory tree, not counting its root.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ScanReport {
    files: u64,
    directories: u64,
}

impl ScanReport {
    fn total(&self) -> u64 {
        self.files + self.directories
    }

    fn to_table(self) -> Table {
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_header(vec!["Item", "Count"]);
        table.add_row(vec!["Files".to_string(), self.files.to_string()]);
        table.add_row(vec!["Directories".to_string(), self.directories.to_string()]);
        table.add_row(vec!["Total Items".to_string(), self.total().to_string()]);
        table
    }
}

/// Walk `dir` recursively. Symlinks are classified by their target but
/// never descended into.
fn scan_tree(dir: &Utf8Path, report: &mut ScanReport) -> Result<()> {
    for entry in dir.read_dir_utf8().with_context(|| format!("Reading {dir}"))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            report.directories += 1;
            scan_tree(entry.path(), report)?;
        } else if file_type.is_file() {
            report.files += 1;
        } else if file_type.is_symlink() {
            match entry.path().metadata() {
                Ok(m) if m.is_dir() => report.directories += 1,
                Ok(m) if m.is_file() => report.files += 1,
                // Dangling links are neither
                _ => {}
            }
        }
    }
    Ok(())
}

#[context("Scanning {path}")]
fn scan(path: &Utf8Path) -> Result<ScanReport> {
    if !path.exists() {
        anyhow::bail!("Path {path} does not exist");
    }
    if !path.is_dir() {
        anyhow::bail!("{path} is not a directory");
    }
    let mut report = ScanReport::default();
    scan_tree(path, &mut report)?;
    Ok(report)
}

/// Run `scan directory`.
pub(crate) fn directory(opts: &ScanOpts, reporter: &Reporter) -> Result<()> {
    reporter.step(format!("Scanning directory: {}", opts.path));
    let report = scan(&opts.path)?;
    tracing::debug!("{report:?}");
    println!("Scan Report for {}", opts.path);
    println!("{}", report.to_table());
    reporter.success("Scan completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_counts() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        std::fs::create_dir_all(root.join("a/b"))?;
        std::fs::create_dir(root.join("c"))?;
        std::fs::write(root.join("top.txt"), "x")?;
        std::fs::write(root.join("a/one"), "")?;
        std::fs::write(root.join("a/b/two"), "")?;

        let report = scan(root)?;
        assert_eq!(
            report,
            ScanReport {
                files: 3,
                directories: 3
            }
        );
        assert_eq!(report.total(), 6);
        Ok(())
    }

    #[test]
    fn test_symlinked_dir_not_followed() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        std::fs::create_dir(root.join("real"))?;
        std::fs::write(root.join("real/f"), "")?;
        std::os::unix::fs::symlink(root.join("real"), root.join("link"))?;

        let report = scan(root)?;
        assert_eq!(report.directories, 2);
        assert_eq!(report.files, 1);
        Ok(())
    }

    #[test]
    fn test_empty_dir() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        assert_eq!(scan(root)?, ScanReport::default());
        Ok(())
    }

    #[test]
    fn test_scan_errors() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = Utf8Path::from_path(td.path()).context("non-UTF-8 tempdir")?;
        let e = scan(&root.join("missing")).unwrap_err();
        assert!(format!("{e:#}").contains("does not exist"));

        let file = root.join("file");
        std::fs::write(&file, "")?;
        let e = scan(&file).unwrap_err();
        assert!(format!("{e:#}").contains("is not a directory"));
        Ok(())
    }

    #[test]
    fn test_table() {
        let report = ScanReport {
            files: 2,
            directories: 1,
        };
        let rendered = report.to_table().to_string();
        for needle in ["Files", "Directories", "Total Items", "3"] {
            assert!(rendered.contains(needle), "{rendered}");
        }
    }
}
