//! # cli-onprem command line
//!
//! Argument definitions and dispatch to the command implementations.

use std::ffi::OsString;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use onprem_imageref::DEFAULT_PLATFORM;
use onprem_utils::Reporter;
use serde_yaml::Value;

use crate::config::ConfigManager;
use crate::credential::DEFAULT_PROFILE;
use crate::fatpack::DEFAULT_CHUNK_SIZE;
use crate::{docker, fatpack, helm, s3_share, scan};

/// Tools for moving container images, charts and large files into
/// air-gapped environments.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "cli-onprem", version)]
pub struct Opt {
    /// Show debug logging
    #[clap(long, short, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[clap(long, short, global = true)]
    pub quiet: bool,

    #[clap(subcommand)]
    #[allow(missing_docs)]
    pub cmd: Opts,
}

impl Opt {
    /// The default tracing filter for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

/// Top-level commands.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum Opts {
    /// Save container images as tar archives
    #[clap(subcommand)]
    DockerTar(DockerTarOpts),
    /// Split files into checksummed chunks and restore them
    #[clap(subcommand)]
    Fatpack(FatpackOpts),
    /// Work with local Helm charts
    #[clap(subcommand)]
    HelmLocal(HelmLocalOpts),
    /// Manage S3 credential profiles
    #[clap(subcommand)]
    S3Share(S3ShareOpts),
    /// Scan directories and report on their contents
    #[clap(subcommand)]
    Scan(ScanCmd),
    /// Read and change persistent settings
    #[clap(subcommand)]
    Config(ConfigOpts),
}

/// `docker-tar` subcommands.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum DockerTarOpts {
    /// Pull an image and save it as
    /// `[registry__][namespace__]image__tag__arch.tar`
    Save(SaveOpts),
}

/// Options for saving an image.
#[derive(Debug, Parser, PartialEq, Eq)]
pub struct SaveOpts {
    /// Image reference, e.g. nginx:1.25 or quay.io/org/app:v1
    pub reference: String,

    /// Target platform (linux/amd64 or linux/arm64)
    #[clap(long, default_value = DEFAULT_PLATFORM)]
    pub arch: String,

    /// Output file, or a directory to place the generated filename in
    #[clap(long, short)]
    pub output: Option<Utf8PathBuf>,

    /// Write the tar stream to stdout instead of a file
    #[clap(long, conflicts_with = "output")]
    pub stdout: bool,

    /// Overwrite an existing file without asking
    #[clap(long, short)]
    pub force: bool,

    /// Only print what would be done
    #[clap(long)]
    pub dry_run: bool,

    /// Use the local image; fail if it is missing
    #[clap(long)]
    pub no_pull: bool,
}

/// `fatpack` subcommands.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum FatpackOpts {
    /// Compress a file or directory and split it into `<name>.pack/`
    Pack(PackOpts),
    /// Verify and reassemble a pack directory
    Restore(RestoreOpts),
}

/// Options for packing.
#[derive(Debug, Parser, PartialEq, Eq)]
pub struct PackOpts {
    /// File or directory to pack
    pub path: Utf8PathBuf,

    /// Chunk size, e.g. 3G or 500M
    #[clap(long, short, default_value = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: String,
}

/// Options for restoring.
#[derive(Debug, Parser, PartialEq, Eq)]
pub struct RestoreOpts {
    /// The `.pack` directory to restore
    pub pack_dir: Utf8PathBuf,

    /// Delete the pack directory after a successful restore
    #[clap(long)]
    pub purge: bool,
}

/// `helm-local` subcommands.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum HelmLocalOpts {
    /// List the container images a chart references
    ExtractImages(ExtractImagesOpts),
}

/// Options for image extraction.
#[derive(Debug, Parser, PartialEq, Eq)]
pub struct ExtractImagesOpts {
    /// Chart directory or packaged `.tgz`
    pub chart: Utf8PathBuf,

    /// Additional values file
    #[clap(long, short = 'f', action = clap::ArgAction::Append)]
    pub values: Vec<Utf8PathBuf>,

    /// Print a JSON array
    #[clap(long)]
    pub json: bool,

    /// Do not normalize image names
    #[clap(long)]
    pub raw: bool,

    /// Additional registry to recognize in command-line arguments
    #[clap(long, short = 'r', action = clap::ArgAction::Append)]
    pub registry_pattern: Vec<String>,
}

/// `s3-share` subcommands.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum S3ShareOpts {
    /// Create or update a credential profile
    #[clap(alias = "init")]
    InitCredential(InitCredentialOpts),
    /// List credential profiles
    ListProfiles,
}

/// Options for creating a credential profile.
#[derive(Debug, Parser, PartialEq, Eq)]
pub struct InitCredentialOpts {
    /// Profile name
    #[clap(long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Replace an existing profile without asking
    #[clap(long)]
    pub overwrite: bool,
}

/// `scan` subcommands.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum ScanCmd {
    /// Count the files and directories below a path
    Directory(ScanOpts),
}

/// Options for scanning.
#[derive(Debug, Parser, PartialEq, Eq)]
pub struct ScanOpts {
    /// Directory to scan
    pub path: Utf8PathBuf,
}

/// `config` subcommands. Keys are dot-separated, e.g.
/// `helm.registry_patterns`.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum ConfigOpts {
    /// Print a value
    Get {
        /// Dot-separated key
        key: String,
    },
    /// Set a value; it is parsed as YAML, so `[a.io, b.io]` is a list
    Set {
        /// Dot-separated key
        key: String,
        /// New value
        value: String,
    },
    /// Remove a value
    Unset {
        /// Dot-separated key
        key: String,
    },
}

fn run_config(opts: ConfigOpts, reporter: &Reporter) -> Result<()> {
    let cfg = ConfigManager::open_default()?;
    match opts {
        ConfigOpts::Get { key } => match cfg.get(&key)? {
            Some(Value::String(s)) => println!("{s}"),
            Some(v) => print!("{}", serde_yaml::to_string(&v)?),
            None => anyhow::bail!("{key} is not set"),
        },
        ConfigOpts::Set { key, value } => {
            let parsed = serde_yaml::from_str::<Value>(&value)
                .ok()
                .filter(|v| !v.is_null())
                .unwrap_or(Value::String(value));
            cfg.set(&key, parsed)
                .with_context(|| format!("Setting {key}"))?;
            reporter.success(format!("Set {key}"));
        }
        ConfigOpts::Unset { key } => {
            if cfg.delete(&key)? {
                reporter.success(format!("Removed {key}"));
            } else {
                reporter.warning(format!("{key} is not set"));
            }
        }
    }
    Ok(())
}

/// Dispatch a parsed command line.
pub fn run(opt: Opt) -> Result<()> {
    let reporter = Reporter::new(opt.quiet);
    match opt.cmd {
        Opts::DockerTar(DockerTarOpts::Save(opts)) => docker::save(&opts, &reporter),
        Opts::Fatpack(FatpackOpts::Pack(opts)) => fatpack::pack(&opts, &reporter),
        Opts::Fatpack(FatpackOpts::Restore(opts)) => fatpack::restore(&opts, &reporter),
        Opts::HelmLocal(HelmLocalOpts::ExtractImages(opts)) => {
            helm::extract_images(&opts, &reporter)
        }
        Opts::S3Share(S3ShareOpts::InitCredential(opts)) => {
            s3_share::init_credential(&opts, &reporter)
        }
        Opts::S3Share(S3ShareOpts::ListProfiles) => s3_share::list_profiles(&reporter),
        Opts::Scan(ScanCmd::Directory(opts)) => scan::directory(&opts, &reporter),
        Opts::Config(opts) => run_config(opts, &reporter),
    }
}

/// Parse the provided arguments, set up logging and execute the command.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    let opt = Opt::parse_from(args);
    onprem_utils::initialize_tracing(opt.log_level());
    tracing::trace!("starting {}", onprem_utils::NAME);
    run(opt)
}
